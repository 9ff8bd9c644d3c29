//! Data models for summarization jobs and the works they target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a summarization job.
///
/// `Pending → Processing → {Completed | Failed}`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse the database representation. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a job in this state blocks enqueueing another for the same work.
    pub fn is_open(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One summarization task for a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub work_id: String,
    pub source_url: Option<String>,
    /// Higher is more urgent.
    pub priority: i32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present only when `status == Failed`, at most 500 characters.
    pub error: Option<String>,
}

/// A document (paper) that can be summarized.
///
/// Owned by the wider system; the worker only writes `summary`, `ai_tags`
/// and `summary_generated`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub open_access_url: Option<String>,
    pub summary: Option<String>,
    pub ai_tags: Option<Vec<String>>,
    pub summary_generated: bool,
}

impl WorkItem {
    /// Create an item with only an identifier set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the stored abstract.
    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.abstract_text = Some(text.into());
        self
    }

    /// Set the open-access document URL.
    pub fn with_open_access_url(mut self, url: impl Into<String>) -> Self {
        self.open_access_url = Some(url.into());
        self
    }

    /// Whether the backfill pass should consider this item.
    ///
    /// Matches the store-side filter: no summary, flag unset, non-empty abstract.
    pub fn needs_summary(&self) -> bool {
        self.summary.is_none()
            && !self.summary_generated
            && self
                .abstract_text
                .as_deref()
                .is_some_and(|a| !a.is_empty())
    }
}

/// Summary and tags extracted from raw model output. Never persisted as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSummary {
    pub summary: String,
    /// At most 8 non-empty, trimmed tags in model order.
    pub tags: Vec<String>,
}
