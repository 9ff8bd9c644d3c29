//! Trait seams the worker is assembled from.
//!
//! Each collaborator is injected as a trait object so tests can substitute an
//! in-memory store, a scripted model, or a fake extractor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Job, Result, WorkItem};

/// Transactional store holding summarization jobs and the works they target.
///
/// Exactly-one-claimant semantics rest entirely on [`JobQueue::claim_next`]:
/// the transition to `processing` must be a conditional update whose
/// "still pending" precondition is checked by the store itself.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Claim the highest-priority, oldest pending job.
    ///
    /// Selects one candidate (priority descending, then `created_at`
    /// ascending) and conditionally moves it to `processing`. Returns
    /// `Ok(None)` when the queue is empty or the candidate was claimed by
    /// another worker in between; the call never retries.
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Write the summary to the job's work item and mark the job completed.
    async fn complete(&self, job_id: Uuid, summary: &str, tags: &[String]) -> Result<()>;

    /// Mark a job failed, storing the message truncated to 500 characters.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Works with no summary, no `summary_generated` flag and a non-empty
    /// abstract, at most `limit` of them.
    async fn scan_unsummarized(&self, limit: i64) -> Result<Vec<WorkItem>>;

    /// Whether a pending or processing job references `work_id`.
    async fn has_open_job(&self, work_id: &str) -> Result<bool>;

    /// Insert a new pending job.
    async fn enqueue(&self, work_id: &str, priority: i32, source_url: Option<&str>)
        -> Result<Uuid>;

    /// The stored abstract of a work, if the work exists and has one.
    async fn work_abstract(&self, work_id: &str) -> Result<Option<String>>;

    /// Look up a work item.
    async fn get_work(&self, work_id: &str) -> Result<Option<WorkItem>>;

    /// Look up a job.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Most recently created job for a work, in any status.
    async fn latest_job_for_work(&self, work_id: &str) -> Result<Option<Job>>;
}

/// Language-model endpoint that turns document text into raw summary output.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Compose the summary prompt around `text` and return the raw response.
    async fn summarize(&self, text: &str) -> Result<String>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}

/// Opaque "bytes to text" conversion for fetched source documents.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the text layer from a document body.
    async fn extract_text(&self, data: &[u8]) -> Result<String>;
}

/// Time source, injectable so tests control timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
