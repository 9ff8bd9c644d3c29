//! Summary job handler.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use papertrail_core::{Job, JobQueue, ModelClient, ParsedSummary};
use papertrail_inference::parse_model_output;

use crate::resolver::ContentResolver;

/// Error message stored on jobs whose work has no usable text.
pub const NO_TEXT_AVAILABLE: &str = "No text available for summarization";

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Neither the source document nor the abstract yielded text.
    NoTextAvailable,
    /// The model call failed or returned an unusable envelope.
    ModelInvocation,
    /// The store could not be read or written.
    Store,
    /// The handler task panicked or was cancelled.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NoTextAvailable => "no_text_available",
            FailureKind::ModelInvocation => "model_invocation",
            FailureKind::Store => "store",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed job: the kind plus the message to store on the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Summary produced; ready to be written back.
    Completed(ParsedSummary),
    /// Job cannot succeed; terminal.
    Failed(JobFailure),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Produce a result for a claimed job. Must not write job status.
    async fn execute(&self, job: &Job) -> JobResult;
}

/// Resolves text, asks the model for a summary and parses the reply.
pub struct SummaryHandler {
    queue: Arc<dyn JobQueue>,
    resolver: ContentResolver,
    model: Arc<dyn ModelClient>,
}

impl SummaryHandler {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        resolver: ContentResolver,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            queue,
            resolver,
            model,
        }
    }
}

#[async_trait]
impl JobHandler for SummaryHandler {
    async fn execute(&self, job: &Job) -> JobResult {
        let resolved = match self
            .resolver
            .resolve_text(self.queue.as_ref(), &job.work_id, job.source_url.as_deref())
            .await
        {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                return JobResult::Failed(JobFailure::new(
                    FailureKind::NoTextAvailable,
                    NO_TEXT_AVAILABLE,
                ))
            }
            Err(e) => return JobResult::Failed(JobFailure::new(FailureKind::Store, e.to_string())),
        };

        debug!(
            subsystem = "jobs",
            component = "summary_handler",
            job_id = %job.id,
            work_id = %job.work_id,
            source = resolved.source.as_str(),
            text_chars = resolved.text.chars().count(),
            model = self.model.model_name(),
            "Requesting summary"
        );

        match self.model.summarize(&resolved.text).await {
            Ok(raw) => JobResult::Completed(parse_model_output(&raw)),
            Err(e) => JobResult::Failed(JobFailure::new(FailureKind::ModelInvocation, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::NoTextAvailable.to_string(), "no_text_available");
        assert_eq!(FailureKind::ModelInvocation.to_string(), "model_invocation");
        assert_eq!(FailureKind::Store.to_string(), "store");
        assert_eq!(FailureKind::Internal.to_string(), "internal");
    }

    #[test]
    fn test_job_failure_new() {
        let failure = JobFailure::new(FailureKind::NoTextAvailable, NO_TEXT_AVAILABLE);
        assert_eq!(failure.kind, FailureKind::NoTextAvailable);
        assert_eq!(failure.message, "No text available for summarization");
    }
}
