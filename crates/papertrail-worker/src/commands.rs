//! Producer-side commands: request a summary and report its state.

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use papertrail_core::{Error, JobQueue, Result};

/// Whether `id` looks like a work identifier (`W` followed by digits).
pub fn is_valid_work_id(id: &str) -> bool {
    id.strip_prefix('W')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Result of a summary request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// The work already has a summary; nothing was queued.
    Completed {
        summary: String,
        ai_tags: Option<Vec<String>>,
    },
    /// A job for the work is pending or processing (newly created or not).
    Queued { job_id: Option<Uuid> },
}

/// Queue a summary job for `work_id` unless one is unnecessary.
pub async fn request_summary(
    queue: &dyn JobQueue,
    work_id: &str,
    priority: i32,
) -> Result<EnqueueOutcome> {
    if !is_valid_work_id(work_id) {
        return Err(Error::InvalidInput(format!("Invalid paper ID: {}", work_id)));
    }

    let work = queue
        .get_work(work_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("work {}", work_id)))?;

    if let Some(summary) = work.summary {
        return Ok(EnqueueOutcome::Completed {
            summary,
            ai_tags: work.ai_tags,
        });
    }

    if queue.has_open_job(work_id).await? {
        let job_id = queue
            .latest_job_for_work(work_id)
            .await?
            .filter(|job| job.status.is_open())
            .map(|job| job.id);
        return Ok(EnqueueOutcome::Queued { job_id });
    }

    let job_id = queue
        .enqueue(work_id, priority, work.open_access_url.as_deref())
        .await?;
    info!(
        subsystem = "worker",
        component = "cli",
        op = "enqueue",
        job_id = %job_id,
        work_id,
        priority,
        "Summary job queued"
    );
    Ok(EnqueueOutcome::Queued {
        job_id: Some(job_id),
    })
}

/// Summary state of one work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryStatus {
    /// `completed` when a summary exists, else the latest job status or `none`.
    pub status: String,
    pub summary: Option<String>,
    pub ai_tags: Option<Vec<String>>,
    pub error: Option<String>,
}

/// Report the summary state of `work_id`.
pub async fn summary_status(queue: &dyn JobQueue, work_id: &str) -> Result<SummaryStatus> {
    if !is_valid_work_id(work_id) {
        return Err(Error::InvalidInput(format!("Invalid paper ID: {}", work_id)));
    }

    let job = queue.latest_job_for_work(work_id).await?;
    let work = queue.get_work(work_id).await?;

    let (summary, ai_tags) = match work {
        Some(w) => (w.summary, w.ai_tags),
        None => (None, None),
    };
    let status = if summary.is_some() {
        "completed".to_string()
    } else {
        job.as_ref()
            .map(|j| j.status.as_str().to_string())
            .unwrap_or_else(|| "none".to_string())
    };

    Ok(SummaryStatus {
        status,
        summary,
        ai_tags,
        error: job.and_then(|j| j.error),
    })
}
