//! Backfill: queue low-priority jobs for works that were never summarized.

use std::time::Instant;

use tracing::{debug, info};

use papertrail_core::{defaults, JobQueue, Result};

/// Enqueue a job for each unsummarized work (at most `limit`) that has no
/// pending or processing job. Returns the number of jobs enqueued.
pub async fn run_backfill(queue: &dyn JobQueue, limit: i64) -> Result<usize> {
    let start = Instant::now();
    let candidates = queue.scan_unsummarized(limit).await?;

    let mut enqueued = 0;
    for work in &candidates {
        if queue.has_open_job(&work.id).await? {
            debug!(
                subsystem = "jobs",
                component = "backfill",
                work_id = %work.id,
                "Skipping work with open job"
            );
            continue;
        }
        queue
            .enqueue(
                &work.id,
                defaults::BACKFILL_PRIORITY,
                work.open_access_url.as_deref(),
            )
            .await?;
        enqueued += 1;
    }

    info!(
        subsystem = "jobs",
        component = "backfill",
        op = "run_backfill",
        candidates = candidates.len(),
        enqueued,
        duration_ms = start.elapsed().as_millis() as u64,
        "Backfill pass finished"
    );
    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use papertrail_core::{JobStatus, WorkItem};
    use papertrail_db::MemoryJobQueue;

    #[tokio::test]
    async fn test_backfill_enqueues_unsummarized_works() {
        let queue = MemoryJobQueue::new();
        queue.insert_work(
            WorkItem::new("W1")
                .with_abstract("one")
                .with_open_access_url("https://example.org/1.pdf"),
        );
        queue.insert_work(WorkItem::new("W2").with_abstract("two"));
        queue.insert_work(WorkItem::new("W3"));

        assert_eq!(run_backfill(&queue, 10).await.unwrap(), 2);

        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.priority == 0));
        assert!(jobs.iter().all(|j| j.status == JobStatus::Pending));

        let w1 = queue.jobs_for_work("W1");
        assert_eq!(w1[0].source_url.as_deref(), Some("https://example.org/1.pdf"));
        assert!(queue.jobs_for_work("W2")[0].source_url.is_none());
        assert!(queue.jobs_for_work("W3").is_empty());
    }

    #[tokio::test]
    async fn test_backfill_skips_works_with_open_jobs() {
        let queue = MemoryJobQueue::new();
        queue.insert_work(WorkItem::new("W1").with_abstract("one"));
        queue.insert_work(WorkItem::new("W2").with_abstract("two"));
        queue.enqueue("W1", 10, None).await.unwrap();

        assert_eq!(run_backfill(&queue, 10).await.unwrap(), 1);
        assert_eq!(queue.jobs_for_work("W1").len(), 1);
        assert_eq!(queue.jobs_for_work("W2").len(), 1);

        // Both works now have an open job; a second pass adds nothing.
        assert_eq!(run_backfill(&queue, 10).await.unwrap(), 0);
        assert_eq!(queue.jobs().len(), 2);
    }

    #[tokio::test]
    async fn test_backfill_skips_processing_but_not_failed() {
        let queue = MemoryJobQueue::new();
        queue.insert_work(WorkItem::new("W1").with_abstract("one"));
        queue.insert_work(WorkItem::new("W2").with_abstract("two"));

        queue.enqueue("W1", 0, None).await.unwrap();
        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.work_id, "W1");

        let failed = queue.enqueue("W2", 0, None).await.unwrap();
        queue.fail(failed, "boom").await.unwrap();

        assert_eq!(run_backfill(&queue, 10).await.unwrap(), 1);
        assert_eq!(queue.jobs_for_work("W1").len(), 1);
        assert_eq!(queue.jobs_for_work("W2").len(), 2);
    }

    #[tokio::test]
    async fn test_backfill_respects_limit() {
        let queue = MemoryJobQueue::new();
        for i in 0..25 {
            queue.insert_work(WorkItem::new(format!("W{}", i)).with_abstract("text"));
        }
        assert_eq!(run_backfill(&queue, 10).await.unwrap(), 10);
        assert_eq!(queue.jobs().len(), 10);
    }

    #[tokio::test]
    async fn test_backfill_propagates_store_failure() {
        let queue = MemoryJobQueue::new();
        queue.insert_work(WorkItem::new("W1").with_abstract("one"));
        queue.fail_on("enqueue");
        assert!(run_backfill(&queue, 10).await.is_err());
    }
}
