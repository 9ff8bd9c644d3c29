//! In-memory job store.
//!
//! Implements [`JobQueue`] with the same claim protocol as the PostgreSQL
//! store (select a candidate, then compare-and-swap its status), so
//! orchestration logic can be exercised without a database. Also useful for
//! local dry runs of the worker.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use papertrail_core::{
    truncate_error, Clock, Error, Job, JobQueue, JobStatus, Result, SystemClock, WorkItem,
};

#[derive(Default)]
struct State {
    /// Jobs in insertion order.
    jobs: Vec<Job>,
    works: HashMap<String, WorkItem>,
    failing_ops: HashSet<&'static str>,
}

/// In-memory [`JobQueue`] for tests and local runs.
#[derive(Clone)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobQueue {
    /// Create an empty store using wall-clock timestamps.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store with an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave State half-written in
        // a way later readers care about.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self, op: &'static str) -> Result<()> {
        if self.lock().failing_ops.contains(op) {
            return Err(Error::Internal(format!("store unavailable during {}", op)));
        }
        Ok(())
    }

    /// Insert or replace a work item.
    pub fn insert_work(&self, work: WorkItem) {
        self.lock().works.insert(work.id.clone(), work);
    }

    /// Make every call of the named operation (e.g. `"claim_next"`) fail.
    pub fn fail_on(&self, op: &'static str) {
        self.lock().failing_ops.insert(op);
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.lock().failing_ops.clear();
    }

    /// Snapshot of all jobs in insertion order.
    pub fn jobs(&self) -> Vec<Job> {
        self.lock().jobs.clone()
    }

    /// Snapshot of all jobs for one work.
    pub fn jobs_for_work(&self, work_id: &str) -> Vec<Job> {
        self.lock()
            .jobs
            .iter()
            .filter(|j| j.work_id == work_id)
            .cloned()
            .collect()
    }

    /// First step of a claim: the pending job that should run next.
    ///
    /// Ordered by priority descending, then `created_at` ascending; ties keep
    /// insertion order.
    pub fn peek_next_pending(&self) -> Option<Job> {
        let state = self.lock();
        let mut best: Option<&Job> = None;
        for job in state.jobs.iter().filter(|j| j.status == JobStatus::Pending) {
            best = match best {
                None => Some(job),
                Some(current)
                    if job.priority > current.priority
                        || (job.priority == current.priority
                            && job.created_at < current.created_at) =>
                {
                    Some(job)
                }
                keep => keep,
            };
        }
        best.cloned()
    }

    /// Second step of a claim: move `job_id` to processing only if it is
    /// still pending. Returns `None` when another claimant got there first.
    pub fn try_mark_processing(&self, job_id: Uuid) -> Option<Job> {
        let now = self.clock.now();
        let mut state = self.lock();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Pending)?;
        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        Some(job.clone())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn claim_next(&self) -> Result<Option<Job>> {
        self.check_available("claim_next")?;
        let Some(candidate) = self.peek_next_pending() else {
            return Ok(None);
        };
        Ok(self.try_mark_processing(candidate.id))
    }

    async fn complete(&self, job_id: Uuid, summary: &str, tags: &[String]) -> Result<()> {
        self.check_available("complete")?;
        let now = self.clock.now();
        let mut state = self.lock();

        let work_id = state
            .jobs
            .iter()
            .find(|j| j.id == job_id && j.status == JobStatus::Processing)
            .map(|j| j.work_id.clone())
            .ok_or_else(|| {
                Error::Job(format!("Job {} is not processing, cannot complete", job_id))
            })?;

        // Both writes happen under one lock, mirroring the single transaction
        // of the PostgreSQL store.
        let work = state
            .works
            .entry(work_id.clone())
            .or_insert_with(|| WorkItem::new(work_id));
        work.summary = Some(summary.to_string());
        work.ai_tags = Some(tags.to_vec());
        work.summary_generated = true;

        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(now);
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.check_available("fail")?;
        let now = self.clock.now();
        let mut state = self.lock();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status.is_open())
            .ok_or_else(|| {
                Error::Job(format!(
                    "Job {} is missing or already terminal, cannot fail",
                    job_id
                ))
            })?;
        job.status = JobStatus::Failed;
        job.completed_at = Some(now);
        job.error = Some(truncate_error(error));
        Ok(())
    }

    async fn scan_unsummarized(&self, limit: i64) -> Result<Vec<WorkItem>> {
        self.check_available("scan_unsummarized")?;
        let state = self.lock();
        let mut items: Vec<WorkItem> = state
            .works
            .values()
            .filter(|w| w.needs_summary())
            .cloned()
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn has_open_job(&self, work_id: &str) -> Result<bool> {
        self.check_available("has_open_job")?;
        Ok(self
            .lock()
            .jobs
            .iter()
            .any(|j| j.work_id == work_id && j.status.is_open()))
    }

    async fn enqueue(
        &self,
        work_id: &str,
        priority: i32,
        source_url: Option<&str>,
    ) -> Result<Uuid> {
        self.check_available("enqueue")?;
        let job = Job {
            id: Uuid::now_v7(),
            work_id: work_id.to_string(),
            source_url: source_url.map(String::from),
            priority,
            status: JobStatus::Pending,
            created_at: self.clock.now(),
            started_at: None,
            completed_at: None,
            error: None,
        };
        let id = job.id;
        self.lock().jobs.push(job);
        Ok(id)
    }

    async fn work_abstract(&self, work_id: &str) -> Result<Option<String>> {
        self.check_available("work_abstract")?;
        Ok(self
            .lock()
            .works
            .get(work_id)
            .and_then(|w| w.abstract_text.clone()))
    }

    async fn get_work(&self, work_id: &str) -> Result<Option<WorkItem>> {
        self.check_available("get_work")?;
        Ok(self.lock().works.get(work_id).cloned())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        self.check_available("get")?;
        Ok(self.lock().jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn latest_job_for_work(&self, work_id: &str) -> Result<Option<Job>> {
        self.check_available("latest_job_for_work")?;
        // Later insertions win ties on created_at.
        Ok(self
            .lock()
            .jobs
            .iter()
            .filter(|j| j.work_id == work_id)
            .fold(None::<&Job>, |latest, job| match latest {
                Some(l) if l.created_at > job.created_at => Some(l),
                _ => Some(job),
            })
            .cloned())
    }
}

/// Manually advanced clock for deterministic timestamps in tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at the given instant.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
