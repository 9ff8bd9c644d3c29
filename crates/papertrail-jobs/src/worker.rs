//! Summary worker loop.
//!
//! One job at a time: claim, process, record the outcome, and claim again
//! immediately. When the queue is empty the worker counts an idle tick, runs
//! a backfill pass on every fourth one, and sleeps for the poll interval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use papertrail_core::{
    defaults, truncate_error, Clock, Error, Job, JobQueue, Result, SystemClock,
};

use crate::backfill::run_backfill;
use crate::handler::{FailureKind, JobFailure, JobHandler, JobResult};

/// Configuration for the summary worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Whether idle ticks trigger backfill passes.
    pub batch_enabled: bool,
    /// Works scanned per backfill pass.
    pub backfill_batch_size: i64,
    /// Idle ticks between backfill passes.
    pub backfill_every_idle_ticks: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(defaults::POLL_INTERVAL_SECS),
            batch_enabled: true,
            backfill_batch_size: defaults::BACKFILL_BATCH_SIZE,
            backfill_every_idle_ticks: defaults::BACKFILL_EVERY_IDLE_TICKS,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `POLL_INTERVAL` | `15` | Seconds to sleep when the queue is empty |
    /// | `BATCH_ENABLED` | `true` | Run backfill passes while idle |
    /// | `BACKFILL_BATCH_SIZE` | `10` | Works scanned per backfill pass |
    pub fn from_env() -> Self {
        let poll_interval_secs = std::env::var("POLL_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::POLL_INTERVAL_SECS);

        let batch_enabled = std::env::var("BATCH_ENABLED")
            .map(|v| {
                let v = v.to_ascii_lowercase();
                v != "false" && v != "0" && v != "no"
            })
            .unwrap_or(true);

        let backfill_batch_size = std::env::var("BACKFILL_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::BACKFILL_BATCH_SIZE)
            .max(1);

        Self::default()
            .with_poll_interval(Duration::from_secs(poll_interval_secs))
            .with_batch_enabled(batch_enabled)
            .with_backfill_batch_size(backfill_batch_size)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_enabled(mut self, enabled: bool) -> Self {
        self.batch_enabled = enabled;
        self
    }

    pub fn with_backfill_batch_size(mut self, size: i64) -> Self {
        self.backfill_batch_size = size;
        self
    }

    /// Set the backfill cadence. Zero is treated as one.
    pub fn with_backfill_every(mut self, idle_ticks: u32) -> Self {
        self.backfill_every_idle_ticks = idle_ticks.max(1);
        self
    }
}

/// Event emitted by the summary worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Worker started.
    WorkerStarted,
    /// A job was claimed and is being processed.
    JobStarted { job_id: Uuid, work_id: String },
    /// A summary was written back.
    JobCompleted {
        job_id: Uuid,
        work_id: String,
        tag_count: usize,
    },
    /// A job was marked failed.
    JobFailed {
        job_id: Uuid,
        work_id: String,
        kind: FailureKind,
        error: String,
    },
    /// A backfill pass finished.
    BackfillCompleted { enqueued: usize },
    /// Worker stopped.
    WorkerStopped,
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A job was claimed and finished, successfully or not.
    Processed { job_id: Uuid, completed: bool },
    /// The queue was empty.
    Idle { backfill_ran: bool },
    /// The store failed during claim; nothing was processed.
    ClaimFailed,
}

/// Pause between idle polls.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    ///
    /// A job in progress is finished first; an idle sleep is cut short.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the worker task to exit.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Worker task failed: {}", e)))
    }
}

/// Sequential summary worker.
pub struct SummaryWorker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<WorkerEvent>,
    idle_ticks: u32,
}

impl SummaryWorker {
    /// Create a worker with the tokio timer and wall clock.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_CHANNEL_CAPACITY);
        Self {
            queue,
            handler,
            config,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            event_tx,
            idle_ticks: 0,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Subscribe to worker events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Idle ticks counted since the last backfill pass.
    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    /// Start the worker and return a handle for control.
    pub fn start(mut self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Loop until a shutdown signal arrives or every handle is dropped.
    async fn run(&mut self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            subsystem = "jobs",
            component = "worker",
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_enabled = self.config.batch_enabled,
            "Summary worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => {
                    info!("Summary worker received shutdown signal");
                    break;
                }
                Err(TryRecvError::Empty) => {}
            }

            if let Tick::Processed { .. } = self.run_once().await {
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Summary worker received shutdown signal");
                    break;
                }
                _ = self.sleeper.sleep(self.config.poll_interval) => {}
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", component = "worker", "Summary worker stopped");
    }

    /// One iteration without the idle sleep: claim and process a job, or
    /// count an idle tick and backfill when due.
    pub async fn run_once(&mut self) -> Tick {
        match self.queue.claim_next().await {
            Ok(Some(job)) => {
                let job_id = job.id;
                let completed = self.process(job).await;
                Tick::Processed { job_id, completed }
            }
            Ok(None) => {
                self.idle_ticks += 1;
                let mut backfill_ran = false;
                if self.idle_ticks >= self.config.backfill_every_idle_ticks {
                    // Reset first so a failing pass keeps the cadence.
                    self.idle_ticks = 0;
                    if self.config.batch_enabled {
                        self.backfill().await;
                        backfill_ran = true;
                    } else {
                        debug!(
                            subsystem = "jobs",
                            component = "worker",
                            "Backfill due but disabled"
                        );
                    }
                }
                Tick::Idle { backfill_ran }
            }
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    op = "claim_next",
                    error = %e,
                    "Failed to claim job"
                );
                Tick::ClaimFailed
            }
        }
    }

    /// Run the handler and persist its result. Returns whether the job completed.
    async fn process(&self, job: Job) -> bool {
        let started = self.clock.now();
        info!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job.id,
            work_id = %job.work_id,
            priority = job.priority,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id: job.id,
            work_id: job.work_id.clone(),
        });

        // Run the handler in its own task so a panic fails this job instead
        // of the worker.
        let handler = self.handler.clone();
        let task_job = job.clone();
        let result = tokio::spawn(async move { handler.execute(&task_job).await })
            .await
            .unwrap_or_else(|e| {
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job.id,
                    work_id = %job.work_id,
                    error = ?e,
                    "Job task panicked"
                );
                JobResult::Failed(JobFailure::new(
                    FailureKind::Internal,
                    format!("Job task panicked: {}", panic_message(e)),
                ))
            });

        let failure = match result {
            JobResult::Completed(parsed) => {
                match self
                    .queue
                    .complete(job.id, &parsed.summary, &parsed.tags)
                    .await
                {
                    Ok(()) => {
                        info!(
                            subsystem = "jobs",
                            component = "worker",
                            job_id = %job.id,
                            work_id = %job.work_id,
                            summary_chars = parsed.summary.chars().count(),
                            tag_count = parsed.tags.len(),
                            duration_ms = (self.clock.now() - started).num_milliseconds(),
                            "Job completed successfully"
                        );
                        let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                            job_id: job.id,
                            work_id: job.work_id.clone(),
                            tag_count: parsed.tags.len(),
                        });
                        return true;
                    }
                    Err(e) => JobFailure::new(FailureKind::Store, e.to_string()),
                }
            }
            JobResult::Failed(failure) => failure,
        };

        self.record_failure(&job, failure, started).await;
        false
    }

    async fn record_failure(&self, job: &Job, failure: JobFailure, started: DateTime<Utc>) {
        let message = truncate_error(&failure.message);
        warn!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job.id,
            work_id = %job.work_id,
            kind = %failure.kind,
            error = %message,
            duration_ms = (self.clock.now() - started).num_milliseconds(),
            "Job failed"
        );

        if let Err(e) = self.queue.fail(job.id, &message).await {
            // Nothing else can move the job out of processing.
            error!(
                subsystem = "jobs",
                component = "worker",
                job_id = %job.id,
                error = %e,
                "Failed to record job failure, job left in processing"
            );
        }

        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id: job.id,
            work_id: job.work_id.clone(),
            kind: failure.kind,
            error: message,
        });
    }

    async fn backfill(&self) {
        match run_backfill(self.queue.as_ref(), self.config.backfill_batch_size).await {
            Ok(enqueued) => {
                let _ = self.event_tx.send(WorkerEvent::BackfillCompleted { enqueued });
            }
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    op = "backfill",
                    error = %e,
                    "Backfill pass failed"
                );
            }
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
