//! PostgreSQL job queue implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use papertrail_core::{truncate_error, Error, Job, JobQueue, JobStatus, Result, WorkItem};

const JOB_COLUMNS: &str = "id, work_id, source_url, priority, status, created_at, started_at, \
                           completed_at, error";

const WORK_COLUMNS: &str = "id, abstract, open_access_url, summary, ai_tags, \
                            COALESCE(summary_generated, false) AS summary_generated";

/// Works the backfill scan picks up. The `idx_works_unsummarized` partial
/// index uses the same predicate, so keep the two identical.
const UNSUMMARIZED_PREDICATE: &str = "summary IS NULL AND summary_generated IS NOT TRUE \
                                      AND abstract IS NOT NULL AND abstract <> ''";

/// PostgreSQL implementation of [`JobQueue`] over the `ai_jobs` and `works` tables.
///
/// Connect with a service-level role: the worker acts on behalf of every
/// user, so row-level security must not filter its queries.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: Pool<Postgres>,
}

impl PgJobQueue {
    /// Create a new PgJobQueue with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse an `ai_jobs` row into a Job.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let status: String = row.get("status");
        let status = JobStatus::parse(&status)
            .ok_or_else(|| Error::Job(format!("Unknown job status in database: {}", status)))?;

        Ok(Job {
            id: row.get("id"),
            work_id: row.get("work_id"),
            source_url: row.get("source_url"),
            priority: row.get("priority"),
            status,
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            error: row.get("error"),
        })
    }

    /// Parse a `works` row into a WorkItem.
    fn parse_work_row(row: sqlx::postgres::PgRow) -> WorkItem {
        WorkItem {
            id: row.get("id"),
            abstract_text: row.get("abstract"),
            open_access_url: row.get("open_access_url"),
            summary: row.get("summary"),
            ai_tags: row.get("ai_tags"),
            summary_generated: row.get("summary_generated"),
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn claim_next(&self) -> Result<Option<Job>> {
        let candidate: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM ai_jobs
             WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(job_id) = candidate else {
            return Ok(None);
        };

        // The status predicate makes this a compare-and-swap evaluated by
        // Postgres: only one concurrent claimant can match the pending row.
        let row = sqlx::query(&format!(
            "UPDATE ai_jobs
             SET status = 'processing', started_at = $1
             WHERE id = $2 AND status = 'pending'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(row).map(Some),
            None => {
                debug!(
                    subsystem = "db",
                    component = "job_queue",
                    op = "claim_next",
                    job_id = %job_id,
                    "Lost claim race, job taken by another worker"
                );
                Ok(None)
            }
        }
    }

    async fn complete(&self, job_id: Uuid, summary: &str, tags: &[String]) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let work_id: Option<String> = sqlx::query_scalar(
            "SELECT work_id FROM ai_jobs WHERE id = $1 AND status = 'processing' FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let Some(work_id) = work_id else {
            return Err(Error::Job(format!(
                "Job {} is not processing, cannot complete",
                job_id
            )));
        };

        sqlx::query(
            "UPDATE works SET summary = $1, ai_tags = $2, summary_generated = true WHERE id = $3",
        )
        .bind(summary)
        .bind(tags)
        .bind(&work_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("UPDATE ai_jobs SET status = 'completed', completed_at = $1 WHERE id = $2")
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE ai_jobs
             SET status = 'failed', completed_at = $1, error = $2
             WHERE id = $3 AND status IN ('pending', 'processing')",
        )
        .bind(Utc::now())
        .bind(truncate_error(error))
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::Job(format!(
                "Job {} is missing or already terminal, cannot fail",
                job_id
            )));
        }
        Ok(())
    }

    async fn scan_unsummarized(&self, limit: i64) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORK_COLUMNS} FROM works
             WHERE {UNSUMMARIZED_PREDICATE}
             ORDER BY id
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_work_row).collect())
    }

    async fn has_open_job(&self, work_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM ai_jobs
                 WHERE work_id = $1 AND status IN ('pending', 'processing')
             )",
        )
        .bind(work_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn enqueue(
        &self,
        work_id: &str,
        priority: i32,
        source_url: Option<&str>,
    ) -> Result<Uuid> {
        let job_id = Uuid::now_v7();

        sqlx::query(
            "INSERT INTO ai_jobs (id, work_id, source_url, priority, status, created_at)
             VALUES ($1, $2, $3, $4, 'pending', $5)",
        )
        .bind(job_id)
        .bind(work_id)
        .bind(source_url)
        .bind(priority)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(job_id)
    }

    async fn work_abstract(&self, work_id: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT abstract FROM works WHERE id = $1")
                .bind(work_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(value.flatten())
    }

    async fn get_work(&self, work_id: &str) -> Result<Option<WorkItem>> {
        let row = sqlx::query(&format!("SELECT {WORK_COLUMNS} FROM works WHERE id = $1"))
            .bind(work_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.map(Self::parse_work_row))
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM ai_jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(Self::parse_job_row).transpose()
    }

    async fn latest_job_for_work(&self, work_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ai_jobs
             WHERE work_id = $1
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(work_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_job_row).transpose()
    }
}
