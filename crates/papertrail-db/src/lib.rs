//! # papertrail-db
//!
//! Job stores for the papertrail summary worker.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgJobQueue`], the PostgreSQL store over `ai_jobs` and `works`
//! - [`MemoryJobQueue`], an in-memory store with the same claim protocol
//!
//! ## Example
//!
//! ```rust,ignore
//! use papertrail_db::{Database, JobQueue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/papertrail").await?;
//!     let job_id = db.jobs.enqueue("W2741809807", 10, None).await?;
//!     println!("Queued job: {}", job_id);
//!     Ok(())
//! }
//! ```
pub mod jobs;
pub mod memory;
pub mod pool;

// Re-export core types
pub use papertrail_core::*;

pub use jobs::PgJobQueue;
pub use memory::{ManualClock, MemoryJobQueue};
pub use pool::{create_pool, PoolConfig};

/// Database handle bundling the pool and the job store built on it.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Summary job queue.
    pub jobs: PgJobQueue,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobQueue::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(&PoolConfig::new(url)).await
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(config: &PoolConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
