//! Centralized default constants for the papertrail worker.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers; environment variables override the runtime-tunable ones.

// =============================================================================
// WORKER LOOP
// =============================================================================

/// Seconds to sleep when a poll finds no pending job.
pub const POLL_INTERVAL_SECS: u64 = 15;

/// Idle iterations between backfill passes (~60s at the default poll interval).
pub const BACKFILL_EVERY_IDLE_TICKS: u32 = 4;

/// Maximum work items examined by one backfill pass.
pub const BACKFILL_BATCH_SIZE: i64 = 10;

/// Priority assigned to jobs injected by the backfill pass.
pub const BACKFILL_PRIORITY: i32 = 0;

/// Priority assigned to jobs requested on demand for a single work.
pub const ON_DEMAND_PRIORITY: i32 = 10;

/// Maximum characters of a stored job error message.
pub const JOB_ERROR_MAX_CHARS: usize = 500;

/// Capacity of the worker event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// CONTENT
// =============================================================================

/// Maximum characters of extracted document text passed to the model.
pub const MAX_TEXT_CHARS: usize = 30_000;

/// Timeout for a single fetch request (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 60;

/// Maximum accepted response body size for a source document (50 MiB).
pub const FETCH_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Client identifier sent with every fetch request.
pub const FETCH_USER_AGENT: &str = "Papertrail-AI-Worker/1.0";

/// Timeout for each `pdftotext` invocation (seconds).
pub const EXTRACTION_CMD_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama endpoint.
pub const OLLAMA_URL: &str = "http://localhost:11434";

/// Default summarization model.
pub const GEN_MODEL: &str = "llama3.1:8b";

/// Timeout for a summarization request (seconds).
pub const GEN_TIMEOUT_SECS: u64 = 300;

/// Placeholder substituted with the document text in the user template.
pub const PROMPT_TEXT_PLACEHOLDER: &str = "{text}";

/// Maximum number of tags kept from a model response.
pub const MAX_TAGS: usize = 8;

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL when `DATABASE_URL` is unset.
pub const DATABASE_URL: &str = "postgres://localhost/papertrail";

/// Default pool size for a worker process (one job in flight at a time).
pub const DB_MAX_CONNECTIONS: u32 = 5;
