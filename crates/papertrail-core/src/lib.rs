//! # papertrail-core
//!
//! Core types, traits, and defaults for the papertrail summary worker.
//!
//! This crate provides the data structures shared by every other crate
//! (jobs, work items, parsed model output), the error type, and the trait
//! seams the worker is assembled from: the job store, the model client, the
//! text extractor, and the clock.
//!
//! ## Log Level Contract
//!
//! Every crate logs with `tracing` and structured fields (`subsystem`,
//! `component`, `op`, `job_id`, `work_id`, `url`, `duration_ms`).
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Store failure that leaves a job stuck, loop-level fault |
//! | WARN  | Fallback applied (unsafe URL, fetch failure), failed job |
//! | INFO  | Lifecycle events, job completions, backfill counts |
//! | DEBUG | Decision points, lost claim races, config choices |

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{truncate_error, Error, Result};
pub use models::*;
pub use traits::*;
