//! # papertrail-jobs
//!
//! Summary job processing for papertrail.
//!
//! This crate provides:
//! - [`SafeFetcher`]: SSRF-resistant document fetching
//! - [`PdfTextExtractor`]: PDF text layer extraction
//! - [`ContentResolver`]: document text with abstract fallback
//! - [`SummaryHandler`]: resolve, summarize and parse one job
//! - [`run_backfill`]: low-priority jobs for unsummarized works
//! - [`SummaryWorker`]: the sequential claim/process loop
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use papertrail_jobs::{SummaryWorker, WorkerConfig};
//!
//! let worker = SummaryWorker::new(queue, handler, WorkerConfig::from_env());
//! let handle = worker.start();
//!
//! let mut events = handle.events();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await?;
//! handle.join().await?;
//! ```

pub mod backfill;
pub mod extraction;
pub mod fetch;
pub mod handler;
pub mod resolver;
pub mod worker;

// Re-export core types
pub use papertrail_core::*;

pub use backfill::run_backfill;
pub use extraction::PdfTextExtractor;
pub use fetch::{
    FetchConfig, FetchError, HostResolver, PolicyResolver, SafeFetcher, StaticResolver,
    SystemResolver, UrlPolicy, UrlRejection,
};
pub use handler::{
    FailureKind, JobFailure, JobHandler, JobResult, SummaryHandler, NO_TEXT_AVAILABLE,
};
pub use resolver::{ContentResolver, ResolvedText, TextSource};
pub use worker::{SummaryWorker, Sleeper, Tick, TokioSleeper, WorkerConfig, WorkerEvent, WorkerHandle};
