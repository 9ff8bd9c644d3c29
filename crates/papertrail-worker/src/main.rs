//! papertrail-worker: summarizes papers in the background.
//!
//! Drains the `ai_jobs` queue, summarizes each work's open-access document
//! (or its abstract) with a local Ollama model, and writes the summary and
//! tags back. While idle it periodically queues low-priority jobs for works
//! that were never summarized.

mod commands;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use papertrail_core::{defaults, JobQueue};
use papertrail_db::{Database, PoolConfig};
use papertrail_inference::{OllamaClient, OllamaConfig, PromptTemplates};
use papertrail_jobs::{
    run_backfill, ContentResolver, FetchConfig, PdfTextExtractor, SafeFetcher, SummaryHandler,
    SummaryWorker, WorkerConfig,
};

#[derive(Parser)]
#[command(name = "papertrail-worker")]
#[command(author, version, about = "AI summary worker for papertrail")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker loop until interrupted (default)
    Run,

    /// Run one backfill pass and exit
    Backfill,

    /// Request a summary for a work
    Enqueue {
        /// Work identifier (e.g. W2741809807)
        work_id: String,

        /// Job priority, higher runs first
        #[arg(short, long, default_value_t = defaults::ON_DEMAND_PRIORITY)]
        priority: i32,
    },

    /// Show the summary state of a work
    Status {
        /// Work identifier (e.g. W2741809807)
        work_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "papertrail=info")
    let _file_guard = init_logging();

    let run_migrations = std::env::var("RUN_MIGRATIONS")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);

    info!(subsystem = "worker", "Connecting to database...");
    let db = Database::connect_with_config(&PoolConfig::from_env())
        .await
        .context("failed to connect to database")?;
    info!(subsystem = "worker", "Database connected");

    if run_migrations {
        info!(subsystem = "worker", "Running database migrations...");
        db.migrate().await.context("failed to run migrations")?;
        info!(subsystem = "worker", "Database migrations complete");
    }

    let queue: Arc<dyn JobQueue> = Arc::new(db.jobs.clone());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_worker(queue).await,
        Commands::Backfill => {
            let config = WorkerConfig::from_env();
            let enqueued = run_backfill(queue.as_ref(), config.backfill_batch_size).await?;
            println!("Enqueued {} job(s)", enqueued);
            Ok(())
        }
        Commands::Enqueue { work_id, priority } => {
            let outcome = commands::request_summary(queue.as_ref(), &work_id, priority).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Commands::Status { work_id } => {
            let status = commands::summary_status(queue.as_ref(), &work_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}

/// Install the tracing subscriber. The returned guard flushes file output on drop.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "papertrail_worker=info,papertrail_jobs=info,papertrail_inference=info,papertrail_db=info"
            .into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("papertrail-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

async fn run_worker(queue: Arc<dyn JobQueue>) -> anyhow::Result<()> {
    let prompts = PromptTemplates::from_env().context("failed to load prompt templates")?;
    let model = OllamaClient::new(OllamaConfig::from_env(), prompts)?;
    if !model.health_check().await {
        warn!(
            subsystem = "inference",
            base_url = %model.config().base_url,
            "Ollama not reachable at startup, jobs will fail until it is"
        );
    }

    let extractor = PdfTextExtractor::new();
    if !extractor.health_check().await {
        warn!(
            subsystem = "jobs",
            component = "extraction",
            "pdftotext not found, documents will fall back to abstracts"
        );
    }

    let max_chars = std::env::var("MAX_TEXT_CHARS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(defaults::MAX_TEXT_CHARS);
    let fetcher = SafeFetcher::new(FetchConfig::from_env())?;
    let resolver = ContentResolver::new(Arc::new(fetcher), Arc::new(extractor))
        .with_max_chars(max_chars);
    let handler = SummaryHandler::new(queue.clone(), resolver, Arc::new(model));

    let worker = SummaryWorker::new(queue, Arc::new(handler), WorkerConfig::from_env());
    let handle = worker.start();
    info!(subsystem = "worker", "Summary worker running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!(subsystem = "worker", "Shutdown requested, finishing current job");

    handle.shutdown().await?;
    handle.join().await?;
    info!(subsystem = "worker", "Shutdown complete");
    Ok(())
}
