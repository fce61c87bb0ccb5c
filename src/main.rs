//! Sweeper - local harness for the scan and cleanup engine.
//!
//! Runs one engine operation per invocation against a YAML run request and
//! prints the outcome as YAML on stdout. Logs go to `logs/` (and stderr).
//!
//! # Commands
//!
//! - `sweeper scan <request>`: measure every category in the request
//! - `sweeper files <request> --category <id>`: list deletable files of one category
//! - `sweeper clean <request>`: clean categories, specific files, or both,
//!   depending on what the request contains
//!
//! # Configuration
//!
//! Engine tunables come from `<config-dir>/sweeper.yaml`, overridable with
//! `SWEEPER_*` environment variables (e.g. `SWEEPER_MAX_CONCURRENCY=2`).
//!
//! Ctrl-C cancels the running operation cooperatively; results finished
//! before the cancel are still printed.

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use sweeper::models::{CleanupRequest, CleanupResult};
use sweeper::services::{CleanupOrchestrator, progress_channel};
use sweeper::{APP_NAME, ConfigManager, VERSION};

/// Sweeper - bounded-concurrency disk scanning and cleanup.
#[derive(Debug, Parser)]
#[command(name = "sweeper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding sweeper.yaml.
    #[arg(long, env = "SWEEPER_CONFIG_DIR", default_value = "sweeper-data")]
    config_dir: Utf8PathBuf,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Measure disk usage of every category in the request.
    Scan {
        /// YAML run request.
        request: Utf8PathBuf,
    },
    /// List the deletable files of one category.
    Files {
        /// YAML run request.
        request: Utf8PathBuf,
        /// Category id to list.
        #[arg(long)]
        category: String,
    },
    /// Clean categories and/or specific files from the request.
    Clean {
        /// YAML run request.
        request: Utf8PathBuf,
        /// Force a dry run regardless of the request options.
        #[arg(long)]
        dry_run: bool,
    },
}

/// What `clean` prints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanReport {
    cancelled: bool,
    freed_space: u64,
    results: Vec<CleanupResult>,
}

impl CleanReport {
    fn new(results: Vec<CleanupResult>, cancelled: bool) -> Self {
        Self {
            cancelled,
            freed_space: results.iter().map(|r| r.freed_space).sum(),
            results,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let mut config = config_manager.load_engine_config()?;
    if cli.debug {
        config.logging.debug = true;
    }

    // Guard must live until exit so buffered lines are flushed
    let _log_guard = sweeper::logging::setup_logging(&config.logging)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sweeper-worker")
        .build()
        .context("Failed to build tokio runtime")?;

    let orchestrator = Arc::new(CleanupOrchestrator::new(config));
    let result = runtime.block_on(run(cli.command, &config_manager, Arc::clone(&orchestrator)));

    orchestrator.metrics().log_summary();
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    tracing::info!("Shutdown complete");

    result
}

async fn run(
    command: Commands,
    config_manager: &ConfigManager,
    orchestrator: Arc<CleanupOrchestrator>,
) -> Result<()> {
    let cancel_target = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling...");
            cancel_target.cancel();
        }
    });

    match command {
        Commands::Scan { request } => {
            let request = config_manager.load_request(&request)?;
            let summary = orchestrator
                .scan_categories(request.categories, &request.options)
                .await?;
            print_yaml(&summary)
        }
        Commands::Files { request, category } => {
            let request = config_manager.load_request(&request)?;
            let Some(category) = request.categories.iter().find(|c| c.id == category) else {
                bail!("Category {} is not in the request", category);
            };
            let files = orchestrator
                .files_for_category(category, &request.options)
                .await?;
            print_yaml(&files)
        }
        Commands::Clean { request, dry_run } => {
            let request = config_manager.load_request(&request)?;
            let mut options = request.options;
            options.dry_run |= dry_run;

            let Some(cleanup) = CleanupRequest::from_parts(request.categories, request.files) else {
                bail!("Request contains neither categories nor files");
            };

            let (on_progress, mut progress_rx) = progress_channel();
            let progress_logger = tokio::spawn(async move {
                while let Some(progress) = progress_rx.recv().await {
                    tracing::info!(
                        "[{}] {:5.1}% {} files, {} bytes {}",
                        progress.category_name,
                        progress.percentage,
                        progress.processed_files,
                        progress.freed_space,
                        progress.current_file
                    );
                }
            });

            let outcome = orchestrator
                .cleanup_with_specific_files(cleanup, &options, on_progress)
                .await;
            // The callback is dropped with the run, which ends the logger
            let _ = progress_logger.await;

            match outcome {
                Ok(results) => print_yaml(&CleanReport::new(results, false)),
                Err(aborted) if aborted.is_cancelled() => {
                    print_yaml(&CleanReport::new(aborted.completed, true))?;
                    bail!("Cleanup cancelled")
                }
                Err(aborted) => Err(aborted.into()),
            }
        }
    }
}

fn print_yaml<T: Serialize>(value: &T) -> Result<()> {
    let yaml = serde_yaml_ng::to_string(value).context("Failed to serialize output to YAML")?;
    print!("{}", yaml);
    Ok(())
}
