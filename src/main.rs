//! tree-tester - Correctness and Stress Tester for Hierarchical Storage
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tree_tester::config::{CliArgs, Operation, RunConfig};
use tree_tester::hierarchy::HierarchyOptions;
use tree_tester::progress::{print_header, print_summary, ProgressTicker, ProgressTracker};
use tree_tester::tree::{BuildStats, TreeBuilder, TreeRun, TreeValidator};
use tree_tester::{LocalBackend, StorageBackend, TestStatus};

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the resulting status tree is fully ok
fn run() -> Result<bool> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = RunConfig::from_args(args).context("Invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.io_threads)
        .thread_name("tree-tester-io")
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    // The whole namespace is reachable from `/`; the target names the base
    let backend: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new("/", config.connections));

    if config.show_progress {
        print_header(
            config.operation.name(),
            &config.target.to_string(),
            config.connections,
            config.window,
        );
    }

    let tracker = Arc::new(match config.operation {
        Operation::Build => ProgressTracker::new(config.nfiles),
        Operation::Validate => ProgressTracker::unbounded(),
    });

    let mut stats: Option<Arc<BuildStats>> = None;
    let run = match config.operation {
        Operation::Build => {
            let options = HierarchyOptions::new(
                config.target.path.clone(),
                config.seed,
                config.depth,
                config.nfiles,
            );
            let builder = TreeBuilder::new(backend, runtime.handle().clone(), options)
                .connections(config.connections)
                .window(config.window)
                .progress(Arc::clone(&tracker));
            stats = Some(builder.stats());
            builder.start().context("Failed to start builder")?
        }
        Operation::Validate => {
            TreeValidator::new(backend, runtime.handle().clone(), &config.target.path)
                .connections(config.connections)
                .progress(Arc::clone(&tracker))
                .start()
                .context("Failed to start validator")?
        }
    };

    // Setup signal handler for graceful shutdown
    let token = run.token();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, draining outstanding operations...");
        token.request_stop();
    })
    .context("Failed to set signal handler")?;

    let status = wait_with_progress(run, &config, tracker)?;

    let snapshot = stats.map(|s| s.snapshot());
    print_summary(&status, snapshot.as_ref());

    if let Some(path) = &config.report_path {
        write_report(path, &status)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    if !status.ok() {
        warn!(defects = status.error_count(), "Run finished with defects");
    }
    Ok(status.ok())
}

fn wait_with_progress(
    run: TreeRun,
    config: &RunConfig,
    tracker: Arc<ProgressTracker>,
) -> Result<TestStatus> {
    let ticker = if config.show_progress {
        let description = match config.operation {
            Operation::Build => format!("Building {}", config.target.path),
            Operation::Validate => format!("Validating {}", config.target.path),
        };
        Some(ProgressTicker::start(tracker, description).context("Failed to start progress display")?)
    } else {
        None
    };

    let status = run.wait().context("Worker failed");

    if let Some(ticker) = ticker {
        ticker.stop();
    }
    status
}

fn write_report(path: &Path, status: &TestStatus) -> tree_tester::Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, status)?;
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("tree_tester=debug,warn")
    } else {
        EnvFilter::new("tree_tester=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
