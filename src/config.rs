//! Configuration types for tree-tester
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Target location parsing

use crate::backend::{trim_trailing_slashes, DEFAULT_CONNECTIONS};
use crate::error::ConfigError;
use crate::tree::DEFAULT_WINDOW;
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Maximum reasonable number of logical connections
const MAX_CONNECTIONS: usize = 1024;

/// Smallest usable in-flight window
const MIN_WINDOW: usize = 1;

/// Regex for parsing target locations
static TARGET_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: file:///abs/path or /abs/path
    Regex::new(r"^(?:file://)?(/\S*)$").expect("Invalid target regex")
});

/// Stress and integrity tester for hierarchical storage
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tree-tester",
    version,
    about = "Build and validate deterministic, self-checking directory trees",
    long_about = "Synthesizes a pseudo-random directory tree in which every directory carries a \
                  checksummed MANIFEST of its children and every file carries its own path and \
                  checksum. A tree built with --build can later be re-derived and verified with \
                  --validate.",
    after_help = "EXAMPLES:\n    \
        tree-tester tree --build /mnt/storage/base --seed 7 --depth 6 --nfiles 100000 -p\n    \
        tree-tester tree --validate file:///mnt/storage/base --report status.json\n    \
        tree-tester --connections 64 --window 20000 tree --build /mnt/storage/big"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Number of logical connections to spread operations over
    #[arg(long, global = true, default_value_t = DEFAULT_CONNECTIONS, value_name = "NUM")]
    pub connections: usize,

    /// Maximum number of outstanding backend operations
    #[arg(long, global = true, default_value_t = DEFAULT_WINDOW, value_name = "NUM")]
    pub window: usize,

    /// Threads of the I/O runtime
    #[arg(long, global = true, default_value_t = default_io_threads(), value_name = "NUM")]
    pub io_threads: usize,

    /// Write the resulting status tree as JSON
    #[arg(long, global = true, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Show a live progress display
    #[arg(short = 'p', long, global = true)]
    pub progress: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build or validate a synthetic tree
    Tree(TreeArgs),
}

/// Arguments of the `tree` subcommand
#[derive(Args, Debug, Clone)]
pub struct TreeArgs {
    /// Build a new tree at TARGET
    #[arg(long, value_name = "TARGET", conflicts_with = "validate")]
    pub build: Option<String>,

    /// Validate the tree at TARGET
    #[arg(long, value_name = "TARGET")]
    pub validate: Option<String>,

    /// Seed of the pseudo-random generator
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Maximum directory depth
    #[arg(long, default_value_t = 5)]
    pub depth: usize,

    /// File budget of the tree, manifests included
    #[arg(long, default_value_t = 1000)]
    pub nfiles: u64,
}

fn default_io_threads() -> usize {
    num_cpus::get()
}

/// Parsed target location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    /// Absolute path, without trailing slashes
    pub path: String,
}

impl TargetUrl {
    /// Parse a target string
    ///
    /// Accepts formats:
    /// - file:///abs/path
    /// - /abs/path
    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        let target = target.trim();

        let caps = TARGET_REGEX
            .captures(target)
            .ok_or_else(|| ConfigError::InvalidTarget {
                target: target.to_string(),
                reason: "Expected format: file:///abs/path or /abs/path".into(),
            })?;

        let path = caps
            .get(1)
            .ok_or_else(|| ConfigError::InvalidTarget {
                target: target.to_string(),
                reason: "Missing path".into(),
            })?
            .as_str();

        Ok(Self {
            path: trim_trailing_slashes(path).to_string(),
        })
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file://{}", self.path)
    }
}

/// What a run does with its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Build,
    Validate,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Build => "build",
            Operation::Validate => "validate",
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub operation: Operation,

    pub target: TargetUrl,

    /// Generator seed (build only)
    pub seed: u64,

    /// Maximum tree depth (build only)
    pub depth: usize,

    /// File budget (build only)
    pub nfiles: u64,

    /// Logical connection count
    pub connections: usize,

    /// In-flight operation bound
    pub window: usize,

    /// I/O runtime threads
    pub io_threads: usize,

    /// JSON report destination
    pub report_path: Option<PathBuf>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl RunConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let Command::Tree(tree) = args.command;

        let (operation, target) = match (tree.build, tree.validate) {
            (Some(target), None) => (Operation::Build, target),
            (None, Some(target)) => (Operation::Validate, target),
            _ => return Err(ConfigError::MissingOperation),
        };
        let target = TargetUrl::parse(&target)?;

        if args.connections == 0 || args.connections > MAX_CONNECTIONS {
            return Err(ConfigError::InvalidConnectionCount {
                count: args.connections,
                max: MAX_CONNECTIONS,
            });
        }

        if args.window < MIN_WINDOW {
            return Err(ConfigError::InvalidWindow {
                size: args.window,
                min: MIN_WINDOW,
            });
        }

        if operation == Operation::Build && tree.nfiles == 0 {
            return Err(ConfigError::InvalidFileCount { count: tree.nfiles });
        }

        if let Some(report) = &args.report {
            if let Some(parent) = report.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidReportPath {
                        path: report.clone(),
                        reason: format!("Parent directory '{}' does not exist", parent.display()),
                    });
                }
            }
        }

        Ok(Self {
            operation,
            target,
            seed: tree.seed,
            depth: tree.depth,
            nfiles: tree.nfiles,
            connections: args.connections,
            window: args.window,
            io_threads: args.io_threads.max(1),
            report_path: args.report,
            show_progress: args.progress,
            verbose: args.verbose,
        })
    }
}
