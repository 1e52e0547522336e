//! Tree validation
//!
//! Each directory is inspected by one runtime task: it lists the directory
//! and fetches its `MANIFEST` concurrently, cross-checks the two, then
//! fetches and validates every file concurrently. The worker thread walks
//! the tree with an explicit stack of levels; a level owns the directory's
//! status and the handles of its children's inspections, which start as
//! soon as the level is pushed.
//!
//! Defects are local to the directory they are found in. A broken manifest
//! does not stop the walk: the listing stands in for it so the subtree is
//! still validated.

use super::{settle, TreeRun, EARLY_TERMINATION};
use crate::backend::{
    join_path, trim_trailing_slashes, ConnectionPool, StorageBackend, DEFAULT_CONNECTIONS,
};
use crate::content::{Manifest, SelfCheckedFile, MANIFEST_NAME};
use crate::error::WorkerError;
use crate::progress::ProgressTracker;
use crate::status::TestStatus;
use crate::worker::CancelToken;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the inspection of one directory found
#[derive(Debug)]
struct DirectoryReport {
    status: TestStatus,
    /// Full paths of the subdirectories to descend into
    subdirs: Vec<String>,
}

type Inspection = JoinHandle<Result<DirectoryReport, Infallible>>;

/// One directory on the traversal stack
struct Level {
    path: String,
    started: Instant,
    status: TestStatus,
    pending: VecDeque<(String, Inspection)>,
}

/// Shared by every inspection task
struct Context {
    backend: Arc<dyn StorageBackend>,
    pool: ConnectionPool,
    progress: Option<Arc<ProgressTracker>>,
}

/// Re-derives a tree from a backend and checks it for integrity
pub struct TreeValidator {
    backend: Arc<dyn StorageBackend>,
    runtime: Handle,
    base: String,
    connections: usize,
    progress: Option<Arc<ProgressTracker>>,
}

impl TreeValidator {
    pub fn new(backend: Arc<dyn StorageBackend>, runtime: Handle, base: &str) -> Self {
        Self {
            backend,
            runtime,
            base: trim_trailing_slashes(base).to_string(),
            connections: DEFAULT_CONNECTIONS,
            progress: None,
        }
    }

    pub fn connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }

    /// Count file validations on `tracker`
    pub fn progress(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.progress = Some(tracker);
        self
    }

    /// Run the validation on a dedicated worker thread
    pub fn start(self) -> Result<TreeRun, WorkerError> {
        TreeRun::spawn("tree-validator", move |token| self.run(&token))
    }

    /// Run the validation on the calling thread, which must not belong to
    /// the runtime
    pub fn run(&self, token: &CancelToken) -> TestStatus {
        let start = Instant::now();
        let ctx = Arc::new(Context {
            backend: Arc::clone(&self.backend),
            pool: ConnectionPool::new(self.connections),
            progress: self.progress.clone(),
        });
        let mut aggregate = TestStatus::new();
        let mut cancelled = false;
        let mut directories = 0u64;

        info!(base = %self.base, connections = ctx.pool.size(), "Validating tree");

        let root = self.inspect(&ctx, self.base.clone());
        let report = self.resolve(&self.base, root);
        let mut stack = vec![self.level(&ctx, self.base.clone(), report)];
        directories += 1;

        while let Some(top) = stack.last_mut() {
            if !cancelled && token.stop_requested() {
                warn!(base = %self.base, "Validation cancelled before completion");
                cancelled = true;
            }

            if let Some((path, handle)) = top.pending.pop_front() {
                let report = self.resolve(&path, handle);
                if cancelled {
                    // already issued, so drained, but never descended into
                    let node = report
                        .status
                        .sealed(describe(&path), Duration::ZERO);
                    top.status.add_child_if_error(node);
                    continue;
                }
                let level = self.level(&ctx, path, report);
                stack.push(level);
                directories += 1;
                continue;
            }

            let Some(done) = stack.pop() else {
                break;
            };
            let mut node = done.status;
            node.seal_since(describe(&done.path), done.started);
            debug!(path = %done.path, ok = node.ok(), "Directory validated");

            match stack.last_mut() {
                Some(parent) => {
                    parent.status.add_child_if_error(node);
                }
                None => {
                    aggregate.add_child_if_error(node);
                }
            }
        }

        if cancelled {
            aggregate.add_error(EARLY_TERMINATION);
        }
        aggregate.seal_since(format!("Validate tree :: {}", self.base), start);

        info!(
            directories,
            defects = aggregate.error_count(),
            elapsed_ms = aggregate.duration().as_millis() as u64,
            "Validation finished"
        );
        aggregate
    }

    /// Turn an inspection into a stack level, starting its children's
    /// inspections
    fn level(&self, ctx: &Arc<Context>, path: String, report: DirectoryReport) -> Level {
        let pending = report
            .subdirs
            .into_iter()
            .map(|dir| {
                let handle = self.inspect(ctx, dir.clone());
                (dir, handle)
            })
            .collect();

        Level {
            path,
            started: Instant::now(),
            status: report.status,
            pending,
        }
    }

    fn inspect(&self, ctx: &Arc<Context>, dir: String) -> Inspection {
        let ctx = Arc::clone(ctx);
        self.runtime
            .spawn(async move { Ok(inspect_directory(ctx, dir).await) })
    }

    fn resolve(&self, path: &str, handle: Inspection) -> DirectoryReport {
        settle(&self.runtime, handle).unwrap_or_else(|e| DirectoryReport {
            status: TestStatus::from_error(format!("Could not inspect {}: {}", path, e)),
            subdirs: Vec::new(),
        })
    }
}

fn describe(path: &str) -> String {
    format!("Validate directory :: {}", path)
}

async fn inspect_directory(ctx: Arc<Context>, dir: String) -> DirectoryReport {
    let manifest_path = join_path(&dir, MANIFEST_NAME);
    let listing = ctx.backend.list_dir(ctx.pool.next_id(), &dir);
    let manifest = ctx.backend.read_file(ctx.pool.next_id(), &manifest_path);
    let (listing, manifest) = tokio::join!(listing, manifest);

    let mut status = TestStatus::new();

    let listing = match listing {
        Ok(entries) => Some(entries),
        Err(e) => {
            status.add_error(format!("Could not list directory {}: {}", dir, e));
            None
        }
    };

    let manifest = match manifest.map(|bytes| Manifest::parse(&bytes)) {
        Ok(Ok(manifest)) if manifest.path() == manifest_path => Some(manifest),
        Ok(Ok(manifest)) => {
            status.add_error(format!(
                "Mismatch between expected manifest {} and included one: {}",
                manifest_path,
                manifest.path()
            ));
            None
        }
        Ok(Err(e)) => {
            status.add_error(format!("Could not parse manifest {}: {}", manifest_path, e));
            None
        }
        Err(e) => {
            status.add_error(format!("Could not fetch manifest {}: {}", manifest_path, e));
            None
        }
    };

    let (files, subdirs): (Vec<String>, Vec<String>) = match (&manifest, &listing) {
        (Some(manifest), listing) => {
            if let Some(listing) = listing {
                let diff = manifest.cross_check(listing);
                if !diff.is_empty() {
                    status.add_error(format!(
                        "Listing of {} does not match its manifest: {}",
                        dir,
                        diff.summary()
                    ));
                }
            }
            (
                manifest.files().map(String::from).collect(),
                manifest.subdirs().map(String::from).collect(),
            )
        }
        (None, Some(listing)) => {
            let entries = listing
                .iter()
                .filter(|e| !matches!(e.name.as_str(), "." | ".." | MANIFEST_NAME));
            let (dirs, files): (Vec<_>, Vec<_>) = entries.partition(|e| e.is_dir);
            (
                files.into_iter().map(|e| e.name.clone()).collect(),
                dirs.into_iter().map(|e| e.name.clone()).collect(),
            )
        }
        (None, None) => (Vec::new(), Vec::new()),
    };

    let checks: Vec<JoinHandle<TestStatus>> = files
        .iter()
        .map(|name| {
            let check = check_file(Arc::clone(&ctx), join_path(&dir, name));
            match &ctx.progress {
                Some(tracker) => tokio::spawn(tracker.track(check)),
                None => tokio::spawn(check),
            }
        })
        .collect();

    for (name, check) in files.iter().zip(checks) {
        match check.await {
            Ok(file_status) => {
                status.absorb_errors(&file_status);
            }
            Err(e) => status.add_error(format!(
                "Validation of {} failed: {}",
                join_path(&dir, name),
                e
            )),
        }
    }

    debug!(path = %dir, files = files.len(), subdirs = subdirs.len(), "Directory inspected");

    DirectoryReport {
        status,
        subdirs: subdirs.iter().map(|name| join_path(&dir, name)).collect(),
    }
}

async fn check_file(ctx: Arc<Context>, path: String) -> TestStatus {
    match ctx.backend.read_file(ctx.pool.next_id(), &path).await {
        Ok(data) => SelfCheckedFile::validate(&data, &path),
        Err(e) => TestStatus::from_error(format!("Could not read {}: {}", path, e)),
    }
}
