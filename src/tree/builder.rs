//! Construction pipeline
//!
//! Drains a [`HierarchyBuilder`] and issues one backend operation per entry,
//! keeping at most `window` operations unretired. Completed operations are
//! retired from the head of the queue before each issue; when the window is
//! full the head is waited on until it completes.
//!
//! Directory creation is a barrier: a directory entry is waited on before
//! the next entry is issued, so no write can race ahead of its parent.

use super::{settle, TreeRun, DEFAULT_WINDOW, EARLY_TERMINATION};
use crate::backend::{ConnectionPool, StorageBackend, DEFAULT_CONNECTIONS};
use crate::error::{BackendResult, WorkerError};
use crate::hierarchy::{HierarchyBuilder, HierarchyEntry, HierarchyOptions};
use crate::progress::ProgressTracker;
use crate::status::TestStatus;
use crate::worker::CancelToken;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters of issued build operations
#[derive(Debug, Default)]
pub struct BuildStats {
    directories: AtomicU64,
    files: AtomicU64,
    manifests: AtomicU64,
    bytes: AtomicU64,
}

impl BuildStats {
    fn record(&self, entry: &HierarchyEntry) {
        if entry.is_dir {
            self.directories.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if entry.is_manifest() {
            self.manifests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.files.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes
            .fetch_add(entry.contents.len() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BuildSnapshot {
        BuildSnapshot {
            directories: self.directories.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            manifests: self.manifests.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BuildStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildSnapshot {
    pub directories: u64,
    pub files: u64,
    pub manifests: u64,
    pub bytes: u64,
}

/// Builds a synthetic tree against a storage backend
pub struct TreeBuilder {
    backend: Arc<dyn StorageBackend>,
    runtime: Handle,
    options: HierarchyOptions,
    connections: usize,
    window: usize,
    progress: Option<Arc<ProgressTracker>>,
    stats: Arc<BuildStats>,
}

impl TreeBuilder {
    pub fn new(backend: Arc<dyn StorageBackend>, runtime: Handle, options: HierarchyOptions) -> Self {
        Self {
            backend,
            runtime,
            options,
            connections: DEFAULT_CONNECTIONS,
            window: DEFAULT_WINDOW,
            progress: None,
            stats: Arc::new(BuildStats::default()),
        }
    }

    /// Number of logical connections operations are spread over
    pub fn connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }

    /// Maximum number of unretired operations; 0 is treated as 1
    pub fn window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Count file writes on `tracker`
    pub fn progress(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.progress = Some(tracker);
        self
    }

    /// Live counters, readable while the build runs
    pub fn stats(&self) -> Arc<BuildStats> {
        Arc::clone(&self.stats)
    }

    /// Run the build on a dedicated worker thread
    pub fn start(self) -> Result<TreeRun, WorkerError> {
        TreeRun::spawn("tree-builder", move |token| self.run(&token))
    }

    /// Run the build on the calling thread, which must not belong to the
    /// runtime
    pub fn run(&self, token: &CancelToken) -> TestStatus {
        let start = Instant::now();
        let base = self.options.base.clone();
        let pool = ConnectionPool::new(self.connections);
        let mut status = TestStatus::new();
        let mut queue: VecDeque<JoinHandle<BackendResult<()>>> = VecDeque::new();
        let mut entries = HierarchyBuilder::new(self.options.clone());
        let mut cancelled = false;

        info!(
            base = %base,
            seed = self.options.seed,
            depth = self.options.depth,
            files = self.options.files,
            window = self.window,
            connections = pool.size(),
            "Building tree"
        );

        loop {
            if token.stop_requested() {
                cancelled = true;
                break;
            }

            while let Some(head) = queue.front() {
                if !head.is_finished() && queue.len() < self.window {
                    break;
                }
                if let Some(handle) = queue.pop_front() {
                    self.retire(&mut status, handle);
                }
            }

            let Some(entry) = entries.next() else {
                break;
            };
            let is_dir = entry.is_dir;
            let handle = self.issue(&pool, entry);
            if is_dir {
                self.retire(&mut status, handle);
            } else {
                queue.push_back(handle);
            }
        }

        debug!(outstanding = queue.len(), "Draining build pipeline");
        while let Some(handle) = queue.pop_front() {
            self.retire(&mut status, handle);
        }

        if cancelled {
            warn!(base = %base, "Build cancelled before completion");
            status.add_error(EARLY_TERMINATION);
        }

        status.seal_since(format!("Build tree :: {}", base), start);

        let stats = self.stats.snapshot();
        info!(
            directories = stats.directories,
            files = stats.files,
            manifests = stats.manifests,
            bytes = stats.bytes,
            errors = status.error_count(),
            elapsed_ms = status.duration().as_millis() as u64,
            "Build finished"
        );
        status
    }

    fn issue(&self, pool: &ConnectionPool, entry: HierarchyEntry) -> JoinHandle<BackendResult<()>> {
        self.stats.record(&entry);
        let conn = pool.next_id();

        if entry.is_dir {
            return self.runtime.spawn(self.backend.create_dir(conn, &entry.path));
        }

        let write = self.backend.write_file(conn, &entry.path, entry.contents);
        match &self.progress {
            Some(tracker) => self.runtime.spawn(tracker.track(write)),
            None => self.runtime.spawn(write),
        }
    }

    fn retire(&self, status: &mut TestStatus, handle: JoinHandle<BackendResult<()>>) {
        if let Err(e) = settle(&self.runtime, handle) {
            status.add_error(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_into_memory() {
        let rt = runtime();
        let backend = Arc::new(MemoryBackend::new());
        let tracker = Arc::new(ProgressTracker::new(120));
        let builder = TreeBuilder::new(
            backend.clone(),
            rt.handle().clone(),
            HierarchyOptions::new("/eos/base", 9, 4, 120),
        )
        .connections(4)
        .progress(Arc::clone(&tracker));
        let stats = builder.stats();

        let status = builder.start().unwrap().wait().unwrap();
        assert!(status.ok(), "{}", status.pretty_print(0));
        assert_eq!(status.description(), "Build tree :: /eos/base");

        let snapshot = stats.snapshot();
        let written = snapshot.files + snapshot.manifests;
        assert!(written <= 120);
        assert_eq!(backend.file_count() as u64, written);
        // `/` and `/eos` exist besides the generated directories
        assert_eq!(backend.dir_count() as u64, snapshot.directories + 2);
        assert_eq!(tracker.succeeded(), written);
        assert_eq!(tracker.in_flight(), 0);
        for conn in 0..4 {
            assert!(backend.operations_on(crate::backend::ConnectionId(conn)) > 0);
        }
    }

    #[test]
    fn test_window_bounds_concurrency() {
        let rt = runtime();
        let backend = Arc::new(MemoryBackend::with_latency(Duration::from_millis(2)));
        let builder = TreeBuilder::new(
            backend.clone(),
            rt.handle().clone(),
            HierarchyOptions::new("/w", 5, 3, 80),
        )
        .window(4);

        let status = builder.run(&CancelToken::new());
        assert!(status.ok());
        assert!(backend.peak_in_flight() <= 4, "peak {}", backend.peak_in_flight());
    }

    #[test]
    fn test_backend_failures_are_recorded() {
        let rt = runtime();
        let backend = Arc::new(MemoryBackend::new());
        // the base manifest cannot be written
        backend.fail_path("/f/MANIFEST");

        let status = TreeBuilder::new(
            backend.clone(),
            rt.handle().clone(),
            HierarchyOptions::new("/f", 1, 2, 30),
        )
        .run(&CancelToken::new());

        assert!(!status.ok());
        assert_eq!(status.errors().len(), 1);
        assert!(status.errors()[0].contains("/f/MANIFEST"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let rt = runtime();
        let backend = Arc::new(MemoryBackend::new());
        let token = CancelToken::new();
        token.request_stop();

        let status = TreeBuilder::new(
            backend.clone(),
            rt.handle().clone(),
            HierarchyOptions::new("/c", 1, 2, 30),
        )
        .run(&token);

        assert_eq!(status.errors(), [EARLY_TERMINATION.to_string()]);
        assert_eq!(backend.file_count(), 0);
    }
}
