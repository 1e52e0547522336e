//! Tree construction and validation
//!
//! Both [`TreeBuilder`] and [`TreeValidator`] run on a dedicated
//! [`CooperativeWorker`] thread. That thread never performs I/O itself: it
//! spawns backend futures onto a shared tokio runtime and blocks on their
//! join handles at well-defined points, polling its cancellation token in
//! between.
//!
//! ```text
//!   worker thread                      tokio runtime
//!   ─────────────                      ─────────────
//!   generator / level stack ──spawn──► backend op (conn#0)
//!                           ──spawn──► backend op (conn#1)
//!   retire head ◄──block_on────────── ...
//! ```

pub mod builder;
pub mod validator;

pub use builder::{BuildSnapshot, BuildStats, TreeBuilder};
pub use validator::TreeValidator;

use crate::error::WorkerError;
use crate::status::TestStatus;
use crate::worker::{CancelToken, CooperativeWorker};
use std::fmt::Display;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Default bound on unretired backend operations
pub const DEFAULT_WINDOW: usize = 5000;

/// Message recorded when a run is cancelled before completion
pub const EARLY_TERMINATION: &str = "Early termination requested";

/// A build or validation running on its own worker thread
pub struct TreeRun {
    worker: CooperativeWorker<TestStatus>,
}

impl TreeRun {
    pub(crate) fn spawn<F>(name: &str, body: F) -> Result<Self, WorkerError>
    where
        F: FnOnce(CancelToken) -> TestStatus + Send + 'static,
    {
        Ok(Self {
            worker: CooperativeWorker::spawn(name, body)?,
        })
    }

    /// Token that cancels this run, e.g. from a Ctrl-C handler
    pub fn token(&self) -> CancelToken {
        self.worker.token()
    }

    /// Request cooperative cancellation without waiting
    pub fn stop(&self) {
        self.worker.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the run completes and return its status tree
    pub fn wait(mut self) -> Result<TestStatus, WorkerError> {
        self.worker.wait()
    }
}

/// Block on a spawned task, flattening task and operation failures into
/// one error message
pub(crate) fn settle<T, E: Display>(
    runtime: &Handle,
    handle: JoinHandle<Result<T, E>>,
) -> Result<T, String> {
    match runtime.block_on(handle) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("Backend task failed: {}", e)),
    }
}
