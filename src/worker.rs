//! Cooperative background workers
//!
//! Every long-running component (tree builder, tree validator, progress
//! ticker) runs on exactly one [`CooperativeWorker`]. The worker owns one
//! thread plus a shared [`CancelToken`]; the thread polls the token at
//! well-defined points and performs all of its blocking waits through
//! [`CancelToken::wait_for`], so a stop request is always observed
//! promptly.
//!
//! Dropping a worker stops it and joins the thread: no thread is ever
//! leaked running.

use crate::error::WorkerError;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TokenInner {
    stop: AtomicBool,
    lock: Mutex<()>,
    notifier: Condvar,
}

/// Shared, pollable cancellation signal
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination and wake every waiter
    pub fn request_stop(&self) {
        let _guard = self.inner.lock.lock();
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.notifier.notify_all();
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`, returning early when a stop is requested.
    ///
    /// Returns `true` if termination has been requested.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }

    /// Sleep until `deadline`, returning early when a stop is requested.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut guard = self.inner.lock.lock();
        while !self.stop_requested() {
            if self.inner.notifier.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.stop_requested()
    }
}

/// One background thread plus its cancellation token
pub struct CooperativeWorker<T: Send + 'static> {
    name: String,
    token: CancelToken,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> CooperativeWorker<T> {
    /// Spawn `body` on a new named thread.
    ///
    /// The body receives the worker's token and must poll it.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self, WorkerError>
    where
        F: FnOnce(CancelToken) -> T + Send + 'static,
    {
        let name = name.into();
        let token = CancelToken::new();
        let thread_token = token.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(thread_token))
            .map_err(|e| WorkerError::SpawnFailed {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            token,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A clone of the worker's token, e.g. for a signal handler
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Ask the thread to terminate without waiting for it
    pub fn stop(&self) {
        self.token.request_stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Block until the thread returns on its own, without requesting a stop
    pub fn wait(&mut self) -> Result<T, WorkerError> {
        let handle = self.handle.take().ok_or_else(|| WorkerError::AlreadyJoined {
            name: self.name.clone(),
        })?;

        handle.join().map_err(|payload| WorkerError::Panicked {
            name: self.name.clone(),
            message: panic_message(payload.as_ref()),
        })
    }

    /// Request a stop, then block until the thread returns
    pub fn join(&mut self) -> Result<T, WorkerError> {
        self.stop();
        self.wait()
    }
}

impl<T: Send + 'static> Drop for CooperativeWorker<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.token.request_stop();
            let _ = handle.join();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_wait_returns_body_result() {
        let mut worker = CooperativeWorker::spawn("adder", |_token| 2 + 2).unwrap();
        assert_eq!(worker.wait().unwrap(), 4);
        assert!(worker.is_finished());
        assert!(matches!(worker.wait(), Err(WorkerError::AlreadyJoined { .. })));
    }

    #[test]
    fn test_join_interrupts_wait() {
        let mut worker = CooperativeWorker::spawn("sleeper", |token| {
            let start = Instant::now();
            let stopped = token.wait_for(Duration::from_secs(60));
            (stopped, start.elapsed())
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        let (stopped, elapsed) = worker.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(30));
    }

    #[test]
    fn test_wait_for_times_out_without_stop() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.wait_for(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_wait_after_stop_returns_immediately() {
        let token = CancelToken::new();
        token.request_stop();
        let start = Instant::now();
        assert!(token.wait_for(Duration::from_secs(60)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_drop_stops_and_joins() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&iterations);
        let exited = Arc::new(AtomicBool::new(false));
        let exit_flag = Arc::clone(&exited);

        let worker = CooperativeWorker::spawn("looper", move |token| {
            while !token.stop_requested() {
                counter.fetch_add(1, Ordering::Relaxed);
                token.wait_for(Duration::from_millis(1));
            }
            exit_flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(10));
        drop(worker);
        assert!(exited.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panic_is_reported() {
        let mut worker = CooperativeWorker::spawn("panicker", |_token| -> u32 {
            panic!("kaboom");
        })
        .unwrap();

        match worker.wait() {
            Err(WorkerError::Panicked { name, message }) => {
                assert_eq!(name, "panicker");
                assert_eq!(message, "kaboom");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
