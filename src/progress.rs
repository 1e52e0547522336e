//! Progress tracking and reporting
//!
//! [`ProgressTracker`] holds atomic in-flight/succeeded/failed counters that
//! the builder and validator bump as operations are issued and complete.
//! [`ProgressTicker`] renders those counters on an indicatif spinner from
//! its own cooperative worker. Neither is consulted by the core logic.

use crate::error::{BackendResult, WorkerError};
use crate::status::TestStatus;
use crate::tree::BuildSnapshot;
use crate::worker::CooperativeWorker;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Refresh interval of the live display
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Anything whose success can be counted
pub trait Outcome {
    fn succeeded(&self) -> bool;
}

impl<T> Outcome for BackendResult<T> {
    fn succeeded(&self) -> bool {
        self.is_ok()
    }
}

impl Outcome for TestStatus {
    fn succeeded(&self) -> bool {
        self.ok()
    }
}

/// Atomic operation counters
///
/// When `total` is known, `in_flight + succeeded + failed <= total` must hold
/// at all times. Breaking that invariant is a bug in this tool, so it panics.
#[derive(Debug)]
pub struct ProgressTracker {
    total: Option<u64>,
    in_flight: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl ProgressTracker {
    /// Tracker for a known number of operations
    pub fn new(total: u64) -> Self {
        Self::with_total(Some(total))
    }

    /// Tracker for an unknown number of operations; `pending` reports 0
    pub fn unbounded() -> Self {
        Self::with_total(None)
    }

    fn with_total(total: Option<u64>) -> Self {
        Self {
            total,
            in_flight: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn add_in_flight(&self) {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(total) = self.total {
            let seen = in_flight
                + self.succeeded.load(Ordering::SeqCst)
                + self.failed.load(Ordering::SeqCst);
            assert!(
                seen <= total,
                "progress tracker overflow: {} operations seen, {} expected",
                seen,
                total
            );
        }
    }

    pub fn add_succeeded(&self) {
        self.retire();
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_failed(&self) {
        self.retire();
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn retire(&self) {
        let retired = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        assert!(
            retired.is_ok(),
            "progress tracker underflow: completion recorded with nothing in flight"
        );
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Operations not yet issued; 0 when the total is unknown
    pub fn pending(&self) -> u64 {
        match self.total {
            Some(total) => total.saturating_sub(self.in_flight() + self.succeeded() + self.failed()),
            None => 0,
        }
    }

    /// Count `fut` as in flight now, and as succeeded or failed once it resolves
    pub fn track<F>(self: &Arc<Self>, fut: F) -> impl Future<Output = F::Output> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Outcome + Send,
    {
        self.add_in_flight();
        let tracker = Arc::clone(self);
        async move {
            let outcome = fut.await;
            if outcome.succeeded() {
                tracker.add_succeeded();
            } else {
                tracker.add_failed();
            }
            outcome
        }
    }

    fn render(&self) -> String {
        format!(
            "Pending: {} | In-flight: {} | Succeeded: {} | Failed: {}",
            format_number(self.pending()),
            format_number(self.in_flight()),
            format_number(self.succeeded()),
            format_number(self.failed()),
        )
    }
}

/// Live spinner showing a tracker's counters
pub struct ProgressTicker {
    worker: CooperativeWorker<()>,
}

impl ProgressTicker {
    /// Start rendering `tracker` until [`stop`](Self::stop) is called
    pub fn start(tracker: Arc<ProgressTracker>, description: String) -> Result<Self, WorkerError> {
        let worker = CooperativeWorker::spawn("progress-ticker", move |token| {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {prefix} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            );
            bar.set_prefix(description);

            loop {
                bar.set_message(tracker.render());
                bar.tick();
                if token.wait_for(TICK_INTERVAL) {
                    break;
                }
            }

            bar.finish_and_clear();
        })?;

        Ok(Self { worker })
    }

    /// Stop the display and wait for the spinner to be cleared.
    ///
    /// Returns false if the display thread died instead of stopping.
    pub fn stop(mut self) -> bool {
        match self.worker.join() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Progress ticker failed to join cleanly");
                false
            }
        }
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a header at the start of a run
pub fn print_header(operation: &str, target: &str, connections: usize, window: usize) {
    println!();
    println!(
        "{} {}",
        style("tree-tester").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Operation:").bold(), operation);
    println!("  {} {}", style("Target:").bold(), target);
    println!("  {} {}", style("Connections:").bold(), connections);
    println!("  {} {}", style("In-flight window:").bold(), window);
    println!();
}

/// Print the final status tree, followed by build statistics when present
pub fn print_summary(status: &TestStatus, build: Option<&BuildSnapshot>) {
    println!();
    print!("{}", status.pretty_print(0));

    if let Some(stats) = build {
        println!("{}", style("─".repeat(50)).dim());
        println!(
            "  {} {}",
            style("Directories:").bold(),
            format_number(stats.directories)
        );
        println!("  {} {}", style("Files:").bold(), format_number(stats.files));
        println!(
            "  {} {}",
            style("Manifests:").bold(),
            format_number(stats.manifests)
        );
        println!(
            "  {} {}",
            style("Bytes written:").bold(),
            format_size(stats.bytes, BINARY)
        );
    }

    let errors = status.error_count();
    if errors > 0 {
        println!(
            "  {} {}",
            style("Defects:").yellow().bold(),
            format_number(errors as u64)
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_ticker_stop() {
        let tracker = Arc::new(ProgressTracker::new(10));
        let ticker = ProgressTicker::start(tracker, "idle".into()).unwrap();
        assert!(ticker.stop());

        let crashed = ProgressTicker {
            worker: CooperativeWorker::spawn("crashed-ticker", |_| panic!("render failed"))
                .unwrap(),
        };
        assert!(!crashed.stop());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_tracker_counts() {
        let tracker = ProgressTracker::new(100);
        assert_eq!(tracker.pending(), 100);
        assert_eq!(tracker.in_flight(), 0);

        tracker.add_in_flight();
        assert_eq!(tracker.pending(), 99);
        assert_eq!(tracker.in_flight(), 1);

        tracker.add_succeeded();
        assert_eq!(tracker.pending(), 99);
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.succeeded(), 1);
        assert_eq!(tracker.failed(), 0);
    }

    #[test]
    fn test_tracker_overflow_is_fatal() {
        let tracker = ProgressTracker::new(2);
        tracker.add_in_flight();
        tracker.add_in_flight();

        let result = catch_unwind(AssertUnwindSafe(|| tracker.add_in_flight()));
        assert!(result.is_err());
    }

    #[test]
    fn test_tracker_underflow_is_fatal() {
        let tracker = ProgressTracker::new(10);
        assert!(catch_unwind(AssertUnwindSafe(|| tracker.add_succeeded())).is_err());
        assert!(catch_unwind(AssertUnwindSafe(|| tracker.add_failed())).is_err());
        assert_eq!(tracker.succeeded(), 0);
        assert_eq!(tracker.failed(), 0);
    }

    #[test]
    fn test_tracker_unknown_total() {
        let tracker = ProgressTracker::unbounded();
        assert_eq!(tracker.total(), None);
        assert_eq!(tracker.pending(), 0);

        for _ in 0..1000 {
            tracker.add_in_flight();
        }
        assert_eq!(tracker.pending(), 0);
        assert_eq!(tracker.in_flight(), 1000);
    }

    #[test]
    fn test_track_future() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let tracker = Arc::new(ProgressTracker::new(2));

        let ok = tracker.track(async { BackendResult::Ok(()) });
        let failed = tracker.track(async {
            BackendResult::<()>::Err(BackendError::NotFound { path: "/x".into() })
        });
        assert_eq!(tracker.in_flight(), 2);

        runtime.block_on(async {
            assert!(ok.await.is_ok());
            assert!(failed.await.is_err());
        });

        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.succeeded(), 1);
        assert_eq!(tracker.failed(), 1);
    }
}
