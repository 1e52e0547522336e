//! Hierarchical pass/fail results
//!
//! Every component reports its outcome as a [`TestStatus`]: a description,
//! a duration, an ordered list of local errors and an ordered list of child
//! statuses. A status is *open* while it is being filled in and *sealed*
//! once its description and duration are fixed. Sealing only fixes the
//! identity metadata; errors and children may still be absorbed afterwards.

use console::style;
use serde::Serialize;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// Indentation per nesting level in [`TestStatus::pretty_print`]
const INDENT: usize = 4;

/// Result of a test case or of one of its sub-steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestStatus {
    description: String,
    duration: Duration,
    errors: Vec<String>,
    children: Vec<TestStatus>,
    #[serde(skip)]
    sealed: bool,
}

impl TestStatus {
    /// A new, open, successful status
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, open status holding a single error
    pub fn from_error(err: impl Into<String>) -> Self {
        let mut status = Self::new();
        status.add_error(err);
        status
    }

    /// Record a local error
    pub fn add_error(&mut self, err: impl Into<String>) {
        self.errors.push(err.into());
    }

    /// True iff there is no local error and every child is ok
    pub fn ok(&self) -> bool {
        self.errors.is_empty() && self.children.iter().all(TestStatus::ok)
    }

    /// Append `other`'s local errors to ours, discarding its description.
    ///
    /// Returns whether anything was absorbed.
    pub fn absorb_errors(&mut self, other: &TestStatus) -> bool {
        self.errors.extend(other.errors.iter().cloned());
        !other.errors.is_empty()
    }

    /// Attach `child`, keeping its description and nested structure
    pub fn add_child(&mut self, child: TestStatus) {
        self.children.push(child);
    }

    /// Attach `child` only when it reports a failure.
    ///
    /// Returns whether the child was attached.
    pub fn add_child_if_error(&mut self, child: TestStatus) -> bool {
        if child.ok() {
            return false;
        }
        self.children.push(child);
        true
    }

    /// Fix description and duration
    pub fn seal(&mut self, description: impl Into<String>, duration: Duration) {
        self.description = description.into();
        self.duration = duration;
        self.sealed = true;
    }

    /// Seal with the time elapsed since `start`
    pub fn seal_since(&mut self, description: impl Into<String>, start: Instant) {
        self.seal(description, start.elapsed());
    }

    /// Builder form of [`seal`](Self::seal)
    pub fn sealed(mut self, description: impl Into<String>, duration: Duration) -> Self {
        self.seal(description, duration);
        self
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn children(&self) -> &[TestStatus] {
        &self.children
    }

    /// Total number of errors in this node and all of its descendants
    pub fn error_count(&self) -> usize {
        self.errors.len() + self.children.iter().map(TestStatus::error_count).sum::<usize>()
    }

    /// Render as an indented PASS/FAIL report
    ///
    /// ```text
    /// FAIL Validate tree :: /base (12ms)
    ///     FAIL Validate directory :: /base (11ms)
    ///         Listing of /base does not match its manifest: missing files: [k3v0q]
    ///         ...
    /// ```
    pub fn pretty_print(&self, level: usize) -> String {
        let mut out = String::new();
        self.render_into(&mut out, level);
        out
    }

    fn render_into(&self, out: &mut String, level: usize) {
        let tag = if self.ok() {
            style("PASS").green().bold()
        } else {
            style("FAIL").red().bold()
        };

        let _ = write!(out, "{:width$}{} {}", "", tag, self.description, width = level * INDENT);
        if self.sealed {
            let _ = write!(out, " ({})", format_duration(self.duration));
        }
        out.push('\n');

        for err in &self.errors {
            let _ = writeln!(out, "{:width$}{}", "", err, width = (level + 1) * INDENT);
        }

        for child in &self.children {
            child.render_into(out, level + 1);
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis >= 10_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        format!("{}ms", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_is_recursive() {
        let mut root = TestStatus::new();
        assert!(root.ok());

        let mut child = TestStatus::new();
        let mut grandchild = TestStatus::new();
        grandchild.add_error("The Moon blew up.");
        child.add_child(grandchild);
        root.add_child(child);

        assert!(!root.ok());
        assert!(root.errors().is_empty());
        assert_eq!(root.error_count(), 1);
    }

    #[test]
    fn test_absorb_discards_description() {
        let mut acc = TestStatus::new();
        acc.seal("accumulator", Duration::from_millis(1));

        let mut other = TestStatus::from_error("write failed");
        other.seal("some operation", Duration::from_millis(2));

        assert!(acc.absorb_errors(&other));
        assert_eq!(acc.description(), "accumulator");
        assert_eq!(acc.errors(), &["write failed".to_string()]);
        assert!(acc.children().is_empty());

        assert!(!acc.absorb_errors(&TestStatus::new()));
    }

    #[test]
    fn test_add_child_if_error_skips_passing() {
        let mut root = TestStatus::new();
        assert!(!root.add_child_if_error(TestStatus::new().sealed("passed", Duration::ZERO)));
        assert!(root.add_child_if_error(TestStatus::from_error("boom")));
        assert_eq!(root.children().len(), 1);
        assert!(!root.ok());
    }

    #[test]
    fn test_seal_keeps_accepting_errors() {
        let mut status = TestStatus::new();
        assert!(!status.is_sealed());
        status.seal("An awesome test", Duration::from_millis(3));
        assert!(status.is_sealed());
        assert!(status.ok());

        status.add_error("late error");
        assert!(!status.ok());
        assert_eq!(status.description(), "An awesome test");
        assert_eq!(status.duration(), Duration::from_millis(3));
    }

    #[test]
    fn test_pretty_print_layout() {
        let mut status = TestStatus::new();
        status.seal("A less than awesome test", Duration::from_millis(30));
        status.add_error("The Earth blew up.");

        let passed = TestStatus::new().sealed("This sub-test passed", Duration::from_millis(9));
        let mut failed = TestStatus::new();
        failed.seal("This sub-test did not", Duration::from_millis(5));
        failed.add_error("The Moon blew up.");

        status.add_child(passed);
        status.add_child(failed);

        let out = status.pretty_print(0);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("FAIL"));
        assert!(lines[0].contains("A less than awesome test (30ms)"));
        assert_eq!(lines[1], "    The Earth blew up.");
        assert!(lines[2].starts_with("    "));
        assert!(lines[2].contains("PASS"));
        assert!(lines[3].contains("This sub-test did not"));
        assert_eq!(lines[4], "        The Moon blew up.");
    }

    #[test]
    fn test_serializes_to_json() {
        let mut status = TestStatus::from_error("bad checksum");
        status.seal("Validate self-checked file /a/b", Duration::from_millis(1));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["description"], "Validate self-checked file /a/b");
        assert_eq!(json["errors"][0], "bad checksum");
    }
}
