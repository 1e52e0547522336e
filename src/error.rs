//! Error types for tree-tester
//!
//! This module defines the error hierarchy for:
//! - Storage backend operations (folded into status trees, never thrown)
//! - Configuration and CLI errors
//! - Cooperative worker thread errors
//!
//! Defects found in the system under test are *not* errors in this sense:
//! they are recorded in a [`TestStatus`](crate::status::TestStatus). The
//! types here describe failures of individual operations or of the tool
//! itself.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the tree-tester application
#[derive(Error, Debug)]
pub enum TesterError {
    /// Storage backend errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (report files, runtime setup)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single storage backend operation
///
/// The `Display` form is the human-readable message recorded in status
/// trees, so every variant carries the path it concerns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Path does not exist
    #[error("No such file or directory: '{path}'")]
    NotFound { path: String },

    /// Path exists and the operation requires it not to
    #[error("Already exists: '{path}'")]
    AlreadyExists { path: String },

    /// A directory was required
    #[error("Not a directory: '{path}'")]
    NotADirectory { path: String },

    /// A regular file was required
    #[error("Is a directory: '{path}'")]
    IsADirectory { path: String },

    /// Directory removal on a non-empty directory
    #[error("Directory not empty: '{path}'")]
    DirectoryNotEmpty { path: String },

    /// Underlying I/O failure
    #[error("I/O failure on '{path}': {reason}")]
    Io { path: String, reason: String },

    /// Operation refused by the backend (fault injection, permissions)
    #[error("Operation on '{path}' rejected: {reason}")]
    Rejected { path: String, reason: String },
}

impl BackendError {
    /// Build an `Io` error, mapping well-known kinds to specific variants
    pub fn from_io(path: impl Into<String>, err: &std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => BackendError::NotFound { path },
            std::io::ErrorKind::AlreadyExists => BackendError::AlreadyExists { path },
            _ => BackendError::Io {
                path,
                reason: err.to_string(),
            },
        }
    }

    /// The path this error concerns
    pub fn path(&self) -> &str {
        match self {
            BackendError::NotFound { path }
            | BackendError::AlreadyExists { path }
            | BackendError::NotADirectory { path }
            | BackendError::IsADirectory { path }
            | BackendError::DirectoryNotEmpty { path }
            | BackendError::Io { path, .. }
            | BackendError::Rejected { path, .. } => path,
        }
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid connection pool size
    #[error("Invalid connection count {count}: must be between 1 and {max}")]
    InvalidConnectionCount { count: usize, max: usize },

    /// Invalid in-flight window
    #[error("Invalid in-flight window {size}: must be at least {min}")]
    InvalidWindow { size: usize, min: usize },

    /// Invalid file budget
    #[error("Invalid file count {count}: a tree needs at least one file (its root manifest)")]
    InvalidFileCount { count: u64 },

    /// Target could not be parsed
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Neither --build nor --validate given
    #[error("No operation requested: pass --build <TARGET> or --validate <TARGET>")]
    MissingOperation,

    /// Report path unusable
    #[error("Invalid report path '{path}': {reason}")]
    InvalidReportPath { path: PathBuf, reason: String },
}

/// Violations of the manifest / self-checked file formats
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A line did not start with the expected prefix
    #[error("expected a line starting with '{expected}'")]
    MissingPrefix { expected: &'static str },

    /// A separator line was expected
    #[error("missing separator line")]
    MissingSeparator,

    /// Input ended before a complete record was read
    #[error("unexpected end of input")]
    Truncated,

    /// Declared payload length is not a canonical decimal number
    #[error("invalid length marker '{value}'")]
    InvalidLength { value: String },

    /// A header field is empty or not valid UTF-8
    #[error("invalid {field} field")]
    InvalidField { field: &'static str },

    /// Entry names out of order, duplicated or colliding
    #[error("non-canonical entry list near '{name}'")]
    NonCanonical { name: String },

    /// Checksum line is not 64 lowercase hex characters
    #[error("malformed checksum line")]
    MalformedChecksum,

    /// Recomputed checksum differs from the recorded one
    #[error("checksum mismatch: recorded {recorded}, computed {computed}")]
    ChecksumMismatch { recorded: String, computed: String },

    /// Bytes follow the checksum line
    #[error("{count} trailing bytes after checksum line")]
    TrailingBytes { count: usize },
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker '{name}' panicked: {message}")]
    Panicked { name: String, message: String },

    /// Thread could not be spawned
    #[error("Failed to spawn worker '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// Result already taken by an earlier join
    #[error("Worker '{name}' was already joined")]
    AlreadyJoined { name: String },
}

/// Result type alias for TesterError
pub type Result<T> = std::result::Result<T, TesterError>;

/// Result type alias for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;
