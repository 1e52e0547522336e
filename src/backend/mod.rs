//! Storage backend access
//!
//! The builder and validator talk to the system under test exclusively
//! through [`StorageBackend`]. Every operation is asynchronous and resolves
//! to a [`BackendResult`]; failures are values carrying a human-readable
//! message and never unwind across this boundary.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │  TreeBuilder worker      │      │  TreeValidator worker    │
//! │  (one OS thread)         │      │  (one OS thread)         │
//! └────────────┬─────────────┘      └────────────┬─────────────┘
//!              │ spawn + block_on                 │
//!              ▼                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    tokio runtime                             │
//! │   many concurrent backend futures, addressed round-robin     │
//! │   over ConnectionPool slots [0, size)                        │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               ▼
//!               MemoryBackend │ LocalBackend │ ...
//! ```

pub mod local;
pub mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

use crate::error::BackendResult;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of logical connections
pub const DEFAULT_CONNECTIONS: usize = 32;

/// Boxed future returned by every backend operation
pub type BackendFuture<T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'static>>;

/// Logical connection slot an operation is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// Asynchronous hierarchical storage
///
/// Paths are absolute, `/`-separated strings. Implementations must be
/// usable from many tasks at once.
pub trait StorageBackend: Send + Sync + 'static {
    /// Create a directory and any missing parents; existing directories succeed
    fn create_dir(&self, conn: ConnectionId, path: &str) -> BackendFuture<()>;

    /// Create or truncate a file and write `contents` in full
    fn write_file(&self, conn: ConnectionId, path: &str, contents: Vec<u8>) -> BackendFuture<()>;

    fn remove_file(&self, conn: ConnectionId, path: &str) -> BackendFuture<()>;

    /// Remove an empty directory
    fn remove_dir(&self, conn: ConnectionId, path: &str) -> BackendFuture<()>;

    /// Read a whole file
    fn read_file(&self, conn: ConnectionId, path: &str) -> BackendFuture<Vec<u8>>;

    /// List the immediate children of a directory
    fn list_dir(&self, conn: ConnectionId, path: &str) -> BackendFuture<Vec<DirEntry>>;
}

/// Round-robin assignment of operations to connection slots
#[derive(Debug)]
pub struct ConnectionPool {
    size: usize,
    next: AtomicUsize,
}

impl ConnectionPool {
    /// Pool of `size` slots; a size of 0 is treated as 1
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            next: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slot for the next issued operation
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed) % self.size)
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTIONS)
    }
}

/// Join a directory path and a child name
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Strip trailing slashes, keeping a lone `/`
pub fn trim_trailing_slashes(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}
