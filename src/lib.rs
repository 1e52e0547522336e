//! tree-tester - Correctness and Stress Tester for Hierarchical Storage
//!
//! Builds deterministic, self-verifying directory trees on a storage system
//! and later re-derives them to check their integrity.
//!
//! # Features
//!
//! - **Deterministic Generation**: A tree is fully determined by
//!   `(seed, depth, files)`; nothing has to be remembered between a build
//!   and its validation.
//!
//! - **Self-Describing Content**: Every directory holds a checksummed
//!   `MANIFEST` listing its children; every file embeds its own path and
//!   checksum, so corruption and misplacement are both detectable.
//!
//! - **Bounded Concurrency**: Thousands of asynchronous operations stay in
//!   flight, spread over a pool of logical connections, with a fixed
//!   in-flight window providing backpressure.
//!
//! - **Complete Reports**: Validation never stops at the first defect; the
//!   result is a [`TestStatus`] tree holding every defect found.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐             ┌──────────────────────┐
//! │  HierarchyBuilder    │   entries   │     TreeBuilder      │
//! │  (seeded, lazy)      ├────────────►│  window-bounded      │
//! └──────────────────────┘             │  pipeline            │
//!                                      └──────────┬───────────┘
//!                                                 │ mkdir / write
//!                                                 ▼
//!                                      ┌──────────────────────┐
//!                                      │   StorageBackend     │
//!                                      │   conn#0 .. conn#N   │
//!                                      └──────────┬───────────┘
//!                                                 │ list / read
//!                                                 ▼
//!                                      ┌──────────────────────┐
//!                                      │    TreeValidator     │
//!                                      │  explicit level      │
//!                                      │  stack               │
//!                                      └──────────┬───────────┘
//!                                                 ▼
//!                                            TestStatus
//! ```
//!
//! # Example
//!
//! ```bash
//! # Build a tree of 100k files
//! tree-tester tree --build /mnt/storage/base --nfiles 100000 -p
//!
//! # Validate it and keep a JSON report
//! tree-tester tree --validate /mnt/storage/base --report status.json
//! ```

pub mod backend;
pub mod config;
pub mod content;
pub mod error;
pub mod hierarchy;
pub mod progress;
pub mod status;
pub mod tree;
pub mod worker;

pub use backend::{ConnectionId, DirEntry, LocalBackend, MemoryBackend, StorageBackend};
pub use config::{CliArgs, RunConfig, TargetUrl};
pub use content::{Manifest, SelfCheckedFile};
pub use error::{BackendError, Result, TesterError};
pub use hierarchy::{HierarchyBuilder, HierarchyEntry, HierarchyOptions};
pub use status::TestStatus;
pub use tree::{TreeBuilder, TreeRun, TreeValidator};
pub use worker::{CancelToken, CooperativeWorker};
