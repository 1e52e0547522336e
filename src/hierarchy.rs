//! Deterministic synthetic namespace generator
//!
//! [`HierarchyBuilder`] lazily yields every entry of a pseudo-random tree in
//! depth-first pre-order:
//!
//! 1. the base directory itself
//! 2. for each directory: its `MANIFEST`, its files in lexicographic order,
//!    then for each subdirectory (lexicographic) the directory entry
//!    followed by that subdirectory's own contents
//!
//! The sequence depends only on `(seed, depth, files)`. Traversal state
//! lives on an explicit stack, so arbitrarily deep trees never touch the
//! native call stack.
//!
//! # Budget
//!
//! `files` bounds the number of file-type entries (regular files plus one
//! manifest per directory). The base manifest reserves one slot up front;
//! entering a directory grants it `min(draw + 1, budget)` files and then
//! `min(draw, remaining)` subdirectories, each subdirectory slot paying for
//! that subdirectory's manifest. Every name written into a manifest is
//! therefore materialized.

use crate::backend::join_path;
use crate::content::{Manifest, SelfCheckedFile, MANIFEST_NAME};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Length of generated file and directory names
pub const NAME_LEN: usize = 5;

/// Upper bound of the per-directory file and subdirectory draws
pub const MAX_FANOUT: u64 = 10;

/// Upper bound of a generated payload, in bytes
pub const MAX_PAYLOAD: usize = 256;

const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Parameters of a generated tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyOptions {
    /// Absolute path of the tree root
    pub base: String,
    pub seed: u64,
    /// Deepest level that may still contain subdirectories is `depth - 1`
    pub depth: usize,
    /// Budget of file-type entries, manifests included
    pub files: u64,
}

impl HierarchyOptions {
    pub fn new(base: impl Into<String>, seed: u64, depth: usize, files: u64) -> Self {
        Self {
            base: base.into(),
            seed,
            depth,
            files,
        }
    }
}

/// One generated entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyEntry {
    /// Absolute path, rooted at the base
    pub path: String,
    pub is_dir: bool,
    /// Serialized content; empty for directories
    pub contents: Vec<u8>,
}

impl HierarchyEntry {
    fn dir(path: String) -> Self {
        Self {
            path,
            is_dir: true,
            contents: Vec::new(),
        }
    }

    fn file(path: String, contents: Vec<u8>) -> Self {
        Self {
            path,
            is_dir: false,
            contents,
        }
    }

    /// True for `MANIFEST` entries
    pub fn is_manifest(&self) -> bool {
        !self.is_dir && self.path.rsplit('/').next() == Some(MANIFEST_NAME)
    }
}

/// A directory whose children are still being emitted
#[derive(Debug)]
struct Frame {
    dir: String,
    depth: usize,
    manifest: Manifest,
    manifest_emitted: bool,
}

/// Lazy, single-pass producer of a synthetic tree
///
/// Not restartable: the budget is consumed as directories are entered.
#[derive(Debug)]
pub struct HierarchyBuilder {
    rng: ChaCha8Rng,
    budget: u64,
    max_depth: usize,
    pending_root: Option<String>,
    stack: Vec<Frame>,
}

impl HierarchyBuilder {
    pub fn new(options: HierarchyOptions) -> Self {
        let mut builder = Self {
            rng: ChaCha8Rng::seed_from_u64(options.seed),
            budget: options.files,
            max_depth: options.depth,
            pending_root: None,
            stack: Vec::new(),
        };

        if builder.budget > 0 {
            builder.budget -= 1;
            let root = builder.enter(options.base.clone(), 0);
            builder.stack.push(root);
            builder.pending_root = Some(options.base);
        }
        builder
    }

    /// Allocate a directory's children out of the budget
    fn enter(&mut self, dir: String, depth: usize) -> Frame {
        let mut manifest = Manifest::new(join_path(&dir, MANIFEST_NAME));

        let files = (self.rng.gen_range(0..=MAX_FANOUT) + 1).min(self.budget);
        self.budget -= files;

        let subdirs = if depth < self.max_depth {
            self.rng.gen_range(0..=MAX_FANOUT).max(1).min(self.budget)
        } else {
            0
        };
        self.budget -= subdirs;

        for _ in 0..files {
            loop {
                let name = self.random_name();
                if manifest.try_add_file(name) {
                    break;
                }
            }
        }
        for _ in 0..subdirs {
            loop {
                let name = self.random_name();
                if manifest.try_add_subdir(name) {
                    break;
                }
            }
        }

        Frame {
            dir,
            depth,
            manifest,
            manifest_emitted: false,
        }
    }

    // Draws use fixed-width integers; usize ranges sample differently on
    // 32-bit and 64-bit targets.
    fn random_name(&mut self) -> String {
        (0..NAME_LEN)
            .map(|_| {
                let idx = self.rng.gen_range(0..NAME_ALPHABET.len() as u32);
                NAME_ALPHABET[idx as usize] as char
            })
            .collect()
    }

    fn random_payload(&mut self) -> Vec<u8> {
        let len = self.rng.gen_range(1..=MAX_PAYLOAD as u32);
        (0..len).map(|_| self.rng.gen_range(0x20u8..=0x7e)).collect()
    }
}

impl Iterator for HierarchyBuilder {
    type Item = HierarchyEntry;

    fn next(&mut self) -> Option<HierarchyEntry> {
        if let Some(root) = self.pending_root.take() {
            return Some(HierarchyEntry::dir(root));
        }

        loop {
            let frame = self.stack.last_mut()?;

            if !frame.manifest_emitted {
                frame.manifest_emitted = true;
                let contents = frame.manifest.serialize().into_bytes();
                return Some(HierarchyEntry::file(frame.manifest.path().to_string(), contents));
            }

            if let Some(name) = frame.manifest.pop_file() {
                let path = join_path(&frame.dir, &name);
                let payload = self.random_payload();
                let contents = SelfCheckedFile::new(path.clone(), payload).serialize();
                return Some(HierarchyEntry::file(path, contents));
            }

            if let Some(name) = frame.manifest.pop_subdir() {
                let path = join_path(&frame.dir, &name);
                let depth = frame.depth + 1;
                let child = self.enter(path.clone(), depth);
                self.stack.push(child);
                return Some(HierarchyEntry::dir(path));
            }

            self.stack.pop();
        }
    }
}
