//! Directory manifests
//!
//! A manifest records the immediate children of one directory and is stored
//! inside that directory as a file named [`MANIFEST_NAME`]:
//!
//! ```text
//! MANIFEST: /base/abcde/MANIFEST
//! ----------
//! SUBDIR: k3j9a
//! SUBDIR: zz01q
//! ----------
//! FILE: a0b1c
//! ----------
//! <sha256 hex of every line above>
//! ```
//!
//! Names are kept in ordered sets so the lexicographic order of the
//! serialization falls out of iteration order.

use super::{sha256_hex, text_field, RecordReader, SEPARATOR};
use crate::backend::DirEntry;
use crate::error::FormatError;
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// File name under which every directory stores its manifest
pub const MANIFEST_NAME: &str = "MANIFEST";

const HEADER_PREFIX: &str = "MANIFEST: ";
const SUBDIR_PREFIX: &str = "SUBDIR: ";
const FILE_PREFIX: &str = "FILE: ";

/// Canonical record of a directory's immediate child names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    path: String,
    subdirs: BTreeSet<String>,
    files: BTreeSet<String>,
}

impl Manifest {
    /// Empty manifest stored at `path` (the manifest file's own path)
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Path of the manifest file itself
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Directory the manifest describes
    pub fn directory(&self) -> &str {
        parent_path(&self.path)
    }

    /// True if `name` is taken by a file or a subdirectory
    pub fn contains(&self, name: &str) -> bool {
        self.files.contains(name) || self.subdirs.contains(name)
    }

    /// Add a file name unless the name is already taken or not storable
    pub fn try_add_file(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        is_entry_name(&name) && !self.subdirs.contains(&name) && self.files.insert(name)
    }

    /// Add a subdirectory name unless the name is already taken or not storable
    pub fn try_add_subdir(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        is_entry_name(&name) && !self.files.contains(&name) && self.subdirs.insert(name)
    }

    /// Remove and return the lexicographically smallest file name
    pub fn pop_file(&mut self) -> Option<String> {
        self.files.pop_first()
    }

    /// Remove and return the lexicographically smallest subdirectory name
    pub fn pop_subdir(&mut self) -> Option<String> {
        self.subdirs.pop_first()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn subdir_count(&self) -> usize {
        self.subdirs.len()
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    pub fn subdirs(&self) -> impl Iterator<Item = &str> {
        self.subdirs.iter().map(String::as_str)
    }

    /// Serialization up to, not including, the checksum line
    pub fn body(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}{}", HEADER_PREFIX, self.path);
        let _ = writeln!(out, "{}", SEPARATOR);
        for subdir in &self.subdirs {
            let _ = writeln!(out, "{}{}", SUBDIR_PREFIX, subdir);
        }
        let _ = writeln!(out, "{}", SEPARATOR);
        for file in &self.files {
            let _ = writeln!(out, "{}{}", FILE_PREFIX, file);
        }
        let _ = writeln!(out, "{}", SEPARATOR);
        out
    }

    /// SHA-256 hex of [`body`](Self::body)
    pub fn checksum(&self) -> String {
        sha256_hex(self.body().as_bytes())
    }

    /// Full serialization, checksum line included
    pub fn serialize(&self) -> String {
        let mut out = self.body();
        out.push_str(&sha256_hex(out.as_bytes()));
        out.push('\n');
        out
    }

    /// Strictly parse a serialized manifest.
    ///
    /// Only canonical input is accepted: names must be strictly increasing
    /// within each section and unique across both, so a parsed manifest
    /// re-serializes to exactly `data`.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let mut reader = RecordReader::new(data);

        let path = text_field(reader.prefixed_line(HEADER_PREFIX)?, "manifest path")?;
        let mut manifest = Manifest::new(path);
        reader.separator()?;

        let mut last: Option<String> = None;
        while let Some(name) = section_entry(&mut reader, SUBDIR_PREFIX, &last)? {
            if !manifest.try_add_subdir(name.clone()) {
                return Err(FormatError::NonCanonical { name });
            }
            last = Some(name);
        }

        let mut last: Option<String> = None;
        while let Some(name) = section_entry(&mut reader, FILE_PREFIX, &last)? {
            if !manifest.try_add_file(name.clone()) {
                return Err(FormatError::NonCanonical { name });
            }
            last = Some(name);
        }

        reader.finish()?;
        Ok(manifest)
    }

    /// Compare against a backend listing of the described directory.
    ///
    /// The manifest file itself is expected in the listing and ignored.
    pub fn cross_check(&self, listing: &[DirEntry]) -> ListingDiff {
        let mut listed_dirs = BTreeSet::new();
        let mut listed_files = BTreeSet::new();

        for entry in listing {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            if entry.is_dir {
                listed_dirs.insert(entry.name.as_str());
            } else if entry.name != MANIFEST_NAME {
                listed_files.insert(entry.name.as_str());
            }
        }

        let expected_dirs: BTreeSet<&str> = self.subdirs().collect();
        let expected_files: BTreeSet<&str> = self.files().collect();

        ListingDiff {
            missing_subdirs: owned(expected_dirs.difference(&listed_dirs).copied()),
            unexpected_subdirs: owned(listed_dirs.difference(&expected_dirs).copied()),
            missing_files: owned(expected_files.difference(&listed_files).copied()),
            unexpected_files: owned(listed_files.difference(&expected_files).copied()),
        }
    }
}

/// Read one `<prefix><name>` line, or `None` at the closing separator
fn section_entry(
    reader: &mut RecordReader<'_>,
    prefix: &'static str,
    last: &Option<String>,
) -> Result<Option<String>, FormatError> {
    let line = reader.line()?;
    if line == SEPARATOR.as_bytes() {
        return Ok(None);
    }

    let name = line
        .strip_prefix(prefix.as_bytes())
        .ok_or(FormatError::MissingPrefix { expected: prefix })?;
    let name = text_field(name, "entry name")?;

    if last.as_deref().is_some_and(|prev| prev >= name.as_str()) {
        return Err(FormatError::NonCanonical { name });
    }
    Ok(Some(name))
}

fn owned<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    names.map(str::to_string).collect()
}

/// Names must fit on one non-empty line of the serialization
fn is_entry_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('\n')
}

/// Strip the last path component: `/a/b/c` -> `/a/b`
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => {
            if path.starts_with('/') {
                "/"
            } else {
                ""
            }
        }
        Some(idx) => &path[..idx],
    }
}

/// Differences between a manifest and the listing of its directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingDiff {
    pub missing_subdirs: Vec<String>,
    pub unexpected_subdirs: Vec<String>,
    pub missing_files: Vec<String>,
    pub unexpected_files: Vec<String>,
}

impl ListingDiff {
    /// True iff listing and manifest agree exactly
    pub fn is_empty(&self) -> bool {
        self.missing_subdirs.is_empty()
            && self.unexpected_subdirs.is_empty()
            && self.missing_files.is_empty()
            && self.unexpected_files.is_empty()
    }

    /// One-line human-readable summary
    pub fn summary(&self) -> String {
        let sections = [
            ("missing subdirs", &self.missing_subdirs),
            ("unexpected subdirs", &self.unexpected_subdirs),
            ("missing files", &self.missing_files),
            ("unexpected files", &self.unexpected_files),
        ];

        sections
            .iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(label, names)| format!("{}: [{}]", label, names.join(", ")))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
