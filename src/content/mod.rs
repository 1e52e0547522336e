//! Self-describing content formats
//!
//! Two line-oriented record kinds, both terminated by a SHA-256 checksum
//! line covering every preceding byte:
//!
//! - [`Manifest`]: the names of a directory's immediate children
//! - [`SelfCheckedFile`]: a payload bundled with the path it belongs at
//!
//! Parsing is strict: any structural deviation, checksum mismatch or
//! trailing byte is rejected, so a successfully parsed record re-serializes
//! to exactly the input bytes.

pub mod checksum;
pub mod manifest;
pub mod self_checked;

pub use checksum::sha256_hex;
pub use manifest::{ListingDiff, Manifest, MANIFEST_NAME};
pub use self_checked::SelfCheckedFile;

use crate::error::FormatError;
use checksum::is_checksum;

/// Separator line between record sections
pub(crate) const SEPARATOR: &str = "----------";

/// Forward-only reader over a serialized record
pub(crate) struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Next line without its terminating newline; the newline is required
    pub(crate) fn line(&mut self) -> Result<&'a [u8], FormatError> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(FormatError::Truncated)?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    /// Next line, which must start with `prefix`; returns the remainder
    pub(crate) fn prefixed_line(&mut self, prefix: &'static str) -> Result<&'a [u8], FormatError> {
        let line = self.line()?;
        line.strip_prefix(prefix.as_bytes())
            .ok_or(FormatError::MissingPrefix { expected: prefix })
    }

    /// Next line, which must be exactly [`SEPARATOR`]
    pub(crate) fn separator(&mut self) -> Result<(), FormatError> {
        match self.line()? {
            line if line == SEPARATOR.as_bytes() => Ok(()),
            _ => Err(FormatError::MissingSeparator),
        }
    }

    /// Exactly `n` raw bytes, newlines included
    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos.checked_add(n).ok_or(FormatError::Truncated)?;
        let bytes = self.data.get(self.pos..end).ok_or(FormatError::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    /// A single newline byte
    pub(crate) fn newline(&mut self) -> Result<(), FormatError> {
        match self.take(1)? {
            b"\n" => Ok(()),
            _ => Err(FormatError::MissingSeparator),
        }
    }

    /// Read the checksum line, which must close the record, and verify it
    /// against everything before it
    pub(crate) fn finish(mut self) -> Result<(), FormatError> {
        let body_len = self.pos;
        let recorded = self.line()?;
        if !is_checksum(recorded) {
            return Err(FormatError::MalformedChecksum);
        }

        let trailing = self.data.len() - self.pos;
        if trailing != 0 {
            return Err(FormatError::TrailingBytes { count: trailing });
        }

        let computed = sha256_hex(&self.data[..body_len]);
        if computed.as_bytes() != recorded {
            return Err(FormatError::ChecksumMismatch {
                recorded: String::from_utf8_lossy(recorded).into_owned(),
                computed,
            });
        }
        Ok(())
    }
}

/// Decode a non-empty UTF-8 header field
pub(crate) fn text_field(bytes: &[u8], field: &'static str) -> Result<String, FormatError> {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(FormatError::InvalidField { field }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_line() {
        let mut reader = RecordReader::new(b"FILENAME: adgfas\nasdfa");
        assert_eq!(reader.prefixed_line("FILENAME: ").unwrap(), b"adgfas");
        assert_eq!(reader.line(), Err(FormatError::Truncated));

        let mut reader = RecordReader::new(b"FILENAME:: adgfas\n");
        assert!(matches!(
            reader.prefixed_line("FILENAME: "),
            Err(FormatError::MissingPrefix { .. })
        ));

        let mut reader = RecordReader::new(b"FILENAME: adgfas");
        assert_eq!(reader.prefixed_line("FILENAME: "), Err(FormatError::Truncated));
    }

    #[test]
    fn test_take_counts_raw_bytes() {
        let mut reader = RecordReader::new(b"a\nb\nc");
        assert_eq!(reader.take(3).unwrap(), b"a\nb");
        assert!(reader.newline().is_ok());
        assert_eq!(reader.take(2), Err(FormatError::Truncated));
    }
}
