//! Self-checked file payloads
//!
//! Every generated file carries the path it was written to, its payload
//! length, the payload itself and a trailing checksum, so both corruption
//! and misplacement are detectable from the file alone:
//!
//! ```text
//! FILENAME: /eos/pps/base/f1
//! RANDOM-BYTES: 17
//! ----------
//! some random bytes
//! ----------
//! 3d5b6e328474107d6a1c6d61d92a160e0d1eb4d3c3b99bc8574ebde0fba02eba
//! ```
//!
//! The payload may contain newlines; it is delimited by the declared byte
//! count, never by scanning.

use super::{sha256_hex, text_field, RecordReader, SEPARATOR};
use crate::error::FormatError;
use crate::status::TestStatus;

const FILENAME_PREFIX: &str = "FILENAME: ";
const LENGTH_PREFIX: &str = "RANDOM-BYTES: ";

/// A payload bound to the path it belongs at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfCheckedFile {
    path: String,
    payload: Vec<u8>,
}

impl SelfCheckedFile {
    pub fn new(path: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            payload: payload.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialization up to, not including, the checksum line
    pub fn body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + self.path.len() + 64);
        out.extend_from_slice(FILENAME_PREFIX.as_bytes());
        out.extend_from_slice(self.path.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(LENGTH_PREFIX.as_bytes());
        out.extend_from_slice(self.payload.len().to_string().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(SEPARATOR.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&self.payload);
        out.push(b'\n');
        out.extend_from_slice(SEPARATOR.as_bytes());
        out.push(b'\n');
        out
    }

    /// SHA-256 hex of [`body`](Self::body), recomputed on every call
    pub fn checksum(&self) -> String {
        sha256_hex(&self.body())
    }

    /// Full serialization, checksum line included
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.body();
        let checksum = sha256_hex(&out);
        out.extend_from_slice(checksum.as_bytes());
        out.push(b'\n');
        out
    }

    /// Strictly parse a serialized self-checked file
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let mut reader = RecordReader::new(data);

        let path = text_field(reader.prefixed_line(FILENAME_PREFIX)?, "filename")?;
        let length = parse_length(reader.prefixed_line(LENGTH_PREFIX)?)?;
        reader.separator()?;

        let payload = reader.take(length)?.to_vec();
        reader.newline()?;
        reader.separator()?;
        reader.finish()?;

        Ok(Self { path, payload })
    }

    /// Parse `data` and check that it was stored at `expected_path`
    pub fn validate(data: &[u8], expected_path: &str) -> TestStatus {
        match Self::parse(data) {
            Err(e) => TestStatus::from_error(format!(
                "Could not parse self-checked file {}: {}",
                expected_path, e
            )),
            Ok(file) if file.path != expected_path => TestStatus::from_error(format!(
                "Mismatch between expected filename {} and included one: {}",
                expected_path, file.path
            )),
            Ok(_) => TestStatus::new(),
        }
    }
}

/// Canonical unsigned decimal: no sign, no leading zeros, fits in usize
fn parse_length(value: &[u8]) -> Result<usize, FormatError> {
    let invalid = || FormatError::InvalidLength {
        value: String::from_utf8_lossy(value).into_owned(),
    };

    let canonical = !value.is_empty()
        && value.iter().all(u8::is_ascii_digit)
        && (value.len() == 1 || value[0] != b'0');
    if !canonical {
        return Err(invalid());
    }

    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(invalid)
}
