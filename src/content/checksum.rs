//! SHA-256 checksums for generated content
//!
//! Both record kinds end with the lowercase hex SHA-256 of every byte that
//! precedes the checksum line.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const CHECKSUM_HEX_LEN: usize = 64;

/// Compute the lowercase hex SHA-256 of `content`
///
/// # Example
///
/// ```
/// use tree_tester::content::checksum::sha256_hex;
///
/// let hash = sha256_hex(b"lalalal");
/// assert_eq!(hash.len(), 64);
/// ```
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// True iff `s` looks like the output of [`sha256_hex`]
pub fn is_checksum(s: &[u8]) -> bool {
    s.len() == CHECKSUM_HEX_LEN && s.iter().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
