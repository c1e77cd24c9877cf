//! Exact content hashing.
//!
//! The shared blocklist is keyed by a cryptographic digest of the raw bytes,
//! so two files only match when they are byte-for-byte identical. Visual
//! similarity across re-encodes is handled separately by
//! [`perceptual`](crate::perceptual).

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const CONTENT_HASH_HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 digest of an attachment's raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the given bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use mediagate_core::ContentHash;
    ///
    /// let hash = ContentHash::of(b"");
    /// assert_eq!(
    ///     hash.as_str(),
    ///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    /// );
    /// ```
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(hex::encode(digest))
    }

    /// Parse an existing hex digest, normalizing it to lowercase.
    ///
    /// Returns `None` unless the input is exactly 64 hex characters.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if value.len() != CONTENT_HASH_HEX_LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(value.to_ascii_lowercase()))
    }

    /// Return the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_hash_identically() {
        assert_eq!(ContentHash::of(b"payload"), ContentHash::of(b"payload"));
        assert_ne!(ContentHash::of(b"payload"), ContentHash::of(b"payload!"));
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let hash = ContentHash::of(b"Test image content");
        assert_eq!(hash.as_str().len(), CONTENT_HASH_HEX_LEN);
        assert!(
            hash.as_str()
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        );
    }

    #[test]
    fn parse_normalizes_case() {
        let upper = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855";
        let parsed = ContentHash::parse(upper).unwrap();
        assert_eq!(parsed, ContentHash::of(b""));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(ContentHash::parse("abc").is_none());
        assert!(ContentHash::parse(&"z".repeat(64)).is_none());
    }
}
