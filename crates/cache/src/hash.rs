//! Content hashes for page buffers

use std::fmt;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest identifying page content.
///
/// Used as the key for upscale results, both in memory and on disk, so the
/// same image shared by two documents is only processed once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw page bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Stable surrogate for content that should not be read in full,
    /// derived from an identifier such as a path plus modification time.
    pub fn surrogate(identifier: &str) -> Self {
        Self::of(identifier.as_bytes())
    }

    /// Parse a previously rendered hash. Accepts 64 hex digits, any case.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let hash = ContentHash::of(b"abc");
        assert_eq!(
            hash.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_same_bytes_same_hash() {
        assert_eq!(ContentHash::of(&[1, 2, 3]), ContentHash::of(&[1, 2, 3]));
        assert_ne!(ContentHash::of(&[1, 2, 3]), ContentHash::of(&[3, 2, 1]));
    }

    #[test]
    fn test_from_hex() {
        let hash = ContentHash::of(b"page");
        let upper = hash.as_str().to_ascii_uppercase();
        assert_eq!(ContentHash::from_hex(&upper), Some(hash));
        assert_eq!(ContentHash::from_hex("abc"), None);
        assert_eq!(ContentHash::from_hex(&"z".repeat(64)), None);
    }

    #[test]
    fn test_surrogate_is_stable() {
        let a = ContentHash::surrogate("/books/vol1/001.png:1700000000");
        let b = ContentHash::surrogate("/books/vol1/001.png:1700000000");
        assert_eq!(a, b);
        assert_eq!(a.to_string().len(), 64);
    }
}
