//! Content checksums for captured images.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Lowercase hex SHA-256 digest of an image file's bytes.
///
/// The checksum is the identity of an image across devices: the merge step
/// deduplicates on it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Hashes an in-memory buffer.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Hashes a file by streaming its contents.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Parses a hex digest, accepting upper or lower case.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(trimmed.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Returns true if this looks like a well-formed SHA-256 hex digest.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 64
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in log lines and file names.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.short())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_known_bytes() {
        let sum = Checksum::of_bytes(b"abc");
        assert_eq!(
            sum.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(sum.is_well_formed());
    }

    #[test]
    fn checksum_of_file_matches_bytes() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("frame.bin");
        let payload = vec![7u8; 200_000];
        std::fs::write(&path, &payload).expect("write payload");

        assert_eq!(
            Checksum::of_file(&path).expect("hash file"),
            Checksum::of_bytes(&payload)
        );
    }

    #[test]
    fn parse_normalizes_case() {
        let upper = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        let parsed = Checksum::parse(upper).expect("valid digest");
        assert_eq!(parsed, Checksum::of_bytes(b"abc"));
        assert!(Checksum::parse("not-a-digest").is_none());
    }
}
