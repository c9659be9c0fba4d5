//! SHA-256 checksums carried by every durable write.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Hex-encoded SHA-256 digest of a stored value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    pub fn of(data: &[u8]) -> Self {
        Self(sha256_hex(data))
    }

    /// Wrap a digest received from a backend without recomputing it.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn verify(&self, data: &[u8]) -> bool {
        self.0 == sha256_hex(data)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Checksum {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental checksum over a sequence of records.
///
/// Each record is fed as its own chunk followed by a newline, so the digest of
/// a batch equals the digest of its JSON-lines rendering.
#[derive(Debug, Clone, Default)]
pub struct ChecksumBuilder {
    hasher: Sha256,
}

impl ChecksumBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.hasher.update(b"\n");
    }

    pub fn finish(self) -> Checksum {
        Checksum(format!("{:x}", self.hasher.finalize()))
    }
}
