use std::sync::Arc;

use jobforge_core::{Checksum, ExpectedVersion};

use crate::error::ManifestResult;

/// A raw entry as held by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub value: Vec<u8>,
    /// Starts at 1 and increases by one on every successful write.
    pub version: u64,
    /// Checksum supplied by the writer; verified by readers, never by the backend.
    pub checksum: Checksum,
}

/// Versioned key/value storage underneath the manifest store.
///
/// Implementations must:
/// - apply `conditional_put` atomically: the expectation check and the write
///   either both happen or neither does
/// - assign `version = previous + 1` (or `1` on create)
/// - return keys from `list` in lexicographic order
///
/// There is no unconditional put and no delete.
pub trait ManifestBackend: Send + Sync {
    /// Write `value` if the stored version matches `expected`.
    ///
    /// Returns the new version, or `ManifestError::Conflict`.
    fn conditional_put(
        &self,
        key: &str,
        value: Vec<u8>,
        checksum: Checksum,
        expected: ExpectedVersion,
    ) -> ManifestResult<u64>;

    fn get(&self, key: &str) -> ManifestResult<Option<StoredEntry>>;

    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> ManifestResult<Vec<String>>;
}

impl<B> ManifestBackend for Arc<B>
where
    B: ManifestBackend + ?Sized,
{
    fn conditional_put(
        &self,
        key: &str,
        value: Vec<u8>,
        checksum: Checksum,
        expected: ExpectedVersion,
    ) -> ManifestResult<u64> {
        (**self).conditional_put(key, value, checksum, expected)
    }

    fn get(&self, key: &str) -> ManifestResult<Option<StoredEntry>> {
        (**self).get(key)
    }

    fn list(&self, prefix: &str) -> ManifestResult<Vec<String>> {
        (**self).list(prefix)
    }
}
