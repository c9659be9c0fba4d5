use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use jobforge_core::{Checksum, ExpectedVersion};

use crate::backend::{ManifestBackend, StoredEntry};
use crate::error::{ManifestError, ManifestResult};

/// In-memory manifest backend.
///
/// Intended for tests and the local runner. Entries live in a sorted map so
/// prefix listing is a range scan.
#[derive(Debug, Default)]
pub struct InMemoryManifestBackend {
    entries: RwLock<BTreeMap<String, StoredEntry>>,
    writes: AtomicU64,
    conflicts: AtomicU64,
}

impl InMemoryManifestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful writes since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Rejected conditional writes since creation.
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Overwrite the stored bytes of `key` without touching its checksum or
    /// version. Returns `false` if the key does not exist.
    pub fn inject_corruption(&self, key: &str, bytes: &[u8]) -> bool {
        let Ok(mut entries) = self.entries.write() else {
            return false;
        };
        match entries.get_mut(key) {
            Some(entry) => {
                entry.value = bytes.to_vec();
                true
            }
            None => false,
        }
    }
}

impl ManifestBackend for InMemoryManifestBackend {
    fn conditional_put(
        &self,
        key: &str,
        value: Vec<u8>,
        checksum: Checksum,
        expected: ExpectedVersion,
    ) -> ManifestResult<u64> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ManifestError::backend("lock poisoned"))?;

        let actual = entries.get(key).map(|e| e.version);
        if !expected.matches(actual) {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            return Err(ManifestError::Conflict {
                key: key.to_string(),
                expected,
                actual,
            });
        }

        let version = expected.next();
        entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                version,
                checksum,
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(version)
    }

    fn get(&self, key: &str) -> ManifestResult<Option<StoredEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ManifestError::backend("lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn list(&self, prefix: &str) -> ManifestResult<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ManifestError::backend("lock poisoned"))?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(b: &InMemoryManifestBackend, key: &str, body: &str, expected: ExpectedVersion) -> ManifestResult<u64> {
        b.conditional_put(key, body.as_bytes().to_vec(), Checksum::of(body.as_bytes()), expected)
    }

    #[test]
    fn versions_increase_monotonically() {
        let b = InMemoryManifestBackend::new();
        assert_eq!(put(&b, "k", "a", ExpectedVersion::Absent).unwrap(), 1);
        assert_eq!(put(&b, "k", "b", ExpectedVersion::Exact(1)).unwrap(), 2);
        assert_eq!(b.get("k").unwrap().unwrap().value, b"b".to_vec());
        assert_eq!(b.write_count(), 2);
    }

    #[test]
    fn stale_expectation_is_rejected() {
        let b = InMemoryManifestBackend::new();
        put(&b, "k", "a", ExpectedVersion::Absent).unwrap();
        put(&b, "k", "b", ExpectedVersion::Exact(1)).unwrap();

        let err = put(&b, "k", "c", ExpectedVersion::Exact(1)).unwrap_err();
        assert_eq!(
            err,
            ManifestError::Conflict {
                key: "k".into(),
                expected: ExpectedVersion::Exact(1),
                actual: Some(2),
            }
        );
        assert!(put(&b, "k", "c", ExpectedVersion::Absent).unwrap_err().is_conflict());
        assert_eq!(b.conflict_count(), 2);
    }

    #[test]
    fn list_is_prefix_scoped_and_sorted() {
        let b = InMemoryManifestBackend::new();
        for key in ["task/j1/b", "task/j1/a", "task/j2/a", "job/j1"] {
            put(&b, key, "{}", ExpectedVersion::Absent).unwrap();
        }
        assert_eq!(b.list("task/j1/").unwrap(), vec!["task/j1/a", "task/j1/b"]);
        assert_eq!(b.list("job/").unwrap(), vec!["job/j1"]);
        assert!(b.list("result/").unwrap().is_empty());
    }

    #[test]
    fn corruption_keeps_version_and_checksum() {
        let b = InMemoryManifestBackend::new();
        put(&b, "k", "a", ExpectedVersion::Absent).unwrap();
        assert!(b.inject_corruption("k", b"garbage"));
        let entry = b.get("k").unwrap().unwrap();
        assert_eq!(entry.version, 1);
        assert!(!entry.checksum.verify(&entry.value));
        assert!(!b.inject_corruption("missing", b"x"));
    }
}
