use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use jobforge_core::{Checksum, ExpectedVersion};

use crate::backend::{ManifestBackend, StoredEntry};
use crate::error::{ManifestError, ManifestResult};

/// On-disk form of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u64,
    checksum: Checksum,
    value: String,
}

/// Manifest backend storing one file per key under a root directory.
///
/// Each write goes to a temporary file that is renamed over the target, so a
/// crash leaves either the old or the new entry. Conditional writes are
/// serialized within this process only; several processes must not share a
/// root.
#[derive(Debug)]
pub struct DirectoryManifestBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DirectoryManifestBackend {
    pub fn open(root: impl Into<PathBuf>) -> ManifestResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        path.set_extension("entry");
        path
    }

    fn read_envelope(&self, path: &Path) -> ManifestResult<Option<Envelope>> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ManifestError::backend(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, e)),
        }
    }

    fn collect_keys(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> ManifestResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_error(dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_keys(&path, prefix, out)?;
            } else if path.extension().is_some_and(|ext| ext == "entry") {
                let Ok(relative) = path.with_extension("").strip_prefix(&self.root).map(Path::to_path_buf) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

impl ManifestBackend for DirectoryManifestBackend {
    fn conditional_put(
        &self,
        key: &str,
        value: Vec<u8>,
        checksum: Checksum,
        expected: ExpectedVersion,
    ) -> ManifestResult<u64> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ManifestError::backend("lock poisoned"))?;

        let path = self.path_for(key);
        let actual = self.read_envelope(&path)?.map(|e| e.version);
        if !expected.matches(actual) {
            return Err(ManifestError::Conflict {
                key: key.to_string(),
                expected,
                actual,
            });
        }

        let version = expected.next();
        let envelope = Envelope {
            version,
            checksum,
            value: String::from_utf8(value)
                .map_err(|e| ManifestError::backend(format!("{key}: value is not UTF-8: {e}")))?,
        };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| ManifestError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let tmp = path.with_extension("entry.tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| io_error(&tmp, e))?;
        file.sync_all().map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;

        Ok(version)
    }

    fn get(&self, key: &str) -> ManifestResult<Option<StoredEntry>> {
        Ok(self.read_envelope(&self.path_for(key))?.map(|e| StoredEntry {
            value: e.value.into_bytes(),
            version: e.version,
            checksum: e.checksum,
        }))
    }

    fn list(&self, prefix: &str) -> ManifestResult<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, prefix, &mut keys)?;
        keys.sort();
        Ok(keys)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ManifestError {
    ManifestError::backend(format!("{}: {e}", path.display()))
}
