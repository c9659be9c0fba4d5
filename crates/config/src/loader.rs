//! Reads job configuration documents from disk and resolves `extends`
//! chains into one layered document.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::job_config::JobConfig;
use crate::partial::PartialJobConfig;

/// Loads job configuration files, resolving `extends` chains.
///
/// A relative `extends` path is resolved against the directory of the file
/// that declares it. The child document is layered over its base.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    max_depth: usize,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self { max_depth: 16 }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Load and validate the config at `path`.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<JobConfig, ConfigError> {
        let partial = self.load_partial(path)?;
        JobConfig::from_partial(&partial)
    }

    /// Load the merged, unvalidated document at `path`.
    pub fn load_partial(&self, path: impl AsRef<Path>) -> Result<PartialJobConfig, ConfigError> {
        let mut seen = HashSet::new();
        self.resolve(path.as_ref(), &mut seen, 0)
    }

    /// Resolve the `extends` of an inline document, relative to `base_dir`.
    pub fn resolve_inline(
        &self,
        raw: &str,
        base_dir: impl AsRef<Path>,
    ) -> Result<PartialJobConfig, ConfigError> {
        let doc = PartialJobConfig::from_json(raw)?;
        let Some(parent) = doc.extends.as_deref() else {
            return Ok(doc);
        };
        let mut seen = HashSet::new();
        let base = self.resolve(&base_dir.as_ref().join(parent), &mut seen, 1)?;
        Ok(base.merge(&doc))
    }

    fn resolve(
        &self,
        path: &Path,
        seen: &mut HashSet<PathBuf>,
        depth: usize,
    ) -> Result<PartialJobConfig, ConfigError> {
        let canonical = fs::canonicalize(path).map_err(|e| io_error(path, e))?;
        if depth > self.max_depth || !seen.insert(canonical.clone()) {
            return Err(ConfigError::ExtendsCycle(canonical.display().to_string()));
        }

        let raw = fs::read_to_string(&canonical).map_err(|e| io_error(path, e))?;
        let doc = PartialJobConfig::from_json(&raw)?;

        let Some(parent) = doc.extends.as_deref() else {
            return Ok(doc);
        };

        let dir = canonical.parent().unwrap_or_else(|| Path::new("."));
        tracing::debug!(config = %canonical.display(), extends = parent, "resolving config base");
        let base = self.resolve(&dir.join(parent), seen, depth + 1)?;
        Ok(base.merge(&doc))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn child_overrides_base_fields() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "base.json",
            r#"{
                "handler": "count_records",
                "input": { "path": "/in.jsonl", "format": "jsonl" },
                "output": { "location": "/out" },
                "advanced": { "batch_size": 500 }
            }"#,
        );
        let child = write(
            dir.path(),
            "child.json",
            r#"{ "extends": "base.json", "name": "child", "advanced": { "max_attempts": 5 } }"#,
        );

        let config = ConfigLoader::new().load(child).unwrap();
        assert_eq!(config.name, "child");
        assert_eq!(config.handler, "count_records");
        assert_eq!(config.advanced.batch_size, 500);
        assert_eq!(config.advanced.max_attempts, 5);
    }

    #[test]
    fn extends_resolves_relative_to_declaring_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("shared")).unwrap();
        write(
            &dir.path().join("shared"),
            "root.json",
            r#"{ "handler": "passthrough" }"#,
        );
        write(
            &dir.path().join("shared"),
            "mid.json",
            r#"{ "extends": "root.json", "priority": "high" }"#,
        );
        let leaf = write(
            dir.path(),
            "leaf.json",
            r#"{ "extends": "shared/mid.json", "name": "leaf" }"#,
        );

        let merged = ConfigLoader::new().load_partial(leaf).unwrap();
        assert_eq!(merged.handler.as_deref(), Some("passthrough"));
        assert_eq!(merged.priority.as_deref(), Some("high"));
        assert_eq!(merged.name.as_deref(), Some("leaf"));
    }

    #[test]
    fn cycles_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", r#"{ "extends": "b.json" }"#);
        let b = write(dir.path(), "b.json", r#"{ "extends": "a.json" }"#);

        let err = ConfigLoader::new().load_partial(b).unwrap_err();
        assert!(matches!(err, ConfigError::ExtendsCycle(_)));
    }

    #[test]
    fn missing_base_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let child = write(dir.path(), "child.json", r#"{ "extends": "nope.json" }"#);

        let err = ConfigLoader::new().load_partial(child).unwrap_err();
        assert!(matches!(err, ConfigError::Io { path, .. } if path.ends_with("nope.json")));
    }

    #[test]
    fn inline_documents_can_extend_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "base.json", r#"{ "handler": "uppercase_text" }"#);

        let merged = ConfigLoader::new()
            .resolve_inline(r#"{ "extends": "base.json", "name": "inline" }"#, dir.path())
            .unwrap();
        assert_eq!(merged.handler.as_deref(), Some("uppercase_text"));
        assert_eq!(merged.name.as_deref(), Some("inline"));
    }
}
