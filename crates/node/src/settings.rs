//! Runtime settings of the local runner, read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

pub const POLL_INTERVAL_MS: &str = "JOBFORGE_POLL_INTERVAL_MS";
pub const WORKERS: &str = "JOBFORGE_WORKERS";
pub const MAX_CONCURRENT_TASKS: &str = "JOBFORGE_MAX_CONCURRENT_TASKS";
pub const OUTPUT_DIR: &str = "JOBFORGE_OUTPUT_DIR";
pub const STATE_DIR: &str = "JOBFORGE_STATE_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub poll_interval: Duration,
    /// In-process worker pools.
    pub workers: usize,
    /// Slot threads per worker pool.
    pub max_concurrent_tasks: usize,
    /// Default `output.location` for configs that leave it out.
    pub output_dir: Option<PathBuf>,
    /// Manifest directory; `None` keeps the manifest in memory.
    pub state_dir: Option<PathBuf>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            workers: 1,
            max_concurrent_tasks: 4,
            output_dir: None,
            state_dir: None,
        }
    }
}

impl RuntimeSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset variables keep their defaults; set but unparseable ones are an
    /// error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let poll_ms: Option<u64> = parse(&lookup, POLL_INTERVAL_MS)?;
        let workers: Option<usize> = parse(&lookup, WORKERS)?;
        let slots: Option<usize> = parse(&lookup, MAX_CONCURRENT_TASKS)?;

        if workers == Some(0) {
            bail!("{WORKERS} must be at least 1");
        }
        if slots == Some(0) {
            bail!("{MAX_CONCURRENT_TASKS} must be at least 1");
        }

        Ok(Self {
            poll_interval: poll_ms.map_or(defaults.poll_interval, Duration::from_millis),
            workers: workers.unwrap_or(defaults.workers),
            max_concurrent_tasks: slots.unwrap_or(defaults.max_concurrent_tasks),
            output_dir: non_empty(lookup(OUTPUT_DIR)).map(PathBuf::from),
            state_dir: non_empty(lookup(STATE_DIR)).map(PathBuf::from),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(lookup(key)) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {key}: '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn unset_variables_use_defaults() {
        assert_eq!(RuntimeSettings::from_lookup(lookup(&[])).unwrap(), RuntimeSettings::default());
    }

    #[test]
    fn reads_every_variable() {
        let settings = RuntimeSettings::from_lookup(lookup(&[
            (POLL_INTERVAL_MS, "50"),
            (WORKERS, "2"),
            (MAX_CONCURRENT_TASKS, " 8 "),
            (OUTPUT_DIR, "/tmp/out"),
            (STATE_DIR, ""),
        ]))
        .unwrap();
        assert_eq!(settings.poll_interval, Duration::from_millis(50));
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.max_concurrent_tasks, 8);
        assert_eq!(settings.output_dir, Some(PathBuf::from("/tmp/out")));
        assert_eq!(settings.state_dir, None);
    }

    #[test]
    fn garbage_is_reported_with_the_variable_name() {
        let err = RuntimeSettings::from_lookup(lookup(&[(WORKERS, "many")])).unwrap_err();
        assert!(err.to_string().contains(WORKERS));
        assert!(RuntimeSettings::from_lookup(lookup(&[(MAX_CONCURRENT_TASKS, "0")])).is_err());
    }
}
