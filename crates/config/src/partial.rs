//! Partially specified job configuration, as written by users.
//!
//! Every field is optional so that a document can be either a complete job
//! description or an override layered on top of a base.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialJobConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<PartialInputConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute: Option<PartialComputeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PartialOutputConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<PartialNotificationSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced: Option<PartialAdvancedConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialInputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialComputeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tasks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialOutputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialNotificationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialAdvancedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
}

/// `overlay` wins wherever it has a value.
fn pick<T: Clone>(base: &Option<T>, overlay: &Option<T>) -> Option<T> {
    overlay.clone().or_else(|| base.clone())
}

fn merge_section<T, F>(base: &Option<T>, overlay: &Option<T>, merge: F) -> Option<T>
where
    T: Clone,
    F: FnOnce(&T, &T) -> T,
{
    match (base, overlay) {
        (Some(b), Some(o)) => Some(merge(b, o)),
        (b, o) => pick(b, o),
    }
}

impl PartialJobConfig {
    /// Parse a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Syntax(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Layer `overlay` over `self`, field by field; `overlay` wins.
    ///
    /// `extends` is never inherited: it names the base of the document that
    /// declares it.
    pub fn merge(&self, overlay: &PartialJobConfig) -> PartialJobConfig {
        PartialJobConfig {
            extends: overlay.extends.clone(),
            name: pick(&self.name, &overlay.name),
            description: pick(&self.description, &overlay.description),
            priority: pick(&self.priority, &overlay.priority),
            handler: pick(&self.handler, &overlay.handler),
            input: merge_section(&self.input, &overlay.input, PartialInputConfig::merge),
            compute: merge_section(&self.compute, &overlay.compute, PartialComputeConfig::merge),
            output: merge_section(&self.output, &overlay.output, PartialOutputConfig::merge),
            notifications: merge_section(
                &self.notifications,
                &overlay.notifications,
                PartialNotificationSettings::merge,
            ),
            advanced: merge_section(&self.advanced, &overlay.advanced, PartialAdvancedConfig::merge),
        }
    }
}

impl PartialInputConfig {
    pub fn merge(&self, o: &Self) -> Self {
        Self {
            kind: pick(&self.kind, &o.kind),
            path: pick(&self.path, &o.path),
            format: pick(&self.format, &o.format),
        }
    }
}

impl PartialComputeConfig {
    pub fn merge(&self, o: &Self) -> Self {
        Self {
            partition: pick(&self.partition, &o.partition),
            nodes: pick(&self.nodes, &o.nodes),
            workers: pick(&self.workers, &o.workers),
            max_concurrent_tasks: pick(&self.max_concurrent_tasks, &o.max_concurrent_tasks),
            memory_gb: pick(&self.memory_gb, &o.memory_gb),
            max_runtime: pick(&self.max_runtime, &o.max_runtime),
            gpu_type: pick(&self.gpu_type, &o.gpu_type),
            gpu_count: pick(&self.gpu_count, &o.gpu_count),
            account: pick(&self.account, &o.account),
        }
    }
}

impl PartialOutputConfig {
    pub fn merge(&self, o: &Self) -> Self {
        Self {
            location: pick(&self.location, &o.location),
            format: pick(&self.format, &o.format),
            write_mode: pick(&self.write_mode, &o.write_mode),
        }
    }
}

impl PartialNotificationSettings {
    pub fn merge(&self, o: &Self) -> Self {
        Self {
            on: pick(&self.on, &o.on),
            recipients: pick(&self.recipients, &o.recipients),
        }
    }
}

impl PartialAdvancedConfig {
    pub fn merge(&self, o: &Self) -> Self {
        Self {
            batch_size: pick(&self.batch_size, &o.batch_size),
            task_timeout_secs: pick(&self.task_timeout_secs, &o.task_timeout_secs),
            max_attempts: pick(&self.max_attempts, &o.max_attempts),
            failure_threshold: pick(&self.failure_threshold, &o.failure_threshold),
            backoff_strategy: pick(&self.backoff_strategy, &o.backoff_strategy),
            backoff_base_ms: pick(&self.backoff_base_ms, &o.backoff_base_ms),
            jitter: pick(&self.jitter, &o.jitter),
        }
    }
}
