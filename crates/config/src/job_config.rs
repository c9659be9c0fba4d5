//! Validated, immutable job configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use jobforge_core::{BackoffStrategy, JobState, RetryPolicy};

use crate::error::{ConfigError, ConfigIssue};
use crate::partial::PartialJobConfig;

/// Documented defaults applied to optional fields.
pub mod defaults {
    use std::time::Duration;

    pub const BATCH_SIZE: u64 = 1000;
    pub const MAX_ATTEMPTS: u32 = 3;
    /// Zero tolerance: any permanently failed task fails the job.
    pub const FAILURE_THRESHOLD: u32 = 0;
    pub const TASK_TIMEOUT: Duration = Duration::from_secs(30 * 60);
    pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
    pub const BACKOFF_MAX: Duration = Duration::from_secs(300);
    pub const JITTER: f64 = 0.1;
    pub const INPUT_KIND: &str = "local";
    pub const PARTITION: &str = "short";
    pub const GPU_PARTITION: &str = "gpu";
    pub const NODES: u32 = 1;
    pub const WORKERS: u32 = 1;
    pub const MAX_CONCURRENT_TASKS: u32 = 4;
    pub const MEMORY_GB: u32 = 8;
    pub const MAX_RUNTIME: &str = "1:00:00";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Record encoding of the job input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// One JSON value per line.
    Jsonl,
    /// One string record per line.
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// One JSON value per line.
    Jsonl,
    /// A single JSON array.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
    ErrorIfExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOn {
    Completed,
    Failed,
    Cancelled,
}

impl NotifyOn {
    pub fn matches(self, state: JobState) -> bool {
        matches!(
            (self, state),
            (NotifyOn::Completed, JobState::Completed)
                | (NotifyOn::Failed, JobState::Failed)
                | (NotifyOn::Cancelled, JobState::Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Storage kind resolved by the input source (e.g. `local`).
    pub kind: String,
    pub path: String,
    pub format: InputFormat,
}

/// Advisory resource hints forwarded to the external scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub partition: String,
    pub nodes: u32,
    pub workers: u32,
    pub max_concurrent_tasks: u32,
    pub memory_gb: u32,
    pub max_runtime: String,
    pub gpu_type: Option<String>,
    pub gpu_count: Option<u32>,
    pub account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub location: String,
    pub format: OutputFormat,
    pub write_mode: WriteMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub on: Vec<NotifyOn>,
    pub recipients: Vec<String>,
}

impl NotificationSettings {
    pub fn wants(&self, state: JobState) -> bool {
        self.on.iter().any(|n| n.matches(state))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedConfig {
    pub batch_size: u64,
    pub task_timeout: Duration,
    pub max_attempts: u32,
    /// Maximum number of permanently failed tasks the job tolerates.
    pub failure_threshold: u32,
    pub backoff_strategy: BackoffStrategy,
    pub backoff_base: Duration,
    pub jitter: f64,
}

/// Validated job configuration. Immutable once a job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub description: String,
    pub priority: Priority,
    /// Name resolved by the worker's handler registry.
    pub handler: String,
    pub input: InputConfig,
    pub compute: ComputeConfig,
    pub output: OutputConfig,
    pub notifications: NotificationSettings,
    pub advanced: AdvancedConfig,
}

impl JobConfig {
    /// Parse and validate a JSON document.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Self::from_partial(&PartialJobConfig::from_json(raw)?)
    }

    /// Parse an override document and layer it over `base` before validating.
    pub fn parse_with_base(base: &PartialJobConfig, raw: &str) -> Result<Self, ConfigError> {
        let overlay = PartialJobConfig::from_json(raw)?;
        Self::from_partial(&base.merge(&overlay))
    }

    /// Validate a partial config, filling defaults. Reports every issue at once.
    pub fn from_partial(p: &PartialJobConfig) -> Result<Self, ConfigError> {
        let mut issues = Vec::new();

        let name = required(&p.name, "name", &mut issues);
        if let Some(n) = &name {
            let valid = n
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'));
            if !valid {
                issues.push(ConfigIssue::invalid(
                    "name",
                    "may only contain letters, digits, spaces, '_' and '-'",
                ));
            }
        }

        let handler = required(&p.handler, "handler", &mut issues);

        let priority = match p.priority.as_deref() {
            None => Priority::default(),
            Some("low") => Priority::Low,
            Some("medium") => Priority::Medium,
            Some("high") => Priority::High,
            Some(other) => {
                issues.push(ConfigIssue::invalid(
                    "priority",
                    format!("must be one of low, medium, high (got '{other}')"),
                ));
                Priority::default()
            }
        };

        let input = validate_input(p, &mut issues);
        let compute = validate_compute(p, &mut issues);
        let output = validate_output(p, &mut issues);
        let notifications = validate_notifications(p, &mut issues);
        let advanced = validate_advanced(p, &mut issues);

        if !issues.is_empty() {
            return Err(ConfigError::Invalid(issues));
        }

        match (name, handler, input, output) {
            (Some(name), Some(handler), Some(input), Some(output)) => Ok(JobConfig {
                name,
                description: p.description.clone().unwrap_or_default(),
                priority,
                handler,
                input,
                compute,
                output,
                notifications,
                advanced,
            }),
            // Every `None` above has pushed an issue.
            _ => Err(ConfigError::Invalid(vec![ConfigIssue::invalid(
                "config",
                "incomplete",
            )])),
        }
    }

    /// Retry policy for failed task attempts.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.advanced.max_attempts,
            backoff_base: self.advanced.backoff_base,
            backoff_cap: defaults::BACKOFF_MAX.max(self.advanced.backoff_base),
            strategy: self.advanced.backoff_strategy,
            jitter: self.advanced.jitter,
        }
    }
}

fn required(value: &Option<String>, field: &str, issues: &mut Vec<ConfigIssue>) -> Option<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => {
            issues.push(ConfigIssue::missing(field));
            None
        }
    }
}

fn validate_input(p: &PartialJobConfig, issues: &mut Vec<ConfigIssue>) -> Option<InputConfig> {
    let Some(input) = &p.input else {
        issues.push(ConfigIssue::missing("input"));
        return None;
    };

    let path = required(&input.path, "input.path", issues);
    let format = match input.format.as_deref() {
        None => {
            issues.push(ConfigIssue::missing("input.format"));
            None
        }
        Some("jsonl") => Some(InputFormat::Jsonl),
        Some("text") => Some(InputFormat::Text),
        Some(other) => {
            issues.push(ConfigIssue::invalid(
                "input.format",
                format!("must be one of jsonl, text (got '{other}')"),
            ));
            None
        }
    };

    Some(InputConfig {
        kind: input
            .kind
            .clone()
            .unwrap_or_else(|| defaults::INPUT_KIND.to_string()),
        path: path?,
        format: format?,
    })
}

fn validate_compute(p: &PartialJobConfig, issues: &mut Vec<ConfigIssue>) -> ComputeConfig {
    let c = p.compute.clone().unwrap_or_default();

    let partition = c
        .partition
        .clone()
        .unwrap_or_else(|| defaults::PARTITION.to_string());
    let wants_gpu = c.gpu_count.is_some_and(|n| n > 0) || c.gpu_type.is_some();
    if wants_gpu && partition != defaults::GPU_PARTITION {
        issues.push(ConfigIssue::invalid(
            "compute.partition",
            format!("must be '{}' when requesting GPUs", defaults::GPU_PARTITION),
        ));
    }
    if !wants_gpu && partition == defaults::GPU_PARTITION {
        issues.push(ConfigIssue::invalid(
            "compute.gpu_count",
            format!(
                "gpu_count and gpu_type are required on the '{}' partition",
                defaults::GPU_PARTITION
            ),
        ));
    }

    let workers = c.workers.unwrap_or(defaults::WORKERS);
    if workers == 0 {
        issues.push(ConfigIssue::invalid("compute.workers", "must be at least 1"));
    }
    let max_concurrent_tasks = c.max_concurrent_tasks.unwrap_or(defaults::MAX_CONCURRENT_TASKS);
    if max_concurrent_tasks == 0 {
        issues.push(ConfigIssue::invalid(
            "compute.max_concurrent_tasks",
            "must be at least 1",
        ));
    }

    ComputeConfig {
        partition,
        nodes: c.nodes.unwrap_or(defaults::NODES),
        workers,
        max_concurrent_tasks,
        memory_gb: c.memory_gb.unwrap_or(defaults::MEMORY_GB),
        max_runtime: c
            .max_runtime
            .clone()
            .unwrap_or_else(|| defaults::MAX_RUNTIME.to_string()),
        gpu_type: c.gpu_type.clone(),
        gpu_count: c.gpu_count,
        account: c.account.clone(),
    }
}

fn validate_output(p: &PartialJobConfig, issues: &mut Vec<ConfigIssue>) -> Option<OutputConfig> {
    let Some(output) = &p.output else {
        issues.push(ConfigIssue::missing("output"));
        return None;
    };

    let location = required(&output.location, "output.location", issues);
    let format = match output.format.as_deref() {
        None | Some("jsonl") => OutputFormat::Jsonl,
        Some("json") => OutputFormat::Json,
        Some(other) => {
            issues.push(ConfigIssue::invalid(
                "output.format",
                format!("must be one of jsonl, json (got '{other}')"),
            ));
            OutputFormat::Jsonl
        }
    };
    let write_mode = match output.write_mode.as_deref() {
        None | Some("overwrite") => WriteMode::Overwrite,
        Some("append") => WriteMode::Append,
        Some("error_if_exists") => WriteMode::ErrorIfExists,
        Some(other) => {
            issues.push(ConfigIssue::invalid(
                "output.write_mode",
                format!("must be one of overwrite, append, error_if_exists (got '{other}')"),
            ));
            WriteMode::Overwrite
        }
    };

    Some(OutputConfig {
        location: location?,
        format,
        write_mode,
    })
}

fn validate_notifications(
    p: &PartialJobConfig,
    issues: &mut Vec<ConfigIssue>,
) -> NotificationSettings {
    let n = p.notifications.clone().unwrap_or_default();

    let on = match &n.on {
        None => vec![NotifyOn::Failed],
        Some(values) => values
            .iter()
            .filter_map(|v| match v.as_str() {
                "completed" => Some(NotifyOn::Completed),
                "failed" => Some(NotifyOn::Failed),
                "cancelled" => Some(NotifyOn::Cancelled),
                other => {
                    issues.push(ConfigIssue::invalid(
                        "notifications.on",
                        format!("unknown event '{other}' (expected completed, failed, cancelled)"),
                    ));
                    None
                }
            })
            .collect(),
    };

    let recipients = n.recipients.clone().unwrap_or_default();
    for r in &recipients {
        if !r.contains('@') {
            issues.push(ConfigIssue::invalid(
                "notifications.recipients",
                format!("'{r}' is not an email address"),
            ));
        }
    }

    NotificationSettings { on, recipients }
}

fn validate_advanced(p: &PartialJobConfig, issues: &mut Vec<ConfigIssue>) -> AdvancedConfig {
    let a = p.advanced.clone().unwrap_or_default();

    let batch_size = a.batch_size.unwrap_or(defaults::BATCH_SIZE);
    if batch_size == 0 {
        issues.push(ConfigIssue::invalid("advanced.batch_size", "must be at least 1"));
    }

    let max_attempts = a.max_attempts.unwrap_or(defaults::MAX_ATTEMPTS);
    if max_attempts == 0 {
        issues.push(ConfigIssue::invalid("advanced.max_attempts", "must be at least 1"));
    }

    let task_timeout = a
        .task_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(defaults::TASK_TIMEOUT);
    if task_timeout.is_zero() {
        issues.push(ConfigIssue::invalid(
            "advanced.task_timeout_secs",
            "must be greater than zero",
        ));
    }

    let backoff_strategy = match a.backoff_strategy.as_deref() {
        None => BackoffStrategy::default(),
        Some(s) => BackoffStrategy::parse(s).unwrap_or_else(|| {
            issues.push(ConfigIssue::invalid(
                "advanced.backoff_strategy",
                format!("must be one of fixed, linear, exponential (got '{s}')"),
            ));
            BackoffStrategy::default()
        }),
    };

    let jitter = a.jitter.unwrap_or(defaults::JITTER);
    if !(0.0..=1.0).contains(&jitter) {
        issues.push(ConfigIssue::invalid("advanced.jitter", "must be within [0, 1]"));
    }

    AdvancedConfig {
        batch_size,
        task_timeout,
        max_attempts,
        failure_threshold: a.failure_threshold.unwrap_or(defaults::FAILURE_THRESHOLD),
        backoff_strategy,
        backoff_base: a
            .backoff_base_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults::BACKOFF_BASE),
        jitter,
    }
}
