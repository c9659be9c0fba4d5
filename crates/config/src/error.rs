use thiserror::Error;

/// One problem found while validating a job configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Dotted path of the offending field (e.g. `advanced.batch_size`).
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn missing(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: "is required".to_string(),
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl core::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Configuration error.
///
/// `Invalid` carries every issue found, not just the first.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid job config: {}", join_issues(.0))]
    Invalid(Vec<ConfigIssue>),

    #[error("malformed job config: {0}")]
    Syntax(String),

    #[error("cannot read job config {path}: {message}")]
    Io { path: String, message: String },

    #[error("job config inheritance cycle through {0}")]
    ExtendsCycle(String),
}

impl ConfigError {
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            ConfigError::Invalid(issues) => issues,
            _ => &[],
        }
    }

    /// Whether `field` is among the reported issues.
    pub fn mentions(&self, field: &str) -> bool {
        self.issues().iter().any(|i| i.field == field)
    }
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
