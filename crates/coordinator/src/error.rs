use thiserror::Error;

use jobforge_config::ConfigError;
use jobforge_core::JobId;
use jobforge_manifest::ManifestError;

use crate::launcher::LaunchError;

/// Coordinator failure.
///
/// Input and aggregation problems are not errors here: they fail the job and
/// are recorded on its record. What remains is what the coordinator itself
/// could not do.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The job was persisted and moved to FAILED.
    #[error("job {job_id} rejected: {error}")]
    InvalidConfig { job_id: JobId, error: ConfigError },

    #[error("worker launch for job {job_id} failed: {error}")]
    Launch { job_id: JobId, error: LaunchError },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Response codes of the job API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid job config: {message}")]
    InvalidConfig {
        /// Set when the rejected submission was recorded as a FAILED job.
        job_id: Option<JobId>,
        message: String,
        issues: Vec<String>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::InvalidConfig { .. } => "invalid_config",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl From<ManifestError> for ApiError {
    fn from(value: ManifestError) -> Self {
        match value {
            ManifestError::NotFound(key) => ApiError::NotFound(key),
            ManifestError::Corrupt { ref key, version } => {
                tracing::error!(key = %key, version, "corrupt manifest needs manual repair");
                ApiError::Internal(value.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn invalid_config(job_id: Option<JobId>, error: &ConfigError) -> Self {
        ApiError::InvalidConfig {
            job_id,
            message: error.to_string(),
            issues: error.issues().iter().map(ToString::to_string).collect(),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(value: ConfigError) -> Self {
        ApiError::invalid_config(None, &value)
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(value: CoordinatorError) -> Self {
        match value {
            CoordinatorError::InvalidConfig { job_id, error } => ApiError::invalid_config(Some(job_id), &error),
            CoordinatorError::Launch { .. } => ApiError::Internal(value.to_string()),
            CoordinatorError::Manifest(e) => e.into(),
        }
    }
}
