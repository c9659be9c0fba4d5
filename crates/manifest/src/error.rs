use thiserror::Error;

use jobforge_core::ExpectedVersion;

/// Manifest store operation error.
///
/// `Conflict` is the only error callers are expected to resolve locally, by
/// re-reading the record and re-applying their mutation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("manifest conflict on {key}: expected {expected:?}, found {actual:?}")]
    Conflict {
        key: String,
        expected: ExpectedVersion,
        actual: Option<u64>,
    },

    #[error("manifest {key} failed checksum verification at version {version}")]
    Corrupt { key: String, version: u64 },

    #[error("manifest not found: {0}")]
    NotFound(String),

    #[error("manifest already exists: {0}")]
    AlreadyExists(String),

    #[error("manifest serialization failed: {0}")]
    Serialization(String),

    #[error("manifest backend error: {0}")]
    Backend(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("lease expired for task {task_id}")]
    LeaseExpired { task_id: String },
}

impl ManifestError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ManifestError::Conflict { .. })
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        ManifestError::InvalidTransition(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        ManifestError::Backend(msg.into())
    }
}

pub type ManifestResult<T> = Result<T, ManifestError>;
