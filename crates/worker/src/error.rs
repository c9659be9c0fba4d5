use std::time::Duration;

use thiserror::Error;

use jobforge_manifest::ManifestError;

/// Error returned by a task handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// One failed task attempt. Counted against `max_attempts`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskExecutionError {
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("handler exceeded task timeout of {0:?}")]
    Timeout(Duration),

    #[error("handler panicked")]
    Panicked,

    #[error("no handler registered for '{0}'")]
    UnknownHandler(String),

    #[error("batch payload unavailable: {0}")]
    PayloadUnavailable(String),

    #[error("batch payload unusable: {0}")]
    UnusablePayload(String),
}

impl TaskExecutionError {
    /// Failures that another attempt cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TaskExecutionError::UnusablePayload(_))
    }
}

/// Worker-level error: the manifest store could not be read or written.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}
