//! Shared error model.

use thiserror::Error;

/// Result type used by the pure primitives in this crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error raised by core primitives.
///
/// Keep this focused on deterministic failures (parsing, stale versions).
/// Storage and execution concerns have their own error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A stale version was presented (optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
