use thiserror::Error;

/// Input could not be partitioned. Always terminal for the job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("cannot read input {path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed record at {path}:{line}: {message}")]
    Malformed {
        path: String,
        line: u64,
        message: String,
    },

    #[error("unsupported input kind '{0}'")]
    UnsupportedSource(String),

    #[error("batch size must be at least 1")]
    InvalidBatchSize,
}
