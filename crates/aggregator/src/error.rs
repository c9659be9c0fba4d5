use thiserror::Error;

use jobforge_manifest::ManifestError;

/// Consolidation failed. The job fails; per-task results stay in place.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("job {job_id} still has {remaining} non-terminal tasks")]
    NotReady { job_id: String, remaining: usize },

    #[error("no stored result for succeeded task {0}")]
    MissingResult(String),

    #[error("output {location} already exists")]
    OutputExists { location: String },

    #[error("cannot write output {location}: {message}")]
    Output { location: String, message: String },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}
