//! `jobforge-worker`: task execution.
//!
//! A [`TaskWorker`] polls the manifest store for claimable tasks of the jobs
//! it serves, claims one with a single compare-and-swap, runs the handler the
//! job names (resolved through a [`HandlerRegistry`] built at startup) and
//! records the outcome. Retries, backoff and lease expiry are all expressed
//! as task record transitions; the worker keeps no state of its own beyond
//! statistics.

pub mod error;
pub mod registry;
pub mod worker;

pub use error::{HandlerError, TaskExecutionError, WorkerError};
pub use registry::{Handler, HandlerRegistry, HandlerResult};
pub use worker::{JobScope, TaskOutcome, TaskWorker, WorkerConfig, WorkerHandle, WorkerStats};
