//! `jobforge-coordinator`: job lifecycle, recovery and the job API.
//!
//! The [`Coordinator`] is the single role that moves jobs between states.
//! Workers only ever touch task records; the coordinator observes them
//! through the manifest store and decides when a job is done.

pub mod coordinator;
pub mod error;
pub mod launcher;
pub mod notify;
pub mod service;

pub use coordinator::Coordinator;
pub use error::{ApiError, CoordinatorError};
pub use launcher::{LaunchError, LaunchRequest, NoopLauncher, RecordingLauncher, WorkerLauncher};
pub use notify::{LogNotifier, NotificationHandle, NotificationWorker, Notifier, RecordingNotifier};
pub use service::{BatchProgress, CancelAck, JobService, JobSummary};
