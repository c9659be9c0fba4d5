//! Requests to an external scheduler to start worker processes.
//!
//! The coordinator asks once per job and does not manage the processes it
//! asked for; workers find their tasks through the manifest store.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use jobforge_config::ComputeConfig;
use jobforge_core::JobId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct LaunchError(pub String);

/// Worker processes wanted for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchRequest {
    pub job_id: JobId,
    pub job_name: String,
    /// Task type filter: workers only need this handler.
    pub handler: String,
    pub workers: u32,
    /// Advisory resource hints passed through to the scheduler.
    pub compute: ComputeConfig,
}

pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError>;
}

impl<L> WorkerLauncher for Arc<L>
where
    L: WorkerLauncher + ?Sized,
{
    fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError> {
        (**self).launch(request)
    }
}

/// For deployments whose workers are already running.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLauncher;

impl WorkerLauncher for NoopLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError> {
        tracing::debug!(job_id = %request.job_id, workers = request.workers, "workers assumed running");
        Ok(())
    }
}

/// Keeps every request it receives. Optionally fails the first `n`.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    requests: Mutex<Vec<LaunchRequest>>,
    failures_left: Mutex<u32>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(n: u32) -> Self {
        Self {
            requests: Mutex::default(),
            failures_left: Mutex::new(n),
        }
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl WorkerLauncher for RecordingLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError> {
        let mut failures = self
            .failures_left
            .lock()
            .map_err(|_| LaunchError("launcher lock poisoned".to_string()))?;
        if *failures > 0 {
            *failures -= 1;
            return Err(LaunchError("scheduler unavailable".to_string()));
        }
        self.requests
            .lock()
            .map_err(|_| LaunchError("launcher lock poisoned".to_string()))?
            .push(request.clone());
        Ok(())
    }
}
