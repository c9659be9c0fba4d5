//! Submission and inspection surface for job clients.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use jobforge_core::{BatchId, JobId, JobState, TaskState};
use jobforge_events::{EventBus, JobEvent};
use jobforge_manifest::{JobOutput, JobRecord, ManifestStore, Transition};

use crate::coordinator::Coordinator;
use crate::error::ApiError;

/// Progress of one batch, through its task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub ordinal: u64,
    pub record_count: u64,
    /// `None` until the task record exists.
    pub state: Option<TaskState>,
    pub attempts: u32,
    pub reclaims: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub name: String,
    pub state: JobState,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_records: u64,
    pub failure_count: u32,
    pub cancel_requested: bool,
    pub failure_reason: Option<String>,
    /// Tasks per state.
    pub task_counts: BTreeMap<TaskState, usize>,
    /// Share of tasks in a terminal state, 0 to 100.
    pub percent_complete: f64,
    pub batches: Vec<BatchProgress>,
    pub transitions: Vec<Transition>,
    pub output: Option<JobOutput>,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelAck {
    pub job_id: JobId,
    pub state: JobState,
    /// False when the job was already terminal.
    pub accepted: bool,
}

/// Job API: `submit`, `status`, `cancel`, `list`.
pub struct JobService<B> {
    coordinator: Arc<Coordinator<B>>,
}

impl<B> Clone for JobService<B> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<B> JobService<B>
where
    B: EventBus<JobEvent>,
{
    pub fn new(coordinator: Arc<Coordinator<B>>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<B>> {
        &self.coordinator
    }

    fn store(&self) -> &ManifestStore {
        self.coordinator.store()
    }

    pub fn submit(&self, raw: &str) -> Result<JobId, ApiError> {
        Ok(self.coordinator.submit(raw)?)
    }

    pub fn status(&self, job_id: JobId) -> Result<JobSummary, ApiError> {
        let job = self
            .store()
            .job(job_id)?
            .ok_or_else(|| ApiError::NotFound(job_id.to_string()))?;
        self.summarize(job.value, job.version)
    }

    /// Ask for a job to be cancelled. Takes effect on the coordinator's next
    /// pass over the job.
    pub fn cancel(&self, job_id: JobId) -> Result<CancelAck, ApiError> {
        let job = self
            .store()
            .job(job_id)?
            .ok_or_else(|| ApiError::NotFound(job_id.to_string()))?;
        if job.value.state.is_terminal() {
            return Ok(CancelAck {
                job_id,
                state: job.value.state,
                accepted: false,
            });
        }

        let (written, accepted) = self.store().update_job(job_id, |job| {
            if job.state.is_terminal() {
                return Ok(false);
            }
            job.cancel_requested = true;
            Ok(true)
        })?;
        if accepted {
            tracing::info!(job_id = %job_id, state = %written.value.state, "cancellation requested");
        }
        Ok(CancelAck {
            job_id,
            state: written.value.state,
            accepted,
        })
    }

    /// Every job, oldest first.
    pub fn list(&self) -> Result<Vec<JobSummary>, ApiError> {
        let mut jobs = self.store().jobs()?;
        jobs.sort_by_key(|j| (j.value.created_at, j.value.job_id));
        jobs.into_iter()
            .map(|j| self.summarize(j.value, j.version))
            .collect()
    }

    fn summarize(&self, job: JobRecord, version: u64) -> Result<JobSummary, ApiError> {
        let store = self.store();
        let tasks: BTreeMap<BatchId, _> = store
            .tasks(job.job_id)?
            .into_iter()
            .map(|t| (t.value.batch_id.clone(), t.value))
            .collect();

        let batches: Vec<BatchProgress> = store
            .batches(job.job_id)?
            .into_iter()
            .map(|b| {
                let b = b.value;
                let task = tasks.get(&b.batch_id);
                BatchProgress {
                    state: task.map(|t| t.state),
                    attempts: task.map_or(0, |t| t.attempt_count),
                    reclaims: task.map_or(0, |t| t.reclaim_count),
                    last_error: task.and_then(|t| t.last_error.clone()),
                    batch_id: b.batch_id,
                    ordinal: b.ordinal,
                    record_count: b.record_count,
                }
            })
            .collect();

        let mut task_counts = BTreeMap::new();
        for task in tasks.values() {
            *task_counts.entry(task.state).or_insert(0) += 1;
        }
        let terminal = tasks.values().filter(|t| t.state.is_terminal()).count();
        let percent_complete = if job.state.is_terminal() {
            100.0
        } else if tasks.is_empty() {
            0.0
        } else {
            terminal as f64 * 100.0 / tasks.len() as f64
        };

        Ok(JobSummary {
            output: store.job_output(job.job_id)?.map(|o| o.value),
            job_id: job.job_id,
            name: job.name,
            state: job.state,
            version,
            created_at: job.created_at,
            updated_at: job.updated_at,
            total_records: job.total_records,
            failure_count: job.failure_count,
            cancel_requested: job.cancel_requested,
            failure_reason: job.failure_reason,
            task_counts,
            percent_complete,
            batches,
            transitions: job.transitions,
        })
    }
}
