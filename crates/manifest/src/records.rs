//! Records persisted in the manifest store.
//!
//! Versions and checksums are not part of the serialized records; they are
//! assigned by the store and returned alongside the value as
//! [`Versioned`](crate::Versioned).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobforge_config::JobConfig;
use jobforge_core::{BatchId, Checksum, JobId, JobState, TaskId, TaskState, WorkerId};

use crate::error::{ManifestError, ManifestResult};

/// One persisted job state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub name: String,
    /// Configuration document exactly as submitted.
    pub source: String,
    /// Validated snapshot; set once the job leaves VALIDATING.
    pub config: Option<JobConfig>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub batch_ids: Vec<BatchId>,
    pub total_records: u64,
    /// Tasks that ended permanently FAILED.
    pub failure_count: u32,
    pub cancel_requested: bool,
    /// Set before the worker launch request is issued, so it is issued at most once.
    pub launch_requested: bool,
    pub failure_reason: Option<String>,
    pub transitions: Vec<Transition>,
}

impl JobRecord {
    pub fn new(job_id: JobId, name: impl Into<String>, source: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            name: name.into(),
            source: source.into(),
            config: None,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
            batch_ids: Vec::new(),
            total_records: 0,
            failure_count: 0,
            cancel_requested: false,
            launch_requested: false,
            failure_reason: None,
            transitions: Vec::new(),
        }
    }

    /// Validated config, or an error for jobs that never passed validation.
    pub fn config(&self) -> ManifestResult<&JobConfig> {
        self.config.as_ref().ok_or_else(|| {
            ManifestError::invalid_transition(format!("job {} has no validated config", self.job_id))
        })
    }

    /// Move to `next`, recording the transition.
    pub fn transition(
        &mut self,
        next: JobState,
        now: DateTime<Utc>,
        reason: Option<String>,
    ) -> ManifestResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ManifestError::invalid_transition(format!(
                "job {}: {} -> {next}",
                self.job_id, self.state
            )));
        }
        if next == JobState::Failed {
            self.failure_reason = reason.clone();
        }
        self.transitions.push(Transition {
            from: self.state,
            to: next,
            at: now,
            reason,
        });
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn last_transition(&self) -> Option<&Transition> {
        self.transitions.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: BatchId,
    pub job_id: JobId,
    pub ordinal: u64,
    /// Index of the first record of this batch within the input.
    pub first_record: u64,
    pub record_count: u64,
    /// Checksum over the batch's records, one serialized record per line.
    pub checksum: Checksum,
}

impl BatchRecord {
    /// Index one past the last record of this batch.
    pub fn end_record(&self) -> u64 {
        self.first_record + self.record_count
    }
}

/// The records of one batch, written once during partitioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub job_id: JobId,
    pub batch_id: BatchId,
    pub records: Vec<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub batch_id: BatchId,
    pub ordinal: u64,
    pub state: TaskState,
    pub worker_id: Option<WorkerId>,
    pub lease_expiry: Option<DateTime<Utc>>,
    /// Handler attempts that ended in failure or success.
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Retry backoff: the task is not claimable before this instant.
    pub not_before: Option<DateTime<Utc>>,
    /// Lease expiries observed for this task; these do not count as attempts.
    pub reclaim_count: u32,
    /// Claims ever granted; identifies the current lease.
    #[serde(default)]
    pub claim_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn pending(job_id: JobId, batch_id: BatchId, ordinal: u64, now: DateTime<Utc>) -> Self {
        Self {
            task_id: TaskId::for_ordinal(job_id, ordinal),
            job_id,
            batch_id,
            ordinal,
            state: TaskState::Pending,
            worker_id: None,
            lease_expiry: None,
            attempt_count: 0,
            last_error: None,
            not_before: None,
            reclaim_count: 0,
            claim_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Proof of one claim on a task: the claiming worker and the claim number.
///
/// Every report back to the task record is checked against it, so a worker
/// that lost its lease cannot act on a later claim, even its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lease {
    pub worker: WorkerId,
    pub claim: u32,
}

/// Output of one successful task attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub batch_id: BatchId,
    pub ordinal: u64,
    pub worker_id: WorkerId,
    pub attempt: u32,
    /// Claim the result was produced under.
    #[serde(default)]
    pub claim: u32,
    pub records: Vec<JsonValue>,
    pub produced_at: DateTime<Utc>,
}

/// Summary of a job's consolidated output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    pub job_id: JobId,
    /// Where the consolidated records were written (a path or a manifest key).
    pub location: String,
    pub record_count: u64,
    pub succeeded_batches: Vec<BatchId>,
    pub failed_batches: Vec<BatchId>,
    pub checksum: Checksum,
    pub written_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_transitions_are_recorded_in_order() {
        let now = Utc::now();
        let mut job = JobRecord::new(JobId::new(), "j", "{}", now);
        job.transition(JobState::Validating, now, None).unwrap();
        job.transition(JobState::Failed, now, Some("bad config".into())).unwrap();

        assert_eq!(job.transitions.len(), 2);
        assert_eq!(job.transitions[0].from, JobState::Pending);
        assert_eq!(job.failure_reason.as_deref(), Some("bad config"));
        assert_eq!(job.last_transition().map(|t| t.to), Some(JobState::Failed));
    }

    #[test]
    fn terminal_jobs_reject_further_transitions() {
        let now = Utc::now();
        let mut job = JobRecord::new(JobId::new(), "j", "{}", now);
        job.transition(JobState::Cancelled, now, None).unwrap();
        let err = job.transition(JobState::Validating, now, None).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidTransition(_)));
        assert_eq!(job.state, JobState::Cancelled);
    }

    #[test]
    fn skipping_states_is_rejected() {
        let now = Utc::now();
        let mut job = JobRecord::new(JobId::new(), "j", "{}", now);
        assert!(job.transition(JobState::Running, now, None).is_err());
        assert!(job.transitions.is_empty());
    }

    #[test]
    fn records_survive_json() {
        let now = Utc::now();
        let job_id = JobId::new();
        let task = TaskRecord::pending(job_id, BatchId::for_ordinal(job_id, 0), 0, now);
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains(r#""state":"PENDING""#));
        let back: TaskRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
