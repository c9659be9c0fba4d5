//! Task state transitions as pure mutations of a [`TaskRecord`].
//!
//! Each method validates its preconditions against the record it is given
//! and leaves the record untouched on error. Persisting the mutated record
//! with the version it was read at is the caller's job; that CAS write is
//! what makes a transition exclusive.

use chrono::{DateTime, Duration, Utc};

use jobforge_core::{RetryPolicy, TaskState, WorkerId};

use crate::error::{ManifestError, ManifestResult};
use crate::records::{Lease, TaskRecord};

pub const LEASE_EXPIRED_REASON: &str = "lease expired";

/// What a failed attempt did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to PENDING; claimable again from `not_before`.
    Retrying { not_before: DateTime<Utc> },
    /// Attempts exhausted; the task is permanently FAILED.
    Exhausted,
}

impl TaskRecord {
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Pending && self.not_before.is_none_or(|t| t <= now)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.is_leased() && self.lease_expiry.is_some_and(|expiry| expiry <= now)
    }

    /// True only for the claim `lease` was issued for. A later claim by a
    /// worker with the same id does not revive an older lease.
    pub fn held_by(&self, lease: &Lease) -> bool {
        self.state.is_leased()
            && self.worker_id.as_ref() == Some(&lease.worker)
            && self.claim_count == lease.claim
    }

    /// The lease currently held on this task, if any.
    pub fn lease(&self) -> Option<Lease> {
        match &self.worker_id {
            Some(worker) if self.state.is_leased() => Some(Lease {
                worker: worker.clone(),
                claim: self.claim_count,
            }),
            _ => None,
        }
    }

    /// PENDING → ASSIGNED under a lease of `lease` from `now`.
    pub fn claim(&mut self, worker: &WorkerId, now: DateTime<Utc>, lease: Duration) -> ManifestResult<Lease> {
        self.ensure(TaskState::Assigned)?;
        if !self.is_claimable(now) {
            return Err(ManifestError::invalid_transition(format!(
                "task {} is backing off until {:?}",
                self.task_id, self.not_before
            )));
        }
        self.state = TaskState::Assigned;
        self.worker_id = Some(worker.clone());
        self.claim_count += 1;
        self.lease_expiry = Some(now + lease);
        self.not_before = None;
        self.updated_at = now;
        Ok(Lease {
            worker: worker.clone(),
            claim: self.claim_count,
        })
    }

    /// ASSIGNED → RUNNING. Refused once the lease has run out.
    pub fn start(&mut self, lease: &Lease, now: DateTime<Utc>) -> ManifestResult<()> {
        self.ensure_live(lease, now)?;
        self.ensure(TaskState::Running)?;
        self.state = TaskState::Running;
        self.updated_at = now;
        Ok(())
    }

    /// RUNNING → SUCCEEDED.
    pub fn succeed(&mut self, lease: &Lease, now: DateTime<Utc>) -> ManifestResult<()> {
        self.ensure_live(lease, now)?;
        self.ensure(TaskState::Succeeded)?;
        self.state = TaskState::Succeeded;
        self.attempt_count += 1;
        self.lease_expiry = None;
        self.last_error = None;
        self.updated_at = now;
        Ok(())
    }

    /// Record a failed attempt: back to PENDING with backoff while the policy
    /// allows another attempt, otherwise permanently FAILED.
    pub fn fail(
        &mut self,
        lease: &Lease,
        error: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> ManifestResult<FailureOutcome> {
        self.ensure_live(lease, now)?;
        self.ensure(TaskState::Failed)?;

        let attempts = self.attempt_count + 1;
        self.attempt_count = attempts;
        self.last_error = Some(error.into());
        self.lease_expiry = None;
        self.updated_at = now;

        if policy.should_retry(attempts) {
            let delay = Duration::from_std(policy.delay_for(attempts, self.task_id.as_str()))
                .unwrap_or(Duration::zero());
            let not_before = now + delay;
            self.state = TaskState::Pending;
            self.worker_id = None;
            self.not_before = Some(not_before);
            Ok(FailureOutcome::Retrying { not_before })
        } else {
            self.state = TaskState::Failed;
            Ok(FailureOutcome::Exhausted)
        }
    }

    /// RUNNING → FAILED regardless of remaining attempts, for failures no
    /// retry can fix.
    pub fn fail_permanently(&mut self, lease: &Lease, error: impl Into<String>, now: DateTime<Utc>) -> ManifestResult<()> {
        self.ensure_live(lease, now)?;
        self.ensure(TaskState::Failed)?;
        self.state = TaskState::Failed;
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.lease_expiry = None;
        self.updated_at = now;
        Ok(())
    }

    /// ASSIGNED/RUNNING → PENDING after the lease ran out. Not an attempt.
    pub fn reclaim(&mut self, now: DateTime<Utc>) -> ManifestResult<()> {
        if !self.lease_expired(now) {
            return Err(ManifestError::invalid_transition(format!(
                "task {} ({}) holds no expired lease",
                self.task_id, self.state
            )));
        }
        self.state = TaskState::Pending;
        self.worker_id = None;
        self.lease_expiry = None;
        self.not_before = None;
        self.reclaim_count += 1;
        self.last_error = Some(LEASE_EXPIRED_REASON.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// PENDING → CANCELLED.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> ManifestResult<()> {
        self.ensure(TaskState::Cancelled)?;
        self.state = TaskState::Cancelled;
        self.not_before = None;
        self.updated_at = now;
        Ok(())
    }

    /// The caller still holds `lease` and it has not run out at `now`.
    pub fn ensure_live(&self, lease: &Lease, now: DateTime<Utc>) -> ManifestResult<()> {
        if self.held_by(lease) && !self.lease_expired(now) {
            Ok(())
        } else {
            Err(self.lease_lost())
        }
    }

    fn ensure(&self, next: TaskState) -> ManifestResult<()> {
        // A failure may also land in PENDING; both leave RUNNING.
        let allowed = if next == TaskState::Failed {
            self.state == TaskState::Running
        } else {
            self.state.can_transition_to(next)
        };
        if allowed {
            Ok(())
        } else {
            Err(ManifestError::invalid_transition(format!(
                "task {}: {} -> {next}",
                self.task_id, self.state
            )))
        }
    }

    fn lease_lost(&self) -> ManifestError {
        ManifestError::LeaseExpired {
            task_id: self.task_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobforge_core::{BatchId, JobId};
    use std::time::Duration as StdDuration;

    fn task(now: DateTime<Utc>) -> TaskRecord {
        let job_id = JobId::new();
        TaskRecord::pending(job_id, BatchId::for_ordinal(job_id, 0), 0, now)
    }

    fn worker(name: &str) -> WorkerId {
        WorkerId::new(name)
    }

    #[test]
    fn happy_path_reaches_succeeded() {
        let now = Utc::now();
        let mut t = task(now);
        let lease = t.claim(&worker("w1"), now, Duration::seconds(60)).unwrap();
        assert_eq!(lease.claim, 1);
        assert_eq!(t.lease(), Some(lease.clone()));
        assert_eq!(t.lease_expiry, Some(now + Duration::seconds(60)));
        t.start(&lease, now).unwrap();
        t.succeed(&lease, now).unwrap();
        assert_eq!(t.state, TaskState::Succeeded);
        assert_eq!(t.attempt_count, 1);
        assert_eq!(t.lease_expiry, None);
        assert_eq!(t.lease(), None);
    }

    #[test]
    fn failures_retry_until_attempts_are_exhausted() {
        let now = Utc::now();
        let mut t = task(now);
        let w = worker("w1");
        let policy = RetryPolicy::fixed(3, StdDuration::from_secs(5));

        for attempt in 1..=3u32 {
            let at = now + Duration::seconds(10 * attempt as i64);
            let lease = t.claim(&w, at, Duration::seconds(60)).unwrap();
            t.start(&lease, at).unwrap();
            let outcome = t.fail(&lease, "boom", &policy, at).unwrap();
            if attempt < 3 {
                assert!(matches!(outcome, FailureOutcome::Retrying { .. }));
                assert_eq!(t.state, TaskState::Pending);
                assert_eq!(t.worker_id, None);
            } else {
                assert_eq!(outcome, FailureOutcome::Exhausted);
            }
        }
        assert_eq!(t.state, TaskState::Failed);
        assert_eq!(t.attempt_count, 3);
        assert_eq!(t.claim_count, 3);
        assert!(t.claim(&w, now + Duration::hours(1), Duration::seconds(60)).is_err());
    }

    #[test]
    fn backoff_delays_the_next_claim() {
        let now = Utc::now();
        let mut t = task(now);
        let w = worker("w1");
        let lease = t.claim(&w, now, Duration::seconds(60)).unwrap();
        t.start(&lease, now).unwrap();
        t.fail(&lease, "boom", &RetryPolicy::fixed(3, StdDuration::from_secs(5)), now).unwrap();

        assert!(!t.is_claimable(now + Duration::seconds(4)));
        assert!(t.claim(&w, now + Duration::seconds(4), Duration::seconds(60)).is_err());
        assert!(t.is_claimable(now + Duration::seconds(5)));
    }

    #[test]
    fn reclaim_requires_expired_lease_and_keeps_attempts() {
        let now = Utc::now();
        let mut t = task(now);
        t.claim(&worker("w1"), now, Duration::seconds(60)).unwrap();

        assert!(t.reclaim(now + Duration::seconds(59)).is_err());
        t.reclaim(now + Duration::seconds(60)).unwrap();
        assert_eq!(t.state, TaskState::Pending);
        assert_eq!(t.worker_id, None);
        assert_eq!(t.attempt_count, 0);
        assert_eq!(t.reclaim_count, 1);
        assert_eq!(t.last_error.as_deref(), Some(LEASE_EXPIRED_REASON));
    }

    #[test]
    fn a_reclaimed_worker_cannot_report() {
        let now = Utc::now();
        let mut t = task(now);
        let old = t.claim(&worker("w1"), now, Duration::seconds(60)).unwrap();
        t.start(&old, now).unwrap();
        t.reclaim(now + Duration::seconds(61)).unwrap();
        t.claim(&worker("w2"), now + Duration::seconds(61), Duration::seconds(60)).unwrap();

        let err = t.succeed(&old, now + Duration::seconds(62)).unwrap_err();
        assert!(matches!(err, ManifestError::LeaseExpired { .. }));
    }

    #[test]
    fn a_lease_does_not_survive_a_reclaim_by_the_same_worker_id() {
        let now = Utc::now();
        let mut t = task(now);
        let w = worker("pool-0");
        let first = t.claim(&w, now, Duration::seconds(60)).unwrap();
        t.start(&first, now).unwrap();
        t.reclaim(now + Duration::seconds(60)).unwrap();
        let second = t.claim(&w, now + Duration::seconds(60), Duration::seconds(60)).unwrap();
        t.start(&second, now + Duration::seconds(60)).unwrap();

        assert_ne!(first, second);
        assert!(!t.held_by(&first));
        let later = now + Duration::seconds(70);
        assert!(matches!(t.succeed(&first, later), Err(ManifestError::LeaseExpired { .. })));
        assert_eq!(t.state, TaskState::Running);
        t.succeed(&second, later).unwrap();
    }

    #[test]
    fn reports_after_expiry_are_refused() {
        let now = Utc::now();
        let mut t = task(now);
        let lease = t.claim(&worker("w1"), now, Duration::seconds(60)).unwrap();
        t.start(&lease, now).unwrap();

        let late = now + Duration::seconds(60);
        let policy = RetryPolicy::fixed(3, StdDuration::ZERO);
        assert!(matches!(t.fail(&lease, "timeout", &policy, late), Err(ManifestError::LeaseExpired { .. })));
        assert!(matches!(t.succeed(&lease, late), Err(ManifestError::LeaseExpired { .. })));
        assert_eq!(t.attempt_count, 0);
        t.fail(&lease, "timeout", &policy, late - Duration::seconds(1)).unwrap();
        assert_eq!(t.attempt_count, 1);
    }

    #[test]
    fn permanent_failure_ignores_remaining_attempts() {
        let now = Utc::now();
        let mut t = task(now);
        let lease = t.claim(&worker("w1"), now, Duration::seconds(60)).unwrap();
        assert!(t.fail_permanently(&lease, "corrupt payload", now).is_err());

        t.start(&lease, now).unwrap();
        t.fail_permanently(&lease, "corrupt payload", now).unwrap();
        assert_eq!(t.state, TaskState::Failed);
        assert_eq!(t.attempt_count, 1);
        assert_eq!(t.last_error.as_deref(), Some("corrupt payload"));
    }

    #[test]
    fn expired_lease_cannot_start() {
        let now = Utc::now();
        let mut t = task(now);
        let lease = t.claim(&worker("w1"), now, Duration::seconds(60)).unwrap();
        assert!(matches!(
            t.start(&lease, now + Duration::seconds(60)),
            Err(ManifestError::LeaseExpired { .. })
        ));
        assert_eq!(t.state, TaskState::Assigned);
    }

    #[test]
    fn only_pending_tasks_cancel() {
        let now = Utc::now();
        let mut t = task(now);
        t.claim(&worker("w1"), now, Duration::seconds(60)).unwrap();
        assert!(t.cancel(now).is_err());

        let mut pending = task(now);
        pending.cancel(now).unwrap();
        assert_eq!(pending.state, TaskState::Cancelled);
        assert!(pending.state.is_terminal());
    }
}
