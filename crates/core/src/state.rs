//! Job and task lifecycle states and their legal transitions.

use serde::{Deserialize, Serialize};

/// Job lifecycle state.
///
/// ```text
/// PENDING → VALIDATING → PARTITIONING → DISPATCHING → RUNNING → AGGREGATING → COMPLETED
///                  (FAILED / CANCELLED reachable from any non-terminal state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Validating,
    Partitioning,
    Dispatching,
    Running,
    Aggregating,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;

        if self.is_terminal() {
            return false;
        }
        match next {
            Failed | Cancelled => true,
            // Zero batches: an empty job completes straight out of partitioning.
            Completed => matches!(self, Aggregating | Partitioning),
            Validating => self == Pending,
            Partitioning => self == Validating,
            Dispatching => self == Partitioning,
            Running => self == Dispatching,
            Aggregating => self == Running,
            Pending => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Validating => "VALIDATING",
            JobState::Partitioning => "PARTITIONING",
            JobState::Dispatching => "DISPATCHING",
            JobState::Running => "RUNNING",
            JobState::Aggregating => "AGGREGATING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle state.
///
/// ```text
/// PENDING → ASSIGNED → RUNNING → SUCCEEDED | FAILED
/// ASSIGNED/RUNNING → PENDING   (lease expiry, or a retryable failure from RUNNING)
/// PENDING → CANCELLED          (job cancellation)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Assigned,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled)
    }

    /// Task currently held under a lease by some worker.
    pub fn is_leased(self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::Running)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, next),
            (Pending, Assigned)
                | (Assigned, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Pending)
                | (Assigned, Pending)
                | (Pending, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Assigned => "ASSIGNED",
            TaskState::Running => "RUNNING",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for TaskState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_linear() {
        use JobState::*;
        let path = [Pending, Validating, Partitioning, Dispatching, Running, Aggregating, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Pending.can_transition_to(Partitioning));
        assert!(!Running.can_transition_to(Dispatching));
    }

    #[test]
    fn failed_and_cancelled_reachable_from_any_non_terminal_state() {
        use JobState::*;
        for s in [Pending, Validating, Partitioning, Dispatching, Running, Aggregating] {
            assert!(s.can_transition_to(Failed));
            assert!(s.can_transition_to(Cancelled));
        }
        for s in [Completed, Failed, Cancelled] {
            assert!(!s.can_transition_to(Failed));
            assert!(!s.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn task_transitions_never_leave_terminal_states() {
        use TaskState::*;
        for from in [Succeeded, Failed, Cancelled] {
            for to in [Pending, Assigned, Running, Succeeded, Failed, Cancelled] {
                assert!(!from.can_transition_to(to));
            }
        }
        assert!(Assigned.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Running));
        assert!(!Running.can_transition_to(Cancelled));
    }

    #[test]
    fn states_serialize_in_upper_case() {
        assert_eq!(serde_json::to_string(&JobState::Aggregating).unwrap(), "\"AGGREGATING\"");
        assert_eq!(serde_json::to_string(&TaskState::Assigned).unwrap(), "\"ASSIGNED\"");
    }
}
