use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobforge_core::{JobId, JobState};

/// A persisted job state transition, as seen by downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub event_id: Uuid,
    pub job_id: JobId,
    pub job_name: String,
    pub from: JobState,
    pub to: JobState,
    /// Job record version written by the transition.
    pub version: u64,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Whether the job's notification settings ask for this transition.
    pub notify: bool,
    pub recipients: Vec<String>,
}

impl JobEvent {
    pub fn transition(
        job_id: JobId,
        job_name: impl Into<String>,
        from: JobState,
        to: JobState,
        version: u64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            job_id,
            job_name: job_name.into(),
            from,
            to,
            version,
            reason: None,
            occurred_at,
            notify: false,
            recipients: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_notification(mut self, recipients: Vec<String>) -> Self {
        self.notify = true;
        self.recipients = recipients;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_routing_travels_with_the_event() {
        let event = JobEvent::transition(JobId::new(), "nightly", JobState::Aggregating, JobState::Failed, 7, Utc::now())
            .with_reason(Some("2 tasks failed, threshold is 0".to_string()))
            .with_notification(vec!["ops@example.com".to_string()]);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["to"], "FAILED");
        assert_eq!(json["notify"], true);
        assert_eq!(json["recipients"][0], "ops@example.com");
        assert!(event.is_terminal());

        let back: JobEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
