//! Job lifecycle state machine.
//!
//! ```text
//! PENDING → VALIDATING → PARTITIONING → DISPATCHING → RUNNING → AGGREGATING → COMPLETED
//!                  (FAILED / CANCELLED reachable from any non-terminal state)
//! ```
//!
//! ## Execution model
//!
//! The coordinator holds no job state between calls. [`Coordinator::advance`]
//! reads the job record, performs the work of its current state and persists
//! the next state with a compare-and-swap. A restarted coordinator therefore
//! resumes exactly where the manifest store says the job is.
//!
//! Side effects that are not idempotent are guarded by a persisted flag or
//! by an existence check:
//!
//! - batches and tasks have deterministic ids and are created only if absent
//! - tasks are written only after the whole input partitioned cleanly, so a
//!   job failed by its input has no tasks
//! - `launch_requested` is persisted before the worker launcher is called
//!
//! Every persisted transition is then published as a [`JobEvent`]. A failed
//! publish is logged; the manifest store stays the source of truth.
//!
//! ## Cancellation
//!
//! Cancellation is cooperative. Once `cancel_requested` is set, PENDING tasks
//! are moved to CANCELLED, in-flight tasks are left to finish or to run out
//! their lease, and the job becomes CANCELLED when no task is left running.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use jobforge_aggregator::{AggregationError, Aggregator, OutputSink};
use jobforge_config::{ConfigError, JobConfig, PartialJobConfig};
use jobforge_core::{Clock, JobId, JobState, SharedClock, TaskState};
use jobforge_events::{EventBus, JobEvent};
use jobforge_manifest::{BatchRecord, JobRecord, ManifestError, ManifestStore, TaskRecord, Versioned};
use jobforge_partition::{InputSource, Partitioner};

use crate::error::CoordinatorError;
use crate::launcher::{LaunchRequest, NoopLauncher, WorkerLauncher};

/// Drives jobs through their lifecycle.
///
/// `B` is the bus transitions are published on.
pub struct Coordinator<B> {
    store: ManifestStore,
    partitioner: Partitioner,
    aggregator: Aggregator,
    launcher: Arc<dyn WorkerLauncher>,
    bus: B,
    clock: SharedClock,
}

impl<B> Coordinator<B> {
    pub fn new(
        store: ManifestStore,
        source: Arc<dyn InputSource>,
        sink: Arc<dyn OutputSink>,
        bus: B,
        clock: SharedClock,
    ) -> Self {
        Self {
            aggregator: Aggregator::new(store.clone(), sink, clock.clone()),
            partitioner: Partitioner::new(source),
            launcher: Arc::new(NoopLauncher),
            store,
            bus,
            clock,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> Coordinator<B>
where
    B: EventBus<JobEvent>,
{
    /// Record a new job and validate its configuration.
    ///
    /// A job whose configuration is invalid is still recorded, as FAILED,
    /// and reported through [`CoordinatorError::InvalidConfig`].
    pub fn submit(&self, raw: &str) -> Result<JobId, CoordinatorError> {
        let job_id = JobId::new();
        // Best effort: the name is only known for documents that at least parse.
        let name = PartialJobConfig::from_json(raw)
            .ok()
            .and_then(|p| p.name)
            .unwrap_or_default();

        let job = self
            .store
            .create_job(&JobRecord::new(job_id, name, raw, self.clock.now()))?;
        info!(job_id = %job_id, job = %job.value.name, "job submitted");

        let job = self.transition(job_id, JobState::Pending, JobState::Validating, None, |_| ())?;
        match self.validate(&job)? {
            Some(error) => Err(CoordinatorError::InvalidConfig { job_id, error }),
            None => Ok(job_id),
        }
    }

    /// Perform the work of the job's current state once.
    ///
    /// Returns the state the job is in afterwards. Steps that are waiting on
    /// workers return the unchanged state.
    pub fn advance(&self, job_id: JobId) -> Result<JobState, CoordinatorError> {
        let job = self.store.job_required(job_id)?.value;
        if job.state.is_terminal() {
            return Ok(job.state);
        }
        if job.cancel_requested {
            return self.cancel(&job);
        }

        match job.state {
            JobState::Pending => {
                self.transition(job_id, JobState::Pending, JobState::Validating, None, |_| ())?;
                Ok(JobState::Validating)
            }
            JobState::Validating => Ok(match self.validate(&job)? {
                Some(_) => JobState::Failed,
                None => JobState::Partitioning,
            }),
            JobState::Partitioning => self.partition(&job),
            JobState::Dispatching => self.dispatch(&job),
            JobState::Running => self.observe(&job),
            JobState::Aggregating => self.aggregate(&job),
            terminal => Ok(terminal),
        }
    }

    /// Advance `job_id` until it stops making progress on its own: it is
    /// terminal or waiting on workers.
    pub fn drive(&self, job_id: JobId) -> Result<JobState, CoordinatorError> {
        let mut state = self.store.job_required(job_id)?.value.state;
        loop {
            let next = self.advance(job_id)?;
            if next == state || next.is_terminal() {
                return Ok(next);
            }
            state = next;
        }
    }

    /// Drive `job_id` to a terminal state, polling every `poll_interval`
    /// while its tasks run.
    pub fn run_to_completion(&self, job_id: JobId, poll_interval: Duration) -> Result<JobState, CoordinatorError> {
        loop {
            let state = self.drive(job_id)?;
            if state.is_terminal() {
                return Ok(state);
            }
            thread::sleep(poll_interval);
        }
    }

    /// Resume every job that is not terminal, after a restart.
    pub fn recover(&self) -> Result<Vec<(JobId, JobState)>, CoordinatorError> {
        let mut resumed = Vec::new();
        for job in self.store.jobs()? {
            let job = job.value;
            if job.state.is_terminal() {
                continue;
            }
            info!(job_id = %job.job_id, state = %job.state, "resuming job");
            match self.drive(job.job_id) {
                Ok(state) => resumed.push((job.job_id, state)),
                // One broken record must not stop the others.
                Err(CoordinatorError::Manifest(e @ ManifestError::Corrupt { .. })) => {
                    error!(job_id = %job.job_id, error = %e, "cannot resume job");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(resumed)
    }

    // --- steps ---

    /// VALIDATING → PARTITIONING, or FAILED. Returns the rejection, if any.
    fn validate(&self, job: &JobRecord) -> Result<Option<ConfigError>, CoordinatorError> {
        match JobConfig::parse(&job.source) {
            Ok(config) => {
                self.transition(job.job_id, JobState::Validating, JobState::Partitioning, None, |j| {
                    j.name = config.name.clone();
                    j.config = Some(config.clone());
                })?;
                Ok(None)
            }
            Err(error) => {
                warn!(job_id = %job.job_id, error = %error, "job config rejected");
                self.transition(
                    job.job_id,
                    JobState::Validating,
                    JobState::Failed,
                    Some(error.to_string()),
                    |_| (),
                )?;
                Ok(Some(error))
            }
        }
    }

    /// PARTITIONING → DISPATCHING; COMPLETED for empty input; FAILED when
    /// the input cannot be read.
    fn partition(&self, job: &JobRecord) -> Result<JobState, CoordinatorError> {
        let config = job.config()?;
        let job_id = job.job_id;

        let stream = match self
            .partitioner
            .batches(job_id, &config.input, config.advanced.batch_size)
        {
            Ok(stream) => stream,
            Err(e) => return self.fail(job, format!("partitioning failed: {e}")),
        };

        let mut batches: Vec<BatchRecord> = Vec::new();
        for batch in stream {
            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => return self.fail(job, format!("partitioning failed: {e}")),
            };
            if !self.store.create_batch(&batch.record, &batch.payload)? {
                debug!(job_id = %job_id, batch_id = %batch.record.batch_id, "batch already written");
            }
            batches.push(batch.record);
        }
        let total_records: u64 = batches.iter().map(|b| b.record_count).sum();

        if batches.is_empty() {
            info!(job_id = %job_id, "input is empty");
            let output = match self.aggregator.aggregate(job) {
                Ok(output) => output,
                Err(e) => return self.aggregation_failed(job, e),
            };
            self.transition(
                job_id,
                JobState::Partitioning,
                JobState::Completed,
                Some("empty input".to_string()),
                |j| j.total_records = output.record_count,
            )?;
            return Ok(JobState::Completed);
        }

        // Only now that the whole input is known good do tasks appear.
        let now = self.clock.now();
        for batch in &batches {
            let task = TaskRecord::pending(job_id, batch.batch_id.clone(), batch.ordinal, now);
            self.store.create_task(&task)?;
        }

        let batch_ids: Vec<_> = batches.iter().map(|b| b.batch_id.clone()).collect();
        info!(job_id = %job_id, batches = batch_ids.len(), records = total_records, "input partitioned");
        self.transition(job_id, JobState::Partitioning, JobState::Dispatching, None, |j| {
            j.batch_ids = batch_ids.clone();
            j.total_records = total_records;
        })?;
        Ok(JobState::Dispatching)
    }

    /// DISPATCHING → RUNNING once every batch has a task and workers were
    /// requested.
    fn dispatch(&self, job: &JobRecord) -> Result<JobState, CoordinatorError> {
        let config = job.config()?;
        let job_id = job.job_id;

        let created = self.ensure_tasks(job)?;
        if created > 0 {
            info!(job_id = %job_id, created, "created missing task records");
        }

        if !job.launch_requested {
            self.store.update_job(job_id, |j| {
                j.launch_requested = true;
                Ok(())
            })?;
            let request = LaunchRequest {
                job_id,
                job_name: job.name.clone(),
                handler: config.handler.clone(),
                workers: config.compute.workers,
                compute: config.compute.clone(),
            };
            if let Err(error) = self.launcher.launch(&request) {
                // Leave the job in DISPATCHING with the request un-issued.
                self.store.update_job(job_id, |j| {
                    j.launch_requested = false;
                    Ok(())
                })?;
                return Err(CoordinatorError::Launch { job_id, error });
            }
            info!(job_id = %job_id, workers = request.workers, handler = %request.handler, "workers requested");
        } else {
            debug!(job_id = %job_id, "worker launch already requested");
        }

        self.transition(job_id, JobState::Dispatching, JobState::Running, None, |_| ())?;
        Ok(JobState::Running)
    }

    /// Create the task of every batch that has none. Returns how many were
    /// created.
    fn ensure_tasks(&self, job: &JobRecord) -> Result<usize, CoordinatorError> {
        let existing: HashSet<_> = self
            .store
            .tasks(job.job_id)?
            .into_iter()
            .map(|t| t.value.batch_id)
            .collect();

        let now = self.clock.now();
        let mut created = 0;
        for batch in self.store.batches(job.job_id)? {
            let batch = batch.value;
            if existing.contains(&batch.batch_id) {
                continue;
            }
            let task = TaskRecord::pending(job.job_id, batch.batch_id, batch.ordinal, now);
            if self.store.create_task(&task)?.was_created() {
                created += 1;
            }
        }
        Ok(created)
    }

    /// RUNNING → AGGREGATING once every task is terminal.
    fn observe(&self, job: &JobRecord) -> Result<JobState, CoordinatorError> {
        let job_id = job.job_id;
        self.store.reclaim_expired(job_id, self.clock.now())?;

        let tasks = self.store.tasks(job_id)?;
        let remaining = tasks.iter().filter(|t| !t.value.state.is_terminal()).count();
        if remaining > 0 {
            debug!(job_id = %job_id, remaining, "tasks still running");
            return Ok(JobState::Running);
        }

        let failed = tasks.iter().filter(|t| t.value.state == TaskState::Failed).count() as u32;
        self.transition(job_id, JobState::Running, JobState::Aggregating, None, |j| {
            j.failure_count = failed;
        })?;
        Ok(JobState::Aggregating)
    }

    /// AGGREGATING → COMPLETED, or FAILED past the failure threshold or when
    /// the output cannot be written.
    fn aggregate(&self, job: &JobRecord) -> Result<JobState, CoordinatorError> {
        let config = job.config()?;
        let threshold = config.advanced.failure_threshold;
        if job.failure_count > threshold {
            return self.fail(
                job,
                format!("{} tasks failed, threshold is {threshold}", job.failure_count),
            );
        }

        match self.aggregator.aggregate(job) {
            Ok(output) => {
                self.transition(job.job_id, JobState::Aggregating, JobState::Completed, None, |_| ())?;
                info!(
                    job_id = %job.job_id,
                    records = output.record_count,
                    failed_batches = output.failed_batches.len(),
                    "job completed"
                );
                Ok(JobState::Completed)
            }
            Err(e) => self.aggregation_failed(job, e),
        }
    }

    /// Cancel what has not started; CANCELLED once nothing is running.
    fn cancel(&self, job: &JobRecord) -> Result<JobState, CoordinatorError> {
        let job_id = job.job_id;
        let now = self.clock.now();
        self.store.reclaim_expired(job_id, now)?;
        let cancelled = self.store.cancel_pending(job_id, now)?;
        if cancelled > 0 {
            info!(job_id = %job_id, cancelled, "pending tasks cancelled");
        }

        let in_flight = self
            .store
            .tasks(job_id)?
            .iter()
            .filter(|t| !t.value.state.is_terminal())
            .count();
        if in_flight > 0 {
            debug!(job_id = %job_id, in_flight, "waiting for in-flight tasks before cancelling");
            return Ok(job.state);
        }

        self.transition(
            job_id,
            job.state,
            JobState::Cancelled,
            Some("cancelled on request".to_string()),
            |_| (),
        )?;
        Ok(JobState::Cancelled)
    }

    fn aggregation_failed(&self, job: &JobRecord, e: AggregationError) -> Result<JobState, CoordinatorError> {
        match e {
            // Store trouble is not a verdict on the job; try again later.
            AggregationError::Manifest(e) if !matches!(e, ManifestError::Corrupt { .. }) => Err(e.into()),
            e => self.fail(job, format!("aggregation failed: {e}")),
        }
    }

    fn fail(&self, job: &JobRecord, reason: String) -> Result<JobState, CoordinatorError> {
        warn!(job_id = %job.job_id, state = %job.state, reason = %reason, "job failed");
        self.transition(job.job_id, job.state, JobState::Failed, Some(reason), |_| ())?;
        Ok(JobState::Failed)
    }

    /// Persist `from → to` with a compare-and-swap and publish it.
    ///
    /// `apply` runs against the freshly read record on every attempt. The
    /// write is refused if the job has left `from` in the meantime.
    fn transition<F>(
        &self,
        job_id: JobId,
        from: JobState,
        to: JobState,
        reason: Option<String>,
        mut apply: F,
    ) -> Result<JobRecord, CoordinatorError>
    where
        F: FnMut(&mut JobRecord),
    {
        let now = self.clock.now();
        let (written, ()) = self.store.update_job(job_id, |job| {
            if job.state != from {
                return Err(ManifestError::invalid_transition(format!(
                    "job {job_id} is {}, expected {from}",
                    job.state
                )));
            }
            apply(job);
            job.transition(to, now, reason.clone())
        })?;

        info!(
            job_id = %job_id,
            from = %from,
            to = %to,
            version = written.version,
            "job transition"
        );
        self.publish(&written);
        Ok(written.value)
    }

    fn publish(&self, written: &Versioned<JobRecord>) {
        let job = &written.value;
        let Some(t) = job.last_transition() else {
            return;
        };

        let mut event = JobEvent::transition(job.job_id, &job.name, t.from, t.to, written.version, t.at)
            .with_reason(t.reason.clone());
        if let Some(config) = &job.config {
            if config.notifications.wants(t.to) {
                event = event.with_notification(config.notifications.recipients.clone());
            }
        }

        if let Err(e) = self.bus.publish(event) {
            warn!(job_id = %job.job_id, to = %t.to, error = ?e, "job event publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::RecordingLauncher;
    use jobforge_aggregator::ManifestOutputSink;
    use jobforge_core::ManualClock;
    use jobforge_events::InMemoryEventBus;
    use jobforge_manifest::InMemoryManifestBackend;
    use jobforge_partition::InMemorySource;
    use serde_json::json;

    struct Fixture {
        coordinator: Coordinator<Arc<InMemoryEventBus<JobEvent>>>,
        source: Arc<InMemorySource>,
        launcher: Arc<RecordingLauncher>,
    }

    fn fixture() -> Fixture {
        let store = ManifestStore::new(Arc::new(InMemoryManifestBackend::new()));
        let source = Arc::new(InMemorySource::new());
        let launcher = Arc::new(RecordingLauncher::new());
        let coordinator = Coordinator::new(
            store.clone(),
            source.clone(),
            Arc::new(ManifestOutputSink::new(store)),
            Arc::new(InMemoryEventBus::new()),
            ManualClock::starting_now(),
        )
        .with_launcher(launcher.clone());
        Fixture {
            coordinator,
            source,
            launcher,
        }
    }

    fn config(batch_size: u64) -> String {
        format!(
            r#"{{
                "name": "ingest",
                "handler": "passthrough",
                "input": {{ "path": "in.jsonl", "format": "jsonl" }},
                "output": {{ "location": "mem" }},
                "advanced": {{ "batch_size": {batch_size} }}
            }}"#
        )
    }

    #[test]
    fn submit_validates_and_stops_at_partitioning() {
        let f = fixture();
        let job_id = f.coordinator.submit(&config(10)).unwrap();
        let job = f.coordinator.store().job_required(job_id).unwrap().value;

        assert_eq!(job.state, JobState::Partitioning);
        assert_eq!(job.name, "ingest");
        assert!(job.config.is_some());
        let path: Vec<_> = job.transitions.iter().map(|t| t.to).collect();
        assert_eq!(path, vec![JobState::Validating, JobState::Partitioning]);
    }

    #[test]
    fn invalid_config_is_recorded_as_failed() {
        let f = fixture();
        let err = f.coordinator.submit(r#"{ "name": "x" }"#).unwrap_err();
        let CoordinatorError::InvalidConfig { job_id, error } = err else {
            panic!("expected InvalidConfig, got {err:?}");
        };
        assert!(error.mentions("handler"));
        assert!(error.mentions("input"));

        let job = f.coordinator.store().job_required(job_id).unwrap().value;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.config.is_none());
        assert!(job.failure_reason.unwrap().contains("handler"));
        assert!(f.coordinator.store().tasks(job_id).unwrap().is_empty());
    }

    #[test]
    fn dispatch_requests_workers_once() {
        let f = fixture();
        f.source
            .insert_records("in.jsonl", (0..25).map(|i| json!({ "n": i })));
        let job_id = f.coordinator.submit(&config(10)).unwrap();

        assert_eq!(f.coordinator.drive(job_id).unwrap(), JobState::Running);
        assert_eq!(f.coordinator.store().tasks(job_id).unwrap().len(), 3);
        let requests = f.launcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].handler, "passthrough");
        assert_eq!(requests[0].workers, 1);

        // Running with tasks outstanding: nothing further happens.
        assert_eq!(f.coordinator.advance(job_id).unwrap(), JobState::Running);
        assert_eq!(f.launcher.requests().len(), 1);
    }

    #[test]
    fn failed_launch_is_retried_on_the_next_pass() {
        let store = ManifestStore::new(Arc::new(InMemoryManifestBackend::new()));
        let source = Arc::new(InMemorySource::new());
        source.insert_records("in.jsonl", [json!(1)]);
        let launcher = Arc::new(RecordingLauncher::failing_first(1));
        let coordinator = Coordinator::new(
            store.clone(),
            source,
            Arc::new(ManifestOutputSink::new(store.clone())),
            Arc::new(InMemoryEventBus::<JobEvent>::new()),
            ManualClock::starting_now(),
        )
        .with_launcher(launcher.clone());

        let job_id = coordinator.submit(&config(10)).unwrap();
        assert_eq!(coordinator.advance(job_id).unwrap(), JobState::Dispatching);
        assert!(matches!(
            coordinator.advance(job_id),
            Err(CoordinatorError::Launch { .. })
        ));
        let job = store.job_required(job_id).unwrap().value;
        assert_eq!(job.state, JobState::Dispatching);
        assert!(!job.launch_requested);

        assert_eq!(coordinator.advance(job_id).unwrap(), JobState::Running);
        assert_eq!(launcher.requests().len(), 1);
    }

    #[test]
    fn transitions_are_published_with_notifications() {
        let f = fixture();
        let sub = f.coordinator.bus().subscribe();
        let raw = r#"{
            "name": "notify",
            "handler": "h",
            "input": { "path": "missing.jsonl", "format": "jsonl" },
            "output": { "location": "mem" },
            "notifications": { "on": ["failed"], "recipients": ["ops@example.com"] }
        }"#;
        let job_id = f.coordinator.submit(raw).unwrap();
        assert_eq!(f.coordinator.advance(job_id).unwrap(), JobState::Failed);

        let events: Vec<JobEvent> = std::iter::from_fn(|| sub.try_recv().ok()).collect();
        let states: Vec<_> = events.iter().map(|e| e.to).collect();
        assert_eq!(
            states,
            vec![JobState::Validating, JobState::Partitioning, JobState::Failed]
        );
        assert!(!events[1].notify);
        assert!(events[2].notify);
        assert_eq!(events[2].recipients, vec!["ops@example.com".to_string()]);
        assert!(events.windows(2).all(|w| w[0].version < w[1].version));
    }

    #[test]
    fn cancel_before_dispatch_cancels_immediately() {
        let f = fixture();
        f.source.insert_records("in.jsonl", [json!(1)]);
        let job_id = f.coordinator.submit(&config(10)).unwrap();
        f.coordinator
            .store()
            .update_job(job_id, |j| {
                j.cancel_requested = true;
                Ok(())
            })
            .unwrap();

        assert_eq!(f.coordinator.advance(job_id).unwrap(), JobState::Cancelled);
        assert!(f.launcher.requests().is_empty());
    }
}
