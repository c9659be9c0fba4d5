//! Task worker: claim, execute, report.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use jobforge_core::{BatchId, Clock, JobId, JobState, SharedClock, TaskId, WorkerId};
use jobforge_manifest::{
    BatchPayload, FailureOutcome, JobRecord, Lease, ManifestError, ManifestStore, TaskRecord, TaskResult,
    Versioned,
};

use crate::error::{TaskExecutionError, WorkerError};
use crate::registry::HandlerRegistry;

/// Time kept back from the lease for recording a handler's outcome.
const REPORT_MARGIN: Duration = Duration::from_secs(2);

/// Which jobs a worker serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum JobScope {
    #[default]
    All,
    Jobs(HashSet<JobId>),
}

impl JobScope {
    pub fn only(job_id: JobId) -> Self {
        JobScope::Jobs(HashSet::from([job_id]))
    }

    pub fn includes(&self, job_id: JobId) -> bool {
        match self {
            JobScope::All => true,
            JobScope::Jobs(ids) => ids.contains(&job_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    /// Sleep between polls that found nothing to do.
    pub poll_interval: Duration,
    /// Slot threads started by [`TaskWorker::spawn`].
    pub max_concurrent_tasks: usize,
    pub scope: JobScope,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            poll_interval: Duration::from_millis(100),
            max_concurrent_tasks: 4,
            scope: JobScope::All,
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    pub fn with_scope(mut self, scope: JobScope) -> Self {
        self.scope = scope;
        self
    }
}

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded(TaskId),
    Retrying {
        task_id: TaskId,
        not_before: DateTime<Utc>,
    },
    /// Attempts exhausted.
    Failed(TaskId),
    /// The lease was reclaimed before the outcome could be recorded; the
    /// outcome was dropped.
    LeaseLost(TaskId),
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub claimed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub conflicts_lost: u64,
    pub leases_lost: u64,
    pub reclaimed: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Claims PENDING tasks by CAS and runs them through the handler registry.
pub struct TaskWorker {
    id: WorkerId,
    store: ManifestStore,
    registry: Arc<HandlerRegistry>,
    clock: SharedClock,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl TaskWorker {
    pub fn new(
        store: ManifestStore,
        registry: Arc<HandlerRegistry>,
        clock: SharedClock,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: WorkerId::new(config.name.clone()),
            store,
            registry,
            clock,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Claim and run at most one task. `None` when nothing was claimable.
    pub fn poll_once(&self) -> Result<Option<TaskOutcome>, WorkerError> {
        let now = self.clock.now();
        for job in self.store.jobs()? {
            if !self.serves(&job.value) {
                continue;
            }
            let job_id = job.value.job_id;

            let reclaimed = self.store.reclaim_expired(job_id, now)?;
            self.record(|s| s.reclaimed += reclaimed.len() as u64);

            for task in self.store.tasks(job_id)? {
                if !task.value.is_claimable(now) {
                    continue;
                }
                let Some((claimed, lease)) = self.claim(&job.value, &task)? else {
                    continue;
                };
                return self.execute(&job.value, claimed, lease).map(Some);
            }
        }
        Ok(None)
    }

    fn serves(&self, job: &JobRecord) -> bool {
        self.config.scope.includes(job.job_id)
            && matches!(job.state, JobState::Dispatching | JobState::Running)
            && !job.cancel_requested
    }

    /// Single CAS attempt: PENDING → ASSIGNED. `None` if another writer won.
    fn claim(
        &self,
        job: &JobRecord,
        observed: &Versioned<TaskRecord>,
    ) -> Result<Option<(Versioned<TaskRecord>, Lease)>, WorkerError> {
        let config = job.config()?;
        let lease_length = chrono::Duration::from_std(config.advanced.task_timeout)
            .unwrap_or(chrono::Duration::days(365));

        let mut next = observed.value.clone();
        let Ok(lease) = next.claim(&self.id, self.clock.now(), lease_length) else {
            return Ok(None);
        };
        match self.store.put_task(&next, observed.expected()) {
            Ok(claimed) => {
                debug!(worker = %self.id, task_id = %claimed.value.task_id, claim = lease.claim, "claimed task");
                self.record(|s| s.claimed += 1);
                Ok(Some((claimed, lease)))
            }
            Err(e) if e.is_conflict() => {
                debug!(worker = %self.id, task_id = %observed.value.task_id, "claim lost to another writer");
                self.record(|s| s.conflicts_lost += 1);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn execute(
        &self,
        job: &JobRecord,
        claimed: Versioned<TaskRecord>,
        lease: Lease,
    ) -> Result<TaskOutcome, WorkerError> {
        let task_id = claimed.value.task_id.clone();
        let job_id = job.job_id;
        let config = job.config()?;

        // ASSIGNED → RUNNING; a conflict here means the lease was taken away.
        let mut running = claimed.value.clone();
        let started_at = self.clock.now();
        if running.start(&lease, started_at).is_err() {
            return Ok(self.lease_lost(&task_id));
        }
        match self.store.put_task(&running, claimed.expected()) {
            Ok(_) => {}
            Err(e) if e.is_conflict() => return Ok(self.lease_lost(&task_id)),
            Err(e) => return Err(e.into()),
        }

        let remaining = running
            .lease_expiry
            .and_then(|expiry| (expiry - started_at).to_std().ok())
            .unwrap_or(Duration::ZERO);
        let wait = handler_wait(config.advanced.task_timeout, remaining);

        self.record(|s| s.current_running += 1);
        let started = Instant::now();
        let result = self
            .load_payload(job_id, &running.batch_id)
            .and_then(|payload| self.run_handler(&config.handler, payload, wait));
        self.record(|s| s.current_running = s.current_running.saturating_sub(1));

        match result {
            Ok(records) => {
                let output = TaskResult {
                    job_id,
                    task_id: task_id.clone(),
                    batch_id: running.batch_id.clone(),
                    ordinal: running.ordinal,
                    worker_id: self.id.clone(),
                    attempt: running.attempt_count + 1,
                    claim: lease.claim,
                    records,
                    produced_at: self.clock.now(),
                };
                match self.store.put_task_result(&output, &lease, self.clock.now()) {
                    Ok(_) => {}
                    Err(ManifestError::LeaseExpired { .. }) => return Ok(self.lease_lost(&task_id)),
                    Err(e) => return Err(e.into()),
                }

                let now = self.clock.now();
                match self.store.update_task(job_id, &task_id, |t| t.succeed(&lease, now)) {
                    Ok(_) => {
                        info!(
                            worker = %self.id,
                            job_id = %job_id,
                            task_id = %task_id,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "task succeeded"
                        );
                        self.record(|s| s.succeeded += 1);
                        Ok(TaskOutcome::Succeeded(task_id))
                    }
                    Err(ManifestError::LeaseExpired { .. }) => Ok(self.lease_lost(&task_id)),
                    Err(e) => Err(e.into()),
                }
            }
            Err(failure) if failure.is_permanent() => {
                let now = self.clock.now();
                let message = failure.to_string();
                match self
                    .store
                    .update_task(job_id, &task_id, |t| t.fail_permanently(&lease, message.clone(), now))
                {
                    Ok(_) => {
                        error!(
                            worker = %self.id,
                            job_id = %job_id,
                            task_id = %task_id,
                            error = %failure,
                            "task cannot be run, failed without retry"
                        );
                        self.record(|s| s.failed += 1);
                        Ok(TaskOutcome::Failed(task_id))
                    }
                    Err(ManifestError::LeaseExpired { .. }) => Ok(self.lease_lost(&task_id)),
                    Err(e) => Err(e.into()),
                }
            }
            Err(failure) => {
                let policy = config.retry_policy();
                let now = self.clock.now();
                let message = failure.to_string();
                match self
                    .store
                    .update_task(job_id, &task_id, |t| t.fail(&lease, message.clone(), &policy, now))
                {
                    Ok((task, FailureOutcome::Retrying { not_before })) => {
                        warn!(
                            worker = %self.id,
                            job_id = %job_id,
                            task_id = %task_id,
                            attempt = task.value.attempt_count,
                            error = %failure,
                            %not_before,
                            "task attempt failed, will retry"
                        );
                        self.record(|s| s.retried += 1);
                        Ok(TaskOutcome::Retrying { task_id, not_before })
                    }
                    Ok((task, FailureOutcome::Exhausted)) => {
                        warn!(
                            worker = %self.id,
                            job_id = %job_id,
                            task_id = %task_id,
                            attempts = task.value.attempt_count,
                            error = %failure,
                            "task failed permanently"
                        );
                        self.record(|s| s.failed += 1);
                        Ok(TaskOutcome::Failed(task_id))
                    }
                    Err(ManifestError::LeaseExpired { .. }) => Ok(self.lease_lost(&task_id)),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Records of the batch. A payload that is missing or fails verification
    /// will not get better on retry; a store error might.
    fn load_payload(&self, job_id: JobId, batch_id: &BatchId) -> Result<BatchPayload, TaskExecutionError> {
        match self.store.batch_payload(job_id, batch_id) {
            Ok(payload) => Ok(payload.value),
            Err(
                e @ (ManifestError::Corrupt { .. } | ManifestError::NotFound(_) | ManifestError::Serialization(_)),
            ) => Err(TaskExecutionError::UnusablePayload(e.to_string())),
            Err(e) => Err(TaskExecutionError::PayloadUnavailable(e.to_string())),
        }
    }

    /// Run the handler on its own thread, waiting at most `timeout`.
    ///
    /// A handler that overruns is abandoned, not interrupted.
    fn run_handler(
        &self,
        name: &str,
        payload: BatchPayload,
        timeout: Duration,
    ) -> Result<Vec<serde_json::Value>, TaskExecutionError> {
        let handler = self
            .registry
            .resolve(name)
            .ok_or_else(|| TaskExecutionError::UnknownHandler(name.to_string()))?;

        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("{}-handler", self.id))
            .spawn(move || {
                let _ = tx.send(handler(&payload));
            });
        if let Err(e) = spawned {
            return Err(TaskExecutionError::Handler(format!("cannot spawn handler thread: {e}").into()));
        }

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(TaskExecutionError::from),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(TaskExecutionError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(TaskExecutionError::Panicked),
        }
    }

    fn lease_lost(&self, task_id: &TaskId) -> TaskOutcome {
        warn!(worker = %self.id, task_id = %task_id, "lease lost, dropping task outcome");
        self.record(|s| s.leases_lost += 1);
        TaskOutcome::LeaseLost(task_id.clone())
    }

    fn record(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut s) = self.stats.lock() {
            f(&mut s);
        }
    }

    /// Start `max_concurrent_tasks` polling threads.
    ///
    /// Each slot claims under its own id, `{name}-{slot}`; statistics are
    /// shared.
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let slots = self.config.max_concurrent_tasks.max(1);
        let mut shutdown = Vec::with_capacity(slots);
        let mut joins = Vec::with_capacity(slots);

        for slot in 0..slots {
            let (tx, rx) = mpsc::channel::<()>();
            let w = self.for_slot(slot);
            let join = thread::Builder::new()
                .name(w.id.to_string())
                .spawn(move || slot_loop(&w, slot, &rx))?;
            shutdown.push(tx);
            joins.push(join);
        }

        Ok(WorkerHandle {
            worker: self,
            shutdown,
            joins,
            started: Instant::now(),
        })
    }

    fn for_slot(&self, slot: usize) -> TaskWorker {
        TaskWorker {
            id: WorkerId::new(format!("{}-{slot}", self.config.name)),
            store: self.store.clone(),
            registry: self.registry.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
        }
    }
}

/// How long to wait for a handler that started with `remaining` of its
/// lease left: never past `task_timeout`, and early enough that the
/// failure is recorded while the lease still holds.
fn handler_wait(task_timeout: Duration, remaining: Duration) -> Duration {
    let margin = (remaining / 10).min(REPORT_MARGIN);
    task_timeout.min(remaining.saturating_sub(margin))
}

fn slot_loop(worker: &TaskWorker, slot: usize, shutdown: &mpsc::Receiver<()>) {
    info!(worker = %worker.id, slot, "worker slot started");
    loop {
        let idle = match worker.poll_once() {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(e) => {
                error!(worker = %worker.id, slot, error = %e, "worker poll failed");
                true
            }
        };

        let wait = if idle { worker.config.poll_interval } else { Duration::ZERO };
        match shutdown.recv_timeout(wait) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }
    info!(worker = %worker.id, slot, "worker slot stopped");
}

/// Handle to a running worker pool.
pub struct WorkerHandle {
    worker: TaskWorker,
    shutdown: Vec<mpsc::Sender<()>>,
    joins: Vec<thread::JoinHandle<()>>,
    started: Instant,
}

impl WorkerHandle {
    /// Request shutdown and wait for in-flight tasks to finish.
    pub fn shutdown(self) -> WorkerStats {
        for tx in &self.shutdown {
            let _ = tx.send(());
        }
        for join in self.joins {
            let _ = join.join();
        }
        let mut stats = self.worker.stats();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = self.worker.stats();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    pub fn worker_id(&self) -> &WorkerId {
        self.worker.id()
    }
}
