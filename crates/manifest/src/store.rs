use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use jobforge_core::{BatchId, Checksum, ExpectedVersion, JobId, RetryPolicy, TaskId};

use crate::backend::ManifestBackend;
use crate::error::{ManifestError, ManifestResult};
use crate::keys;
use crate::records::{BatchPayload, BatchRecord, JobOutput, JobRecord, Lease, TaskRecord, TaskResult};

/// A decoded record with the version and checksum it was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
    pub checksum: Checksum,
}

impl<T> Versioned<T> {
    pub fn expected(&self) -> ExpectedVersion {
        ExpectedVersion::Exact(self.version)
    }
}

/// Result of a create-if-absent write.
#[derive(Debug, Clone, PartialEq)]
pub enum Created<T> {
    Created(Versioned<T>),
    /// Another writer (or an earlier run) created the record first.
    Existing(Versioned<T>),
}

impl<T> Created<T> {
    pub fn into_inner(self) -> Versioned<T> {
        match self {
            Created::Created(v) | Created::Existing(v) => v,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Created::Created(_))
    }
}

/// Outcome of listing every job record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobScan {
    pub jobs: Vec<Versioned<JobRecord>>,
    /// Keys of job records that could not be verified or decoded.
    pub unreadable: Vec<String>,
}

/// Typed, checksum-verifying client over a [`ManifestBackend`].
///
/// Every write is conditional. Reads verify the stored checksum and fail
/// with [`ManifestError::Corrupt`] on mismatch.
#[derive(Clone)]
pub struct ManifestStore {
    backend: Arc<dyn ManifestBackend>,
    conflict_policy: RetryPolicy,
}

impl std::fmt::Debug for ManifestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestStore")
            .field("conflict_policy", &self.conflict_policy)
            .finish_non_exhaustive()
    }
}

impl ManifestStore {
    pub fn new(backend: Arc<dyn ManifestBackend>) -> Self {
        Self {
            backend,
            conflict_policy: RetryPolicy::for_conflicts(),
        }
    }

    pub fn with_conflict_policy(mut self, policy: RetryPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ManifestBackend> {
        &self.backend
    }

    // --- generic operations ---

    pub fn read<T: DeserializeOwned>(&self, key: &str) -> ManifestResult<Option<Versioned<T>>> {
        let Some(entry) = self.backend.get(key)? else {
            return Ok(None);
        };
        if !entry.checksum.verify(&entry.value) {
            tracing::error!(key, version = entry.version, "manifest checksum mismatch");
            return Err(ManifestError::Corrupt {
                key: key.to_string(),
                version: entry.version,
            });
        }
        let value = serde_json::from_slice(&entry.value)
            .map_err(|e| ManifestError::Serialization(format!("{key}: {e}")))?;
        Ok(Some(Versioned {
            value,
            version: entry.version,
            checksum: entry.checksum,
        }))
    }

    pub fn read_required<T: DeserializeOwned>(&self, key: &str) -> ManifestResult<Versioned<T>> {
        self.read(key)?
            .ok_or_else(|| ManifestError::NotFound(key.to_string()))
    }

    /// Conditional write. Returns the new version.
    pub fn write<T: Serialize>(&self, key: &str, value: &T, expected: ExpectedVersion) -> ManifestResult<u64> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ManifestError::Serialization(format!("{key}: {e}")))?;
        let checksum = Checksum::of(&bytes);
        self.backend.conditional_put(key, bytes, checksum, expected)
    }

    /// Write `value` and return it with its new version and checksum.
    pub fn write_versioned<T: Serialize + Clone>(
        &self,
        key: &str,
        value: &T,
        expected: ExpectedVersion,
    ) -> ManifestResult<Versioned<T>> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ManifestError::Serialization(format!("{key}: {e}")))?;
        let checksum = Checksum::of(&bytes);
        let version = self
            .backend
            .conditional_put(key, bytes, checksum.clone(), expected)?;
        Ok(Versioned {
            value: value.clone(),
            version,
            checksum,
        })
    }

    /// Create `key` unless it already exists; an existing record is returned as is.
    pub fn create_if_absent<T>(&self, key: &str, value: &T) -> ManifestResult<Created<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        match self.write_versioned(key, value, ExpectedVersion::Absent) {
            Ok(created) => Ok(Created::Created(created)),
            Err(e) if e.is_conflict() => Ok(Created::Existing(self.read_required(key)?)),
            Err(e) => Err(e),
        }
    }

    /// Read-modify-write with optimistic concurrency.
    ///
    /// `mutate` is applied to a fresh copy of the record on every attempt; a
    /// conflicting write by someone else causes a re-read and another pass.
    /// An error from `mutate` aborts without writing.
    pub fn update<T, R, F>(&self, key: &str, mut mutate: F) -> ManifestResult<(Versioned<T>, R)>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnMut(&mut T) -> ManifestResult<R>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let current: Versioned<T> = self.read_required(key)?;
            let mut value = current.value.clone();
            let out = mutate(&mut value)?;

            match self.write_versioned(key, &value, current.expected()) {
                Ok(written) => return Ok((written, out)),
                Err(e) if e.is_conflict() && self.conflict_policy.should_retry(attempt) => {
                    tracing::debug!(key, attempt, "manifest conflict, re-reading");
                    thread::sleep(self.conflict_policy.delay_for(attempt, key));
                }
                Err(e) => return Err(e),
            }
        }
    }

    // --- jobs ---

    pub fn create_job(&self, job: &JobRecord) -> ManifestResult<Versioned<JobRecord>> {
        self.write_versioned(&keys::job(job.job_id), job, ExpectedVersion::Absent)
            .map_err(|e| match e {
                ManifestError::Conflict { key, .. } => ManifestError::AlreadyExists(key),
                other => other,
            })
    }

    pub fn job(&self, job_id: JobId) -> ManifestResult<Option<Versioned<JobRecord>>> {
        self.read(&keys::job(job_id))
    }

    pub fn job_required(&self, job_id: JobId) -> ManifestResult<Versioned<JobRecord>> {
        self.read_required(&keys::job(job_id))
    }

    /// CAS write of a job record the caller read at `expected`.
    pub fn put_job(&self, job: &JobRecord, expected: ExpectedVersion) -> ManifestResult<Versioned<JobRecord>> {
        self.write_versioned(&keys::job(job.job_id), job, expected)
    }

    pub fn update_job<R, F>(&self, job_id: JobId, mutate: F) -> ManifestResult<(Versioned<JobRecord>, R)>
    where
        F: FnMut(&mut JobRecord) -> ManifestResult<R>,
    {
        self.update(&keys::job(job_id), mutate)
    }

    pub fn list_job_ids(&self) -> ManifestResult<Vec<JobId>> {
        let mut ids = Vec::new();
        for key in self.backend.list(keys::JOBS_PREFIX)? {
            let raw = key.trim_start_matches(keys::JOBS_PREFIX);
            match raw.parse() {
                Ok(id) => ids.push(id),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping unparseable job key"),
            }
        }
        Ok(ids)
    }

    /// Every readable job record, plus the keys of those that failed
    /// checksum verification or decoding.
    pub fn scan_jobs(&self) -> ManifestResult<JobScan> {
        let mut scan = JobScan::default();
        for job_id in self.list_job_ids()? {
            match self.job(job_id) {
                Ok(Some(job)) => scan.jobs.push(job),
                Ok(None) => {}
                Err(ManifestError::Corrupt { .. } | ManifestError::Serialization(_)) => {
                    scan.unreadable.push(keys::job(job_id));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(scan)
    }

    /// Readable job records. Unreadable ones are logged and skipped so that
    /// one damaged record does not stop work on the others.
    pub fn jobs(&self) -> ManifestResult<Vec<Versioned<JobRecord>>> {
        let scan = self.scan_jobs()?;
        for key in &scan.unreadable {
            tracing::error!(key = %key, "skipping unreadable job record");
        }
        Ok(scan.jobs)
    }

    // --- batches ---

    pub fn create_batch(&self, batch: &BatchRecord, payload: &BatchPayload) -> ManifestResult<bool> {
        // Payload first: a batch record is only ever visible with its records.
        self.create_if_absent(&keys::payload(batch.job_id, &batch.batch_id), payload)?;
        Ok(self
            .create_if_absent(&keys::batch(batch.job_id, &batch.batch_id), batch)?
            .was_created())
    }

    pub fn batches(&self, job_id: JobId) -> ManifestResult<Vec<Versioned<BatchRecord>>> {
        self.list_records(&keys::batches_prefix(job_id))
    }

    pub fn batch(&self, job_id: JobId, batch_id: &BatchId) -> ManifestResult<Option<Versioned<BatchRecord>>> {
        self.read(&keys::batch(job_id, batch_id))
    }

    pub fn batch_payload(&self, job_id: JobId, batch_id: &BatchId) -> ManifestResult<Versioned<BatchPayload>> {
        self.read_required(&keys::payload(job_id, batch_id))
    }

    // --- tasks ---

    pub fn create_task(&self, task: &TaskRecord) -> ManifestResult<Created<TaskRecord>> {
        self.create_if_absent(&keys::task(task.job_id, &task.task_id), task)
    }

    pub fn task(&self, job_id: JobId, task_id: &TaskId) -> ManifestResult<Option<Versioned<TaskRecord>>> {
        self.read(&keys::task(job_id, task_id))
    }

    pub fn tasks(&self, job_id: JobId) -> ManifestResult<Vec<Versioned<TaskRecord>>> {
        self.list_records(&keys::tasks_prefix(job_id))
    }

    /// Single CAS write of a task record read at `expected`. Conflicts are
    /// returned, not retried.
    pub fn put_task(&self, task: &TaskRecord, expected: ExpectedVersion) -> ManifestResult<Versioned<TaskRecord>> {
        self.write_versioned(&keys::task(task.job_id, &task.task_id), task, expected)
    }

    pub fn update_task<R, F>(
        &self,
        job_id: JobId,
        task_id: &TaskId,
        mutate: F,
    ) -> ManifestResult<(Versioned<TaskRecord>, R)>
    where
        F: FnMut(&mut TaskRecord) -> ManifestResult<R>,
    {
        self.update(&keys::task(job_id, task_id), mutate)
    }

    /// Return every task of `job_id` whose lease ran out at `now` to PENDING.
    pub fn reclaim_expired(&self, job_id: JobId, now: DateTime<Utc>) -> ManifestResult<Vec<TaskId>> {
        let mut reclaimed = Vec::new();
        for task in self.tasks(job_id)? {
            if !task.value.lease_expired(now) {
                continue;
            }
            let task_id = task.value.task_id.clone();
            let mut next = task.value.clone();
            if next.reclaim(now).is_err() {
                continue;
            }
            match self.put_task(&next, task.expected()) {
                Ok(_) => {
                    tracing::warn!(
                        job_id = %job_id,
                        task_id = %task_id,
                        worker = ?task.value.worker_id,
                        "lease expired, task reclaimed"
                    );
                    reclaimed.push(task_id);
                }
                // The holder finished or someone else reclaimed first.
                Err(e) if e.is_conflict() => {
                    tracing::debug!(job_id = %job_id, task_id = %task_id, "reclaim lost race");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reclaimed)
    }

    /// Move every PENDING task of `job_id` to CANCELLED. Returns how many moved.
    pub fn cancel_pending(&self, job_id: JobId, now: DateTime<Utc>) -> ManifestResult<usize> {
        let mut cancelled = 0;
        for task in self.tasks(job_id)? {
            if task.value.state != jobforge_core::TaskState::Pending {
                continue;
            }
            let outcome = self.update_task(job_id, &task.value.task_id, |t| t.cancel(now));
            match outcome {
                Ok(_) => cancelled += 1,
                // Claimed in the meantime; it finishes or its lease runs out.
                Err(ManifestError::InvalidTransition(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(cancelled)
    }

    // --- results and output ---

    /// Store the result of the attempt made under `lease`.
    ///
    /// The task must still be held under `lease` at `now`. The result is
    /// written against the version read before that check, so a writer
    /// whose lease was reclaimed in between loses the race and gets
    /// [`ManifestError::LeaseExpired`] instead of replacing the new holder's
    /// result.
    pub fn put_task_result(&self, result: &TaskResult, lease: &Lease, now: DateTime<Utc>) -> ManifestResult<u64> {
        let key = keys::result(result.job_id, &result.task_id);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let expected: ExpectedVersion = self.backend.get(&key)?.map(|e| e.version).into();
            let task = self
                .task(result.job_id, &result.task_id)?
                .ok_or_else(|| ManifestError::NotFound(keys::task(result.job_id, &result.task_id)))?;
            task.value.ensure_live(lease, now)?;

            match self.write(&key, result, expected) {
                Err(e) if e.is_conflict() && self.conflict_policy.should_retry(attempt) => {
                    tracing::debug!(key = %key, attempt, "result write conflict, re-checking lease");
                    thread::sleep(self.conflict_policy.delay_for(attempt, &key));
                }
                other => return other,
            }
        }
    }

    pub fn task_result(&self, job_id: JobId, task_id: &TaskId) -> ManifestResult<Option<Versioned<TaskResult>>> {
        self.read(&keys::result(job_id, task_id))
    }

    pub fn job_output(&self, job_id: JobId) -> ManifestResult<Option<Versioned<JobOutput>>> {
        self.read(&keys::output(job_id))
    }

    /// Record the job's output summary. Re-running aggregation overwrites it.
    pub fn put_job_output(&self, output: &JobOutput) -> ManifestResult<u64> {
        let key = keys::output(output.job_id);
        let expected = self.backend.get(&key)?.map(|e| e.version).into();
        self.write(&key, output, expected)
    }

    fn list_records<T: DeserializeOwned>(&self, prefix: &str) -> ManifestResult<Vec<Versioned<T>>> {
        let mut records = Vec::new();
        for key in self.backend.list(prefix)? {
            if let Some(record) = self.read(&key)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryManifestBackend;
    use jobforge_core::{TaskState, WorkerId};
    use std::sync::Barrier;

    fn store() -> (ManifestStore, Arc<InMemoryManifestBackend>) {
        let backend = Arc::new(InMemoryManifestBackend::new());
        (ManifestStore::new(backend.clone()), backend)
    }

    fn seeded_task(store: &ManifestStore, now: DateTime<Utc>) -> TaskRecord {
        let job_id = JobId::new();
        let task = TaskRecord::pending(job_id, BatchId::for_ordinal(job_id, 0), 0, now);
        store.create_task(&task).unwrap();
        task
    }

    #[test]
    fn write_then_read_returns_same_value_and_checksum() {
        let (store, _) = store();
        let now = Utc::now();
        let job = JobRecord::new(JobId::new(), "roundtrip", "{}", now);
        let written = store.create_job(&job).unwrap();

        let read = store.job_required(job.job_id).unwrap();
        assert_eq!(read.value, job);
        assert_eq!(read.version, 1);
        assert_eq!(read.checksum, written.checksum);
    }

    #[test]
    fn corrupted_records_are_detected_on_read() {
        let (store, backend) = store();
        let job = JobRecord::new(JobId::new(), "corrupt", "{}", Utc::now());
        store.create_job(&job).unwrap();

        backend.inject_corruption(&keys::job(job.job_id), br#"{"tampered":true}"#);
        let err = store.job(job.job_id).unwrap_err();
        assert_eq!(
            err,
            ManifestError::Corrupt {
                key: keys::job(job.job_id),
                version: 1
            }
        );
    }

    #[test]
    fn stale_writer_gets_conflict() {
        let (store, _) = store();
        let now = Utc::now();
        let mut job = JobRecord::new(JobId::new(), "cas", "{}", now);
        let v1 = store.create_job(&job).unwrap();

        job.cancel_requested = true;
        store.put_job(&job, v1.expected()).unwrap();
        let err = store.put_job(&job, v1.expected()).unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(store.create_job(&job), Err(ManifestError::AlreadyExists(_))));
    }

    #[test]
    fn update_reapplies_mutation_after_conflict() {
        let (store, _) = store();
        let job = JobRecord::new(JobId::new(), "retry", "{}", Utc::now());
        store.create_job(&job).unwrap();

        let mut interfered = false;
        let (written, ()) = store
            .update_job(job.job_id, |j| {
                if !interfered {
                    interfered = true;
                    // Someone else bumps the record between our read and write.
                    let current = store.job_required(job.job_id)?;
                    let mut other = current.value.clone();
                    other.total_records = 7;
                    store.put_job(&other, current.expected())?;
                }
                j.failure_count += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(written.version, 3);
        assert_eq!(written.value.failure_count, 1);
        assert_eq!(written.value.total_records, 7);
    }

    #[test]
    fn create_if_absent_is_idempotent() {
        let (store, backend) = store();
        let task = seeded_task(&store, Utc::now());
        let writes = backend.write_count();

        let again = store.create_task(&task).unwrap();
        assert!(!again.was_created());
        assert_eq!(again.into_inner().version, 1);
        assert_eq!(backend.write_count(), writes);
    }

    #[test]
    fn exactly_one_concurrent_claim_wins() {
        let (store, _) = store();
        let now = Utc::now();
        let task = seeded_task(&store, now);
        let observed = store.task(task.job_id, &task.task_id).unwrap().unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = ["w1", "w2"]
            .into_iter()
            .map(|name| {
                let store = store.clone();
                let observed = observed.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let mut next = observed.value.clone();
                    next.claim(&WorkerId::new(name), now, chrono::Duration::seconds(60))?;
                    barrier.wait();
                    store.put_task(&next, observed.expected())
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(outcomes.iter().any(|o| matches!(o, Err(e) if e.is_conflict())));
    }

    #[test]
    fn expired_leases_are_reclaimed() {
        let (store, _) = store();
        let now = Utc::now();
        let task = seeded_task(&store, now);
        store
            .update_task(task.job_id, &task.task_id, |t| {
                t.claim(&WorkerId::new("w1"), now, chrono::Duration::seconds(60))
            })
            .unwrap();

        assert!(store.reclaim_expired(task.job_id, now + chrono::Duration::seconds(30)).unwrap().is_empty());
        let reclaimed = store.reclaim_expired(task.job_id, now + chrono::Duration::seconds(60)).unwrap();
        assert_eq!(reclaimed, vec![task.task_id.clone()]);

        let current = store.task(task.job_id, &task.task_id).unwrap().unwrap().value;
        assert_eq!(current.state, TaskState::Pending);
        assert_eq!(current.worker_id, None);
    }

    #[test]
    fn cancel_pending_skips_leased_tasks() {
        let (store, _) = store();
        let now = Utc::now();
        let job_id = JobId::new();
        for ordinal in 0..3 {
            store
                .create_task(&TaskRecord::pending(job_id, BatchId::for_ordinal(job_id, ordinal), ordinal, now))
                .unwrap();
        }
        store
            .update_task(job_id, &TaskId::for_ordinal(job_id, 1), |t| {
                t.claim(&WorkerId::new("w1"), now, chrono::Duration::seconds(60))
            })
            .unwrap();

        assert_eq!(store.cancel_pending(job_id, now).unwrap(), 2);
        let states: Vec<_> = store.tasks(job_id).unwrap().into_iter().map(|t| t.value.state).collect();
        assert_eq!(states, vec![TaskState::Cancelled, TaskState::Assigned, TaskState::Cancelled]);
    }

    #[test]
    fn jobs_are_listed() {
        let (store, _) = store();
        let now = Utc::now();
        let a = JobRecord::new(JobId::new(), "a", "{}", now);
        let b = JobRecord::new(JobId::new(), "b", "{}", now);
        store.create_job(&a).unwrap();
        store.create_job(&b).unwrap();

        let mut ids = store.list_job_ids().unwrap();
        ids.sort();
        let mut expected = vec![a.job_id, b.job_id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn one_unreadable_job_does_not_hide_the_others() {
        let (store, backend) = store();
        let now = Utc::now();
        let good = JobRecord::new(JobId::new(), "good", "{}", now);
        let bad = JobRecord::new(JobId::new(), "bad", "{}", now);
        store.create_job(&good).unwrap();
        store.create_job(&bad).unwrap();
        backend.inject_corruption(&keys::job(bad.job_id), b"garbage");

        let scan = store.scan_jobs().unwrap();
        assert_eq!(scan.unreadable, vec![keys::job(bad.job_id)]);
        let jobs = store.jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].value.job_id, good.job_id);
    }

    fn result_for(task: &TaskRecord, lease: &Lease, records: Vec<serde_json::Value>) -> TaskResult {
        TaskResult {
            job_id: task.job_id,
            task_id: task.task_id.clone(),
            batch_id: task.batch_id.clone(),
            ordinal: task.ordinal,
            worker_id: lease.worker.clone(),
            attempt: task.attempt_count + 1,
            claim: lease.claim,
            records,
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn reclaimed_worker_cannot_replace_the_new_holders_result() {
        let (store, _) = store();
        let now = Utc::now();
        let task = seeded_task(&store, now);
        let lease = chrono::Duration::seconds(60);

        let (_, late) = store
            .update_task(task.job_id, &task.task_id, |t| t.claim(&WorkerId::new("late"), now, lease))
            .unwrap();
        let after = now + chrono::Duration::seconds(61);
        store.reclaim_expired(task.job_id, after).unwrap();
        let (_, rescuer) = store
            .update_task(task.job_id, &task.task_id, |t| t.claim(&WorkerId::new("rescuer"), after, lease))
            .unwrap();

        store
            .put_task_result(&result_for(&task, &rescuer, vec![serde_json::json!("fresh")]), &rescuer, after)
            .unwrap();
        let err = store
            .put_task_result(&result_for(&task, &late, vec![serde_json::json!("stale")]), &late, after)
            .unwrap_err();
        assert!(matches!(err, ManifestError::LeaseExpired { .. }));

        let stored = store.task_result(task.job_id, &task.task_id).unwrap().unwrap().value;
        assert_eq!(stored.records, vec![serde_json::json!("fresh")]);
        assert_eq!(stored.claim, rescuer.claim);
    }

    #[test]
    fn result_write_is_refused_once_the_lease_has_run_out() {
        let (store, _) = store();
        let now = Utc::now();
        let task = seeded_task(&store, now);
        let (_, lease) = store
            .update_task(task.job_id, &task.task_id, |t| {
                t.claim(&WorkerId::new("w1"), now, chrono::Duration::seconds(60))
            })
            .unwrap();

        let result = result_for(&task, &lease, vec![]);
        let expired = now + chrono::Duration::seconds(60);
        assert!(matches!(
            store.put_task_result(&result, &lease, expired),
            Err(ManifestError::LeaseExpired { .. })
        ));
        assert!(store.task_result(task.job_id, &task.task_id).unwrap().is_none());
        assert_eq!(store.put_task_result(&result, &lease, now).unwrap(), 1);
    }
}
