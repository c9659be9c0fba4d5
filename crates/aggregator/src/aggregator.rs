use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::info;

use jobforge_core::{BatchId, Clock, SharedClock, TaskState};
use jobforge_manifest::{JobOutput, JobRecord, ManifestStore, TaskRecord};

use crate::error::AggregationError;
use crate::sink::{OutputSink, OutputTarget};

/// Consolidates the results of a job whose tasks are all terminal.
#[derive(Clone)]
pub struct Aggregator {
    store: ManifestStore,
    sink: Arc<dyn OutputSink>,
    clock: SharedClock,
}

impl Aggregator {
    pub fn new(store: ManifestStore, sink: Arc<dyn OutputSink>, clock: SharedClock) -> Self {
        Self { store, sink, clock }
    }

    /// Stream SUCCEEDED results in batch order into the sink and record the
    /// job's output summary.
    ///
    /// Once a summary is recorded the job's output is final: running again,
    /// after a crash between writing and completing the job, returns that
    /// summary without touching the sink.
    pub fn aggregate(&self, job: &JobRecord) -> Result<JobOutput, AggregationError> {
        if let Some(existing) = self.store.job_output(job.job_id)? {
            info!(job_id = %job.job_id, location = %existing.value.location, "job output already recorded");
            return Ok(existing.value);
        }
        let config = job.config()?;
        let tasks: Vec<TaskRecord> = self
            .store
            .tasks(job.job_id)?
            .into_iter()
            .map(|t| t.value)
            .collect();

        let remaining = tasks.iter().filter(|t| !t.state.is_terminal()).count();
        if remaining > 0 {
            return Err(AggregationError::NotReady {
                job_id: job.job_id.to_string(),
                remaining,
            });
        }

        let succeeded: Vec<&TaskRecord> = tasks.iter().filter(|t| t.state == TaskState::Succeeded).collect();
        let failed_batches: Vec<BatchId> = tasks
            .iter()
            .filter(|t| t.state == TaskState::Failed)
            .map(|t| t.batch_id.clone())
            .collect();

        let mut records = ResultRecords {
            store: &self.store,
            tasks: succeeded.iter().copied(),
            current: Vec::new().into_iter(),
        };
        let report = self.sink.write(
            OutputTarget {
                job_id: job.job_id,
                job_name: &job.name,
                config: &config.output,
            },
            &mut records,
        )?;

        let output = JobOutput {
            job_id: job.job_id,
            location: report.location,
            record_count: report.record_count,
            succeeded_batches: succeeded.iter().map(|t| t.batch_id.clone()).collect(),
            failed_batches,
            checksum: report.checksum,
            written_at: self.clock.now(),
        };
        self.store.put_job_output(&output)?;

        info!(
            job_id = %job.job_id,
            location = %output.location,
            records = output.record_count,
            failed_batches = output.failed_batches.len(),
            "job output written"
        );
        Ok(output)
    }
}

/// Records of succeeded tasks, loaded one task result at a time.
struct ResultRecords<'a, I> {
    store: &'a ManifestStore,
    tasks: I,
    current: std::vec::IntoIter<JsonValue>,
}

impl<'a, I> Iterator for ResultRecords<'a, I>
where
    I: Iterator<Item = &'a TaskRecord>,
{
    type Item = Result<JsonValue, AggregationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.current.next() {
                return Some(Ok(record));
            }
            let task = self.tasks.next()?;
            match self.store.task_result(task.job_id, &task.task_id) {
                Ok(Some(result)) => self.current = result.value.records.into_iter(),
                Ok(None) => return Some(Err(AggregationError::MissingResult(task.task_id.to_string()))),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{FileOutputSink, ManifestOutputSink};
    use chrono::Utc;
    use jobforge_config::{JobConfig, OutputFormat, WriteMode};
    use jobforge_core::{JobId, SystemClock, WorkerId};
    use jobforge_manifest::{InMemoryManifestBackend, TaskResult, keys};
    use serde_json::json;

    fn job(location: &str, extra_output: &str) -> JobRecord {
        let config = JobConfig::parse(&format!(
            r#"{{
                "name": "agg",
                "handler": "h",
                "input": {{ "path": "in", "format": "jsonl" }},
                "output": {{ "location": "{location}" {extra_output} }}
            }}"#
        ))
        .unwrap();
        let mut job = JobRecord::new(JobId::new(), "agg", "{}", Utc::now());
        job.config = Some(config);
        job
    }

    /// One task per entry: `Some(records)` succeeded, `None` failed.
    fn seed(store: &ManifestStore, job: &JobRecord, outcomes: &[Option<Vec<JsonValue>>]) {
        let now = Utc::now();
        for (ordinal, outcome) in outcomes.iter().enumerate() {
            let ordinal = ordinal as u64;
            let mut task = TaskRecord::pending(job.job_id, BatchId::for_ordinal(job.job_id, ordinal), ordinal, now);
            match outcome {
                Some(records) => {
                    store.create_task(&task).unwrap();
                    let (_, lease) = store
                        .update_task(job.job_id, &task.task_id, |t| {
                            let lease = t.claim(&WorkerId::new("w"), now, chrono::Duration::seconds(60))?;
                            t.start(&lease, now)?;
                            Ok(lease)
                        })
                        .unwrap();
                    let result = TaskResult {
                        job_id: job.job_id,
                        task_id: task.task_id.clone(),
                        batch_id: task.batch_id.clone(),
                        ordinal,
                        worker_id: lease.worker.clone(),
                        attempt: 1,
                        claim: lease.claim,
                        records: records.clone(),
                        produced_at: now,
                    };
                    store.put_task_result(&result, &lease, now).unwrap();
                    store
                        .update_task(job.job_id, &task.task_id, |t| t.succeed(&lease, now))
                        .unwrap();
                }
                None => {
                    task.state = TaskState::Failed;
                    store.create_task(&task).unwrap();
                }
            }
        }
    }

    fn store() -> ManifestStore {
        ManifestStore::new(Arc::new(InMemoryManifestBackend::new()))
    }

    #[test]
    fn results_are_merged_in_batch_order() {
        let store = store();
        let job = job("mem", "");
        seed(
            &store,
            &job,
            &[Some(vec![json!(1), json!(2)]), None, Some(vec![json!(3)])],
        );
        let sink = ManifestOutputSink::new(store.clone());
        let output = Aggregator::new(store.clone(), Arc::new(sink.clone()), SystemClock::shared())
            .aggregate(&job)
            .unwrap();

        assert_eq!(output.record_count, 3);
        assert_eq!(output.failed_batches, vec![BatchId::for_ordinal(job.job_id, 1)]);
        assert_eq!(output.succeeded_batches.len(), 2);
        assert_eq!(output.location, keys::output_data(job.job_id));
        assert_eq!(sink.read(job.job_id).unwrap().unwrap().records, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(store.job_output(job.job_id).unwrap().unwrap().value, output);
    }

    #[test]
    fn refuses_to_run_before_all_tasks_are_terminal() {
        let store = store();
        let job = job("mem", "");
        store
            .create_task(&TaskRecord::pending(job.job_id, BatchId::for_ordinal(job.job_id, 0), 0, Utc::now()))
            .unwrap();
        let err = Aggregator::new(store.clone(), Arc::new(ManifestOutputSink::new(store)), SystemClock::shared())
            .aggregate(&job)
            .unwrap_err();
        assert!(matches!(err, AggregationError::NotReady { remaining: 1, .. }));
    }

    #[test]
    fn missing_result_is_an_aggregation_error() {
        let store = store();
        let job = job("mem", "");
        let mut task = TaskRecord::pending(job.job_id, BatchId::for_ordinal(job.job_id, 0), 0, Utc::now());
        task.state = TaskState::Succeeded;
        store.create_task(&task).unwrap();

        let err = Aggregator::new(store.clone(), Arc::new(ManifestOutputSink::new(store)), SystemClock::shared())
            .aggregate(&job)
            .unwrap_err();
        assert!(matches!(err, AggregationError::MissingResult(_)));
    }

    #[test]
    fn file_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let job = job(&dir.path().display().to_string(), "");
        seed(&store, &job, &[Some(vec![json!({"a": 1})]), Some(vec![json!({"a": 2})])]);

        let output = Aggregator::new(store, Arc::new(FileOutputSink), SystemClock::shared())
            .aggregate(&job)
            .unwrap();
        let written = std::fs::read_to_string(&output.location).unwrap();
        assert_eq!(written, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn aggregating_twice_in_append_mode_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let job = job(
            &dir.path().display().to_string(),
            r#", "format": "json", "write_mode": "append""#,
        );
        let config = job.config.as_ref().unwrap();
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.output.write_mode, WriteMode::Append);
        seed(&store, &job, &[Some(vec![json!(1), json!(2)])]);

        let aggregator = Aggregator::new(store, Arc::new(FileOutputSink), SystemClock::shared());
        let first = aggregator.aggregate(&job).unwrap();
        let second = aggregator.aggregate(&job).unwrap();
        assert_eq!(first, second);

        let written: Vec<JsonValue> = serde_json::from_str(&std::fs::read_to_string(&second.location).unwrap()).unwrap();
        assert_eq!(written, vec![json!(1), json!(2)]);
    }

    #[test]
    fn error_if_exists_refuses_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        let job = job(&dir.path().display().to_string(), r#", "write_mode": "error_if_exists""#);
        seed(&store, &job, &[Some(vec![json!(1)])]);

        let config = job.config.as_ref().unwrap();
        let path = FileOutputSink::path_for(&OutputTarget {
            job_id: job.job_id,
            job_name: &job.name,
            config: &config.output,
        });
        std::fs::write(&path, "left by someone else\n").unwrap();

        let aggregator = Aggregator::new(store.clone(), Arc::new(FileOutputSink), SystemClock::shared());
        assert!(matches!(
            aggregator.aggregate(&job),
            Err(AggregationError::OutputExists { .. })
        ));
        assert!(store.job_output(job.job_id).unwrap().is_none());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "left by someone else\n");
    }

    #[test]
    fn empty_jobs_produce_empty_output() {
        let store = store();
        let job = job("mem", "");
        let output = Aggregator::new(store.clone(), Arc::new(ManifestOutputSink::new(store)), SystemClock::shared())
            .aggregate(&job)
            .unwrap();
        assert_eq!(output.record_count, 0);
        assert!(output.succeeded_batches.is_empty());
    }
}
