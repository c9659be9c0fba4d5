//! Manifest key layout.
//!
//! ```text
//! job/{job_id}
//! batch/{job_id}/{batch_id}
//! payload/{job_id}/{batch_id}
//! task/{job_id}/{task_id}
//! result/{job_id}/{task_id}
//! output/{job_id}
//! output-data/{job_id}
//! ```
//!
//! Batch and task ids sort by ordinal, so prefix listings come back in
//! input order.

use jobforge_core::{BatchId, JobId, TaskId};

pub const JOBS_PREFIX: &str = "job/";

pub fn job(job_id: JobId) -> String {
    format!("job/{job_id}")
}

pub fn batch(job_id: JobId, batch_id: &BatchId) -> String {
    format!("batch/{job_id}/{batch_id}")
}

pub fn batches_prefix(job_id: JobId) -> String {
    format!("batch/{job_id}/")
}

pub fn payload(job_id: JobId, batch_id: &BatchId) -> String {
    format!("payload/{job_id}/{batch_id}")
}

pub fn task(job_id: JobId, task_id: &TaskId) -> String {
    format!("task/{job_id}/{task_id}")
}

pub fn tasks_prefix(job_id: JobId) -> String {
    format!("task/{job_id}/")
}

pub fn result(job_id: JobId, task_id: &TaskId) -> String {
    format!("result/{job_id}/{task_id}")
}

pub fn output(job_id: JobId) -> String {
    format!("output/{job_id}")
}

pub fn output_data(job_id: JobId) -> String {
    format!("output-data/{job_id}")
}
