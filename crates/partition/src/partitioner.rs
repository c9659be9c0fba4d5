use std::sync::Arc;

use serde_json::Value as JsonValue;

use jobforge_config::InputConfig;
use jobforge_core::{BatchId, ChecksumBuilder, JobId};
use jobforge_manifest::{BatchPayload, BatchRecord};

use crate::error::PartitionError;
use crate::source::{InputSource, RecordReader};

/// One batch: its metadata and its records.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedBatch {
    pub record: BatchRecord,
    pub payload: BatchPayload,
}

/// Splits job input into consecutive, ordered batches.
///
/// Input is streamed: at most one batch of records is held at a time.
#[derive(Clone)]
pub struct Partitioner {
    source: Arc<dyn InputSource>,
}

impl Partitioner {
    pub fn new(source: Arc<dyn InputSource>) -> Self {
        Self { source }
    }

    /// Lazily yield the batches of `input` for `job_id`.
    pub fn batches(
        &self,
        job_id: JobId,
        input: &InputConfig,
        batch_size: u64,
    ) -> Result<BatchStream, PartitionError> {
        if batch_size == 0 {
            return Err(PartitionError::InvalidBatchSize);
        }
        let reader = self.source.open(input)?;
        tracing::debug!(job_id = %job_id, path = %input.path, batch_size, "partitioning input");
        Ok(BatchStream {
            job_id,
            reader,
            batch_size,
            ordinal: 0,
            offset: 0,
            done: false,
        })
    }

    /// Batch metadata for the whole input, in ordinal order.
    ///
    /// Records are dropped as each batch completes.
    pub fn partition(
        &self,
        job_id: JobId,
        input: &InputConfig,
        batch_size: u64,
    ) -> Result<Vec<BatchRecord>, PartitionError> {
        self.batches(job_id, input, batch_size)?
            .map(|batch| batch.map(|b| b.record))
            .collect()
    }
}

/// Iterator over the batches of one input. Stops after the first error.
pub struct BatchStream {
    job_id: JobId,
    reader: RecordReader,
    batch_size: u64,
    ordinal: u64,
    offset: u64,
    done: bool,
}

impl BatchStream {
    /// Records consumed so far.
    pub fn records_read(&self) -> u64 {
        self.offset
    }
}

impl Iterator for BatchStream {
    type Item = Result<PartitionedBatch, PartitionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut records: Vec<JsonValue> = Vec::new();
        let mut checksum = ChecksumBuilder::new();
        while (records.len() as u64) < self.batch_size {
            match self.reader.next() {
                Some(Ok(record)) => {
                    checksum.update(record.to_string().as_bytes());
                    records.push(record);
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if records.is_empty() {
            return None;
        }

        let batch_id = BatchId::for_ordinal(self.job_id, self.ordinal);
        let record_count = records.len() as u64;
        let batch = PartitionedBatch {
            record: BatchRecord {
                batch_id: batch_id.clone(),
                job_id: self.job_id,
                ordinal: self.ordinal,
                first_record: self.offset,
                record_count,
                checksum: checksum.finish(),
            },
            payload: BatchPayload {
                job_id: self.job_id,
                batch_id,
                records,
            },
        };
        self.ordinal += 1;
        self.offset += record_count;
        Some(Ok(batch))
    }
}
