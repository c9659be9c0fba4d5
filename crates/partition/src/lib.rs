//! `jobforge-partition`: streaming input readers and the partitioner.
//!
//! An [`InputSource`] turns an input descriptor into an ordered record
//! stream; the [`Partitioner`] groups that stream into consecutive batches
//! of `batch_size` records, the last one holding the remainder.

pub mod error;
pub mod partitioner;
pub mod source;

pub use error::PartitionError;
pub use partitioner::{BatchStream, PartitionedBatch, Partitioner};
pub use source::{InMemorySource, InputSource, LocalFileSource, RecordReader, SourceRegistry};
