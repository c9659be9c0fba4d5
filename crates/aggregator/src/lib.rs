//! `jobforge-aggregator`: consolidates task results into a job output.

pub mod aggregator;
pub mod error;
pub mod sink;

pub use aggregator::Aggregator;
pub use error::AggregationError;
pub use sink::{
    FileOutputSink, ManifestOutputSink, OutputDocument, OutputSink, OutputTarget, RecordStream, SinkReport,
};
