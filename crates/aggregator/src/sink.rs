use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobforge_config::{OutputConfig, OutputFormat, WriteMode};
use jobforge_core::{Checksum, ChecksumBuilder, JobId};
use jobforge_manifest::{ManifestStore, keys};

use crate::error::AggregationError;

/// Consolidated records of one job, in batch order.
pub type RecordStream<'a> = &'a mut dyn Iterator<Item = Result<JsonValue, AggregationError>>;

/// Where an output ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub location: String,
    pub record_count: u64,
    /// Over the written records, one serialized record per line.
    pub checksum: Checksum,
}

/// Identifies the job an output belongs to.
#[derive(Debug, Clone, Copy)]
pub struct OutputTarget<'a> {
    pub job_id: JobId,
    pub job_name: &'a str,
    pub config: &'a OutputConfig,
}

/// Destination for a job's consolidated output.
pub trait OutputSink: Send + Sync {
    fn write(&self, target: OutputTarget<'_>, records: RecordStream<'_>) -> Result<SinkReport, AggregationError>;
}

/// Output document stored by [`ManifestOutputSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDocument {
    pub job_id: JobId,
    pub records: Vec<JsonValue>,
}

/// Keeps outputs in the manifest store under `output-data/{job_id}`.
#[derive(Debug, Clone)]
pub struct ManifestOutputSink {
    store: ManifestStore,
}

impl ManifestOutputSink {
    pub fn new(store: ManifestStore) -> Self {
        Self { store }
    }

    pub fn read(&self, job_id: JobId) -> Result<Option<OutputDocument>, AggregationError> {
        Ok(self
            .store
            .read::<OutputDocument>(&keys::output_data(job_id))?
            .map(|v| v.value))
    }
}

impl OutputSink for ManifestOutputSink {
    fn write(&self, target: OutputTarget<'_>, records: RecordStream<'_>) -> Result<SinkReport, AggregationError> {
        let key = keys::output_data(target.job_id);
        let existing = self.store.read::<OutputDocument>(&key)?;

        let mut checksum = ChecksumBuilder::new();
        let mut collected = Vec::new();
        for record in records {
            let record = record?;
            checksum.update(record.to_string().as_bytes());
            collected.push(record);
        }
        let record_count = collected.len() as u64;

        let (document, expected) = match existing {
            Some(_) if target.config.write_mode == WriteMode::ErrorIfExists => {
                return Err(AggregationError::OutputExists { location: key });
            }
            Some(current) if target.config.write_mode == WriteMode::Append => {
                let mut records = current.value.records.clone();
                records.extend(collected);
                (
                    OutputDocument {
                        job_id: target.job_id,
                        records,
                    },
                    current.expected(),
                )
            }
            Some(current) => (
                OutputDocument {
                    job_id: target.job_id,
                    records: collected,
                },
                current.expected(),
            ),
            None => (
                OutputDocument {
                    job_id: target.job_id,
                    records: collected,
                },
                jobforge_core::ExpectedVersion::Absent,
            ),
        };
        self.store.write(&key, &document, expected)?;

        Ok(SinkReport {
            location: key,
            record_count,
            checksum: checksum.finish(),
        })
    }
}

/// Writes `{location}/{job_name}-{job_id}.{jsonl|json}` on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileOutputSink;

impl FileOutputSink {
    pub fn path_for(target: &OutputTarget<'_>) -> PathBuf {
        let ext = match target.config.format {
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Json => "json",
        };
        Path::new(&target.config.location).join(format!("{}-{}.{ext}", target.job_name, target.job_id))
    }
}

impl OutputSink for FileOutputSink {
    /// Every mode writes a `.partial` file next to the output and renames it
    /// into place, so readers see either the old output or the complete new
    /// one. The partial file is removed when writing fails.
    fn write(&self, target: OutputTarget<'_>, records: RecordStream<'_>) -> Result<SinkReport, AggregationError> {
        let path = Self::path_for(&target);
        let location = path.display().to_string();
        let io = |e: std::io::Error| AggregationError::Output {
            location: location.clone(),
            message: e.to_string(),
        };

        let exists = path.exists();
        if exists && target.config.write_mode == WriteMode::ErrorIfExists {
            return Err(AggregationError::OutputExists { location: location.clone() });
        }
        fs::create_dir_all(&target.config.location).map_err(io)?;

        let append = exists && target.config.write_mode == WriteMode::Append;
        let tmp = path.with_extension("partial");
        let staged = stage(&path, &tmp, target.config.format, append, records, &location)
            .and_then(|report| fs::rename(&tmp, &path).map(|()| report).map_err(io));
        if staged.is_err() && tmp.exists() {
            if let Err(e) = fs::remove_file(&tmp) {
                tracing::warn!(path = %tmp.display(), error = %e, "cannot remove partial output");
            }
        }
        let (record_count, checksum) = staged?;

        Ok(SinkReport {
            location,
            record_count,
            checksum,
        })
    }
}

/// Write the complete output to `tmp`. When appending, the current contents
/// of `path` come first.
fn stage(
    path: &Path,
    tmp: &Path,
    format: OutputFormat,
    append: bool,
    records: RecordStream<'_>,
    location: &str,
) -> Result<(u64, Checksum), AggregationError> {
    let io = |e: std::io::Error| AggregationError::Output {
        location: location.to_string(),
        message: e.to_string(),
    };

    // Earlier JSON array contents, re-emitted ahead of the new records.
    let previous: Vec<JsonValue> = if append && format == OutputFormat::Json {
        let raw = fs::read_to_string(path).map_err(io)?;
        serde_json::from_str(&raw).map_err(|e| AggregationError::Output {
            location: location.to_string(),
            message: format!("existing output is not a JSON array: {e}"),
        })?
    } else {
        Vec::new()
    };

    let file = if append && format == OutputFormat::Jsonl {
        fs::copy(path, tmp).map_err(io)?;
        OpenOptions::new().append(true).open(tmp).map_err(io)?
    } else {
        File::create(tmp).map_err(io)?
    };
    let mut out = BufWriter::new(file);

    let mut checksum = ChecksumBuilder::new();
    let mut record_count = 0u64;
    match format {
        OutputFormat::Jsonl => {
            for record in records {
                let line = record?.to_string();
                writeln!(out, "{line}").map_err(io)?;
                checksum.update(line.as_bytes());
                record_count += 1;
            }
        }
        OutputFormat::Json => {
            out.write_all(b"[").map_err(io)?;
            let mut first = true;
            for record in previous {
                if !first {
                    out.write_all(b",").map_err(io)?;
                }
                first = false;
                out.write_all(record.to_string().as_bytes()).map_err(io)?;
            }
            for record in records {
                let line = record?.to_string();
                if !first {
                    out.write_all(b",").map_err(io)?;
                }
                first = false;
                out.write_all(line.as_bytes()).map_err(io)?;
                checksum.update(line.as_bytes());
                record_count += 1;
            }
            out.write_all(b"]\n").map_err(io)?;
        }
    }
    out.into_inner()
        .map_err(|e| io(e.into_error()))?
        .sync_all()
        .map_err(io)?;
    Ok((record_count, checksum.finish()))
}
