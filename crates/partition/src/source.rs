use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;

use jobforge_config::{InputConfig, InputFormat};

use crate::error::PartitionError;

/// A stream of records in stable input order.
pub type RecordReader = Box<dyn Iterator<Item = Result<JsonValue, PartitionError>> + Send>;

/// Opens the job input as a record stream.
pub trait InputSource: Send + Sync {
    fn open(&self, input: &InputConfig) -> Result<RecordReader, PartitionError>;
}

impl<S> InputSource for Arc<S>
where
    S: InputSource + ?Sized,
{
    fn open(&self, input: &InputConfig) -> Result<RecordReader, PartitionError> {
        (**self).open(input)
    }
}

/// Decodes lines of `format` into records.
///
/// JSON Lines skips blank lines; text keeps every line as a string record.
struct LineRecords<R> {
    lines: std::io::Lines<R>,
    format: InputFormat,
    path: String,
    line: u64,
    failed: bool,
}

impl<R: BufRead> LineRecords<R> {
    fn new(reader: R, format: InputFormat, path: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            format,
            path: path.into(),
            line: 0,
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for LineRecords<R> {
    type Item = Result<JsonValue, PartitionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(PartitionError::Io {
                        path: self.path.clone(),
                        message: e.to_string(),
                    }));
                }
            };
            self.line += 1;

            match self.format {
                InputFormat::Text => return Some(Ok(JsonValue::String(raw))),
                InputFormat::Jsonl => {
                    if raw.trim().is_empty() {
                        continue;
                    }
                    return Some(serde_json::from_str(&raw).map_err(|e| {
                        self.failed = true;
                        PartitionError::Malformed {
                            path: self.path.clone(),
                            line: self.line,
                            message: e.to_string(),
                        }
                    }));
                }
            }
        }
    }
}

/// Reads `local` inputs from the filesystem, line by line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSource;

impl InputSource for LocalFileSource {
    fn open(&self, input: &InputConfig) -> Result<RecordReader, PartitionError> {
        if input.kind != "local" {
            return Err(PartitionError::UnsupportedSource(input.kind.clone()));
        }
        let file = File::open(&input.path).map_err(|e| PartitionError::Io {
            path: input.path.clone(),
            message: e.to_string(),
        })?;
        Ok(Box::new(LineRecords::new(
            BufReader::new(file),
            input.format,
            input.path.clone(),
        )))
    }
}

/// Inputs held in memory, keyed by path.
#[derive(Debug, Default)]
pub struct InMemorySource {
    inputs: RwLock<HashMap<String, String>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, contents: impl Into<String>) {
        if let Ok(mut inputs) = self.inputs.write() {
            inputs.insert(path.into(), contents.into());
        }
    }

    /// Convenience: one JSON document per record, JSON Lines encoded.
    pub fn insert_records<I>(&self, path: impl Into<String>, records: I)
    where
        I: IntoIterator<Item = JsonValue>,
    {
        let body = records
            .into_iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        self.insert(path, body);
    }
}

impl InputSource for InMemorySource {
    fn open(&self, input: &InputConfig) -> Result<RecordReader, PartitionError> {
        let inputs = self.inputs.read().map_err(|_| PartitionError::Io {
            path: input.path.clone(),
            message: "lock poisoned".to_string(),
        })?;
        let contents = inputs.get(&input.path).cloned().ok_or_else(|| PartitionError::Io {
            path: input.path.clone(),
            message: "no such input".to_string(),
        })?;
        Ok(Box::new(LineRecords::new(
            Cursor::new(contents.into_bytes()),
            input.format,
            input.path.clone(),
        )))
    }
}

/// Dispatches on `input.kind`.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn InputSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the local filesystem source under `local`.
    pub fn with_local_files() -> Self {
        let mut registry = Self::new();
        registry.register("local", Arc::new(LocalFileSource));
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, source: Arc<dyn InputSource>) {
        self.sources.insert(kind.into(), source);
    }
}

impl InputSource for SourceRegistry {
    fn open(&self, input: &InputConfig) -> Result<RecordReader, PartitionError> {
        match self.sources.get(&input.kind) {
            Some(source) => source.open(input),
            None => Err(PartitionError::UnsupportedSource(input.kind.clone())),
        }
    }
}
