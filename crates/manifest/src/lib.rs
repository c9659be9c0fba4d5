//! `jobforge-manifest`: durable, versioned, checksummed job metadata.
//!
//! The manifest store is the only state shared between the coordinator and
//! workers. Everything written here goes through a conditional put against
//! the version the writer last read; readers verify the checksum the writer
//! stored.
//!
//! Layers, bottom up:
//! - [`ManifestBackend`]: raw versioned key/value storage
//!   ([`InMemoryManifestBackend`], [`DirectoryManifestBackend`])
//! - [`ManifestStore`]: typed records, checksum verification, CAS retry
//! - record types and their pure state transitions

pub mod backend;
pub mod directory;
pub mod error;
pub mod in_memory;
pub mod keys;
pub mod records;
pub mod store;
pub mod transitions;

pub use backend::{ManifestBackend, StoredEntry};
pub use directory::DirectoryManifestBackend;
pub use error::{ManifestError, ManifestResult};
pub use in_memory::InMemoryManifestBackend;
pub use records::{BatchPayload, BatchRecord, JobOutput, JobRecord, Lease, TaskRecord, TaskResult, Transition};
pub use store::{Created, JobScan, ManifestStore, Versioned};
pub use transitions::{FailureOutcome, LEASE_EXPIRED_REASON};
