//! Strongly-typed identifiers used across jobforge.
//!
//! `JobId` is a time-ordered UUID. Batch and task identifiers are derived
//! deterministically from the owning job and the batch ordinal, so that
//! re-partitioning the same input after a restart addresses the same records.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Identifier of a submitted job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for JobId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s).map_err(|e| CoreError::invalid_id(format!("JobId: {e}")))?;
        Ok(Self(uuid))
    }
}

macro_rules! impl_string_id {
    ($t:ident, $name:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.trim().is_empty() {
                    return Err(CoreError::invalid_id(concat!($name, ": empty")));
                }
                if s.contains('/') {
                    return Err(CoreError::invalid_id(format!("{}: '/' not allowed in {s}", $name)));
                }
                Ok(Self(s.to_string()))
            }
        }
    };
}

impl_string_id!(BatchId, "BatchId");
impl_string_id!(TaskId, "TaskId");
impl_string_id!(WorkerId, "WorkerId");

impl BatchId {
    /// Deterministic batch id for the `ordinal`-th batch of `job_id`.
    pub fn for_ordinal(job_id: JobId, ordinal: u64) -> Self {
        Self(format!("{job_id}-batch-{ordinal:020}"))
    }
}

impl TaskId {
    /// Deterministic task id for the `ordinal`-th batch of `job_id`.
    ///
    /// Tasks and batches are 1:1, so both share the ordinal.
    pub fn for_ordinal(job_id: JobId, ordinal: u64) -> Self {
        Self(format!("{job_id}-task-{ordinal:020}"))
    }
}

impl WorkerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}
