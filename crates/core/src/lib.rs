//! `jobforge-core`: building blocks shared by every jobforge component.
//!
//! This crate contains **pure** primitives (no storage or threading concerns):
//! identifiers, optimistic-concurrency expectations, checksums, a clock
//! abstraction and the retry policy.

pub mod checksum;
pub mod clock;
pub mod error;
pub mod id;
pub mod retry;
pub mod state;
pub mod version;

pub use checksum::{Checksum, ChecksumBuilder, sha256_hex};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use id::{BatchId, JobId, TaskId, WorkerId};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use state::{JobState, TaskState};
pub use version::ExpectedVersion;
