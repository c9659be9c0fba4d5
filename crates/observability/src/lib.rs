//! Process-wide tracing setup shared by the jobforge binaries.

pub mod tracing;

pub use crate::tracing::{LogFormat, LogSettings, init, init_with};
