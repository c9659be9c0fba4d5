//! `jobforge-config`: typed job configuration.
//!
//! Raw documents deserialize into [`PartialJobConfig`] (every field optional),
//! partial documents layer over each other with [`PartialJobConfig::merge`],
//! and [`JobConfig::from_partial`] validates the result in one pass, filling
//! documented defaults.

pub mod error;
pub mod job_config;
pub mod loader;
pub mod partial;

pub use error::{ConfigError, ConfigIssue};
pub use job_config::{
    AdvancedConfig, ComputeConfig, InputConfig, InputFormat, JobConfig, NotificationSettings,
    NotifyOn, OutputConfig, OutputFormat, Priority, WriteMode, defaults,
};
pub use loader::ConfigLoader;
pub use partial::{
    PartialAdvancedConfig, PartialComputeConfig, PartialInputConfig, PartialJobConfig,
    PartialNotificationSettings, PartialOutputConfig,
};
