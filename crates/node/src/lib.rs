//! `jobforge-node`: runtime settings, built-in handlers and the local
//! runner behind the `jobforge` binary, and its command line.

pub mod cli;
pub mod handlers;
pub mod runner;
pub mod settings;

pub use handlers::builtin_registry;
pub use runner::{RunReport, Runner};
pub use settings::RuntimeSettings;
