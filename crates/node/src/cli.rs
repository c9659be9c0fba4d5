//! Command line of the `jobforge` binary.
//!
//! Every command prints one JSON document on stdout. Failures reported by
//! the job service print `{ "code", "error" }` and end with the exit code
//! for that error class; usage errors are reported by clap.

use std::path::PathBuf;

use clap::Parser;
use serde_json::{Value as JsonValue, json};

use jobforge_coordinator::ApiError;
use jobforge_core::{JobId, JobState};

use crate::runner::Runner;

/// Exit codes of the `jobforge` binary.
pub mod exit {
    pub const OK: u8 = 0;
    /// `run` finished but some job did not complete or a config was rejected.
    pub const JOBS_FAILED: u8 = 1;
    /// Bad command line; emitted by clap.
    pub const USAGE: u8 = 2;
    pub const NOT_FOUND: u8 = 3;
    pub const INVALID_CONFIG: u8 = 4;
    pub const INTERNAL: u8 = 5;
}

#[derive(Parser, Debug)]
#[command(name = "jobforge")]
#[command(version)]
#[command(about = "Partition batch jobs, run them on worker pools and merge the results")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Submit job configs and run them, plus any unfinished jobs, to completion
    Run {
        /// Job configuration files (JSON)
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },
    /// Print a job summary (needs JOBFORGE_STATE_DIR to see earlier runs)
    Status {
        /// The job ID (UUID)
        job_id: JobId,
    },
    /// Print every job summary, oldest first
    List,
    /// Request cancellation of a job
    Cancel {
        /// The job ID (UUID)
        job_id: JobId,
    },
}

/// What a command prints and the code the process exits with.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub body: JsonValue,
    pub exit_code: u8,
}

impl CommandOutput {
    fn ok(body: impl serde::Serialize) -> anyhow::Result<Self> {
        Ok(Self {
            body: serde_json::to_value(body)?,
            exit_code: exit::OK,
        })
    }

    fn error(e: &ApiError) -> Self {
        Self {
            body: error_body(e),
            exit_code: exit_code(e),
        }
    }
}

pub fn exit_code(e: &ApiError) -> u8 {
    match e {
        ApiError::NotFound(_) => exit::NOT_FOUND,
        ApiError::InvalidConfig { .. } => exit::INVALID_CONFIG,
        ApiError::Internal(_) => exit::INTERNAL,
    }
}

pub fn error_body(e: &ApiError) -> JsonValue {
    let mut body = json!({ "code": e.code(), "error": e.to_string() });
    if let ApiError::InvalidConfig { issues, .. } = e {
        body["issues"] = json!(issues);
    }
    body
}

/// Run one command against `runner`. Errors are left for anything the job
/// service does not classify, such as a worker pool that cannot start.
pub fn execute(command: &Command, runner: &Runner) -> anyhow::Result<CommandOutput> {
    match command {
        Command::Run { configs } => {
            let report = runner.run(configs.as_slice())?;
            let rejected: Vec<_> = report
                .rejected
                .iter()
                .map(|(path, e)| {
                    let mut body = error_body(e);
                    body["config"] = json!(path);
                    body
                })
                .collect();
            let all_completed = report.jobs.iter().all(|j| j.state == JobState::Completed);
            Ok(CommandOutput {
                body: json!({
                    "jobs": report.jobs,
                    "rejected": rejected,
                    "workers": report.worker_stats,
                }),
                exit_code: if all_completed && report.rejected.is_empty() {
                    exit::OK
                } else {
                    exit::JOBS_FAILED
                },
            })
        }
        Command::Status { job_id } => match runner.status(*job_id) {
            Ok(summary) => CommandOutput::ok(summary),
            Err(e) => Ok(CommandOutput::error(&e)),
        },
        Command::List => match runner.list() {
            Ok(jobs) => CommandOutput::ok(jobs),
            Err(e) => Ok(CommandOutput::error(&e)),
        },
        Command::Cancel { job_id } => match runner.cancel(*job_id) {
            Ok(ack) => CommandOutput::ok(ack),
            Err(e) => Ok(CommandOutput::error(&e)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::builtin_registry;
    use crate::settings::RuntimeSettings;

    fn runner() -> Runner {
        Runner::new(RuntimeSettings::default(), builtin_registry()).unwrap()
    }

    #[test]
    fn subcommands_parse_typed_arguments() {
        let job_id = JobId::new();
        let cli = Cli::try_parse_from(["jobforge", "status", &job_id.to_string()]).unwrap();
        assert_eq!(cli.command, Command::Status { job_id });

        let cli = Cli::try_parse_from(["jobforge", "run", "a.json", "b.json"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Run {
                configs: vec![PathBuf::from("a.json"), PathBuf::from("b.json")]
            }
        );
        assert_eq!(Cli::try_parse_from(["jobforge", "list"]).unwrap().command, Command::List);
    }

    #[test]
    fn malformed_command_lines_are_usage_errors() {
        for args in [
            vec!["jobforge"],
            vec!["jobforge", "run"],
            vec!["jobforge", "status", "not-a-uuid"],
            vec!["jobforge", "cancel"],
            vec!["jobforge", "launch"],
        ] {
            let err = Cli::try_parse_from(args.iter().copied()).unwrap_err();
            assert_eq!(err.exit_code(), i32::from(exit::USAGE), "{args:?}");
        }
    }

    #[test]
    fn unknown_job_is_reported_as_not_found() {
        let runner = runner();
        for command in [Command::Status { job_id: JobId::new() }, Command::Cancel { job_id: JobId::new() }] {
            let output = execute(&command, &runner).unwrap();
            assert_eq!(output.exit_code, exit::NOT_FOUND);
            assert_eq!(output.body["code"], "not_found");
            assert!(output.body["error"].as_str().unwrap().contains("not found"));
        }
    }

    #[test]
    fn error_classes_have_distinct_exit_codes() {
        let invalid = ApiError::InvalidConfig {
            job_id: None,
            message: "missing handler".into(),
            issues: vec!["handler: required".into()],
        };
        assert_eq!(exit_code(&invalid), exit::INVALID_CONFIG);
        assert_eq!(error_body(&invalid)["issues"], json!(["handler: required"]));
        assert_eq!(exit_code(&ApiError::Internal("disk".into())), exit::INTERNAL);
        assert_eq!(exit_code(&ApiError::NotFound("x".into())), exit::NOT_FOUND);
    }

    #[test]
    fn list_on_an_empty_store_succeeds() {
        let output = execute(&Command::List, &runner()).unwrap();
        assert_eq!(output.exit_code, exit::OK);
        assert_eq!(output.body, json!([]));
    }
}
