use std::process::ExitCode;

use clap::Parser;

use jobforge_node::cli::{self, Cli};
use jobforge_node::{Runner, RuntimeSettings, builtin_registry};

fn main() -> anyhow::Result<ExitCode> {
    let args = Cli::parse();
    jobforge_observability::init();

    let settings = RuntimeSettings::from_env()?;
    let runner = Runner::new(settings, builtin_registry())?;

    let output = cli::execute(&args.command, &runner)?;
    println!("{}", serde_json::to_string_pretty(&output.body)?);
    Ok(ExitCode::from(output.exit_code))
}
