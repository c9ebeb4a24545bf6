//! `clawq` binary entrypoint.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use claw_preemption_cli::cli::{Cli, Commands};
use claw_preemption_cli::commands::{SimulateCommand, ValidateCommand};
use claw_preemption_cli::output::OutputFormat;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Validate(args) => ValidateCommand::new()
            .execute(&mut stdout, &format, &args)
            .with_context(|| format!("{} is not a valid queue document", args.config.display()))?,
        Commands::Simulate(args) => SimulateCommand::new()
            .execute(&mut stdout, &format, &args)
            .with_context(|| format!("simulation of {} failed", args.scenario.display()))?,
    }

    Ok(())
}
