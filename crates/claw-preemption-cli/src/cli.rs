//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// clawq - inspect queue hierarchies and replay preemption scenarios.
#[derive(Parser, Debug, Clone)]
#[command(name = "clawq")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Parse a queue configuration and print the resulting tree.
    Validate(ValidateArgs),

    /// Replay a scenario against a simulated partition.
    Simulate(SimulateArgs),
}

/// Arguments for the validate command.
#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Queue configuration document (JSON).
    pub config: PathBuf,
}

/// Arguments for the simulate command.
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Queue configuration document (JSON).
    pub config: PathBuf,

    /// Scenario file (JSON).
    pub scenario: PathBuf,

    /// Engine settings (JSON). Defaults apply when omitted.
    #[arg(short, long, env = "CLAWQ_ENGINE_CONFIG")]
    pub engine: Option<PathBuf>,

    /// Run with preemption turned off.
    #[arg(long)]
    pub no_preemption: bool,
}
