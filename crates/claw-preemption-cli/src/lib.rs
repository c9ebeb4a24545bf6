//! # claw-preemption-cli
//!
//! `clawq`, the command-line front end to `claw-preemption`.
//!
//! Provides commands for:
//! - Validating queue configuration documents
//! - Replaying preemption scenarios against a simulated partition
//!
//! ```text
//! ┌───────────┐   queues.json     ┌──────────────────┐
//! │   clawq   │──────────────────►│ claw-preemption  │
//! └───────────┘   scenario.json   └──────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format, SimulateArgs, ValidateArgs};
pub use error::CliError;
pub use output::OutputFormat;
