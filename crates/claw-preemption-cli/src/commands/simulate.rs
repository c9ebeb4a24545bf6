//! Simulate command implementation.
//!
//! Loads a queue document and a scenario, replays the scenario against a
//! simulated partition and prints the final state.

use std::io::Write;

use claw_preemption::{PreemptionConfig, QueueConfigDocument, Scenario};
use tracing::info;

use crate::cli::SimulateArgs;
use crate::commands::read_input;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Handler for the simulate command.
#[derive(Debug, Default)]
pub struct SimulateCommand;

impl SimulateCommand {
    /// Creates a new simulate command handler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Executes the simulate command.
    ///
    /// # Errors
    ///
    /// Returns error if an input cannot be read or parsed, or the scenario
    /// submits to a queue that does not accept workloads.
    pub fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &SimulateArgs,
    ) -> Result<(), CliError> {
        let document = QueueConfigDocument::from_json(&read_input(&args.config)?)?;
        let scenario = Scenario::from_json(&read_input(&args.scenario)?)?;
        let mut config = match &args.engine {
            Some(path) => PreemptionConfig::from_json(&read_input(path)?)?,
            None => PreemptionConfig::default(),
        };
        if args.no_preemption {
            config = config.with_enabled(false);
        }

        info!(
            workloads = scenario.workloads.len(),
            duration_ms = scenario.duration.as_millis(),
            preemption = config.enabled,
            "Running scenario"
        );
        let report = scenario.run(&document, config)?;
        format.write(out, &report)
    }
}
