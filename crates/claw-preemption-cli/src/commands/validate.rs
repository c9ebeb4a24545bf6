//! Validate command implementation.

use std::io::Write;

use claw_preemption::{QueueConfigDocument, QueueTree};
use tracing::debug;

use crate::cli::ValidateArgs;
use crate::commands::read_input;
use crate::error::CliError;
use crate::output::{OutputFormat, QueueTreeView};

/// Handler for the validate command.
#[derive(Debug, Default)]
pub struct ValidateCommand;

impl ValidateCommand {
    /// Creates a new validate command handler.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parses the document, builds the tree and prints it.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the document is invalid.
    pub fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &ValidateArgs,
    ) -> Result<(), CliError> {
        let document = QueueConfigDocument::from_json(&read_input(&args.config)?)?;
        let tree = QueueTree::from_config(&document)?;
        debug!(queues = tree.queue_count(), partition = %document.partition, "Queue document is valid");

        let view = QueueTreeView {
            partition: document.partition,
            queues: tree
                .iter()
                .map(|(_, node)| tree.status(&node.path))
                .collect::<Result<_, _>>()?,
        };
        format.write(out, &view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Format;
    use std::path::PathBuf;

    fn run(json: &str, format: Format) -> Result<String, CliError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("queues.json");
        std::fs::write(&path, json)?;

        let mut out = Vec::new();
        ValidateCommand::new().execute(&mut out, &OutputFormat::new(format), &ValidateArgs { config: path })?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    #[test]
    fn prints_valid_tree() {
        let output = run(
            r#"{"partition": "gpu", "queues": [{"name": "root", "queues": [
                {"name": "train", "resources": {"guaranteed": {"memory": "4Gi"}},
                 "properties": {"preemption.delay": "10s"}},
                {"name": "serve", "properties": {"preemption.policy": "fence"}}
            ]}]}"#,
            Format::Table,
        );
        assert!(output.as_ref().is_ok_and(|o| o.contains("Partition: gpu")));
        assert!(output.as_ref().is_ok_and(|o| o.contains("train") && o.contains("10s")));
        assert!(output.is_ok_and(|o| o.contains("Total: 3 queue(s)")));
    }

    #[test]
    fn json_lists_every_queue() {
        let output = run(r#"{"queues": [{"name": "root", "queues": [{"name": "a"}]}]}"#, Format::Json);
        assert!(output.is_ok_and(|o| o.contains("\"root.a\"") && o.contains("\"partition\": \"default\"")));
    }

    #[test]
    fn rejects_invalid_document() {
        let output = run(r#"{"queues": [{"name": "root", "queues": [{"name": "a.b"}]}]}"#, Format::Table);
        assert!(matches!(output, Err(CliError::Engine(_))));
    }

    #[test]
    fn missing_file_is_read_error() {
        let mut out = Vec::new();
        let args = ValidateArgs {
            config: PathBuf::from("/nonexistent/queues.json"),
        };
        let result = ValidateCommand::new().execute(&mut out, &OutputFormat::default(), &args);
        assert!(matches!(result, Err(CliError::Read { .. })));
    }
}
