//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use claw_preemption::{QueueStatus, ResourceVector, SimulationReport};
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// A validated queue hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct QueueTreeView {
    /// Partition the document applies to.
    pub partition: String,
    /// Every queue, parents before children.
    pub queues: Vec<QueueStatus>,
}

impl TableDisplay for QueueTreeView {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Partition: {}", self.partition)?;
        writeln!(writer)?;
        writeln!(
            writer,
            "{:<32}  {:<28}  {:<8}  {:>8}",
            "QUEUE", "GUARANTEED", "POLICY", "DELAY"
        )?;
        writeln!(writer, "{}", "─".repeat(82))?;
        for queue in &self.queues {
            let delay = format!("{:?}", queue.preemption_delay);
            writeln!(
                writer,
                "{:<32}  {:<28}  {:<8}  {:>8}",
                truncate(&indented(&queue.path), 32),
                truncate(&resources(&queue.guaranteed), 28),
                queue.policy.to_string(),
                delay,
            )?;
        }
        writeln!(writer)?;
        writeln!(writer, "Total: {} queue(s)", self.queues.len())?;
        Ok(())
    }
}

impl TableDisplay for SimulationReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Queues")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(
            writer,
            "{:<32}  {:<24}  {:<24}  {:>7}  {:>7}",
            "QUEUE", "GUARANTEED", "USAGE", "RUNNING", "PENDING"
        )?;
        writeln!(writer, "{}", "─".repeat(102))?;
        for queue in &self.queues {
            let mut name = indented(&queue.path);
            if queue.draining {
                name.push_str(" (draining)");
            }
            writeln!(
                writer,
                "{:<32}  {:<24}  {:<24}  {:>7}  {:>7}",
                truncate(&name, 32),
                truncate(&resources(&queue.guaranteed), 24),
                truncate(&resources(&queue.usage), 24),
                queue.running,
                queue.pending,
            )?;
        }
        writeln!(writer)?;

        writeln!(writer, "Workloads")?;
        writeln!(writer, "══════════════════════════════════")?;
        if self.workloads.is_empty() {
            writeln!(writer, "No workloads")?;
        } else {
            writeln!(writer, "{:<24}  {:<32}  {:<12}  {:<9}", "ID", "QUEUE", "STATE", "PREEMPTED")?;
            writeln!(writer, "{}", "─".repeat(83))?;
            for workload in &self.workloads {
                writeln!(
                    writer,
                    "{:<24}  {:<32}  {:<12}  {:<9}",
                    truncate(workload.id.as_str(), 24),
                    truncate(&workload.queue, 32),
                    workload.state.to_string(),
                    if workload.preempted { "yes" } else { "no" },
                )?;
            }
        }
        writeln!(writer)?;

        writeln!(writer, "Preemptions")?;
        writeln!(writer, "══════════════════════════════════")?;
        for record in &self.evictions {
            let victims: Vec<&str> = record.evicted_workloads.iter().map(|id| id.as_str()).collect();
            write!(
                writer,
                "{} ({}) <- {}",
                record.requested_by,
                record.queue,
                if victims.is_empty() { "-".to_string() } else { victims.join(", ") }
            )?;
            if record.failures.is_empty() {
                writeln!(writer)?;
            } else {
                writeln!(writer, "  [{} failed]", record.failures.len())?;
            }
        }
        writeln!(writer, "Ticks:       {}", self.stats.ticks)?;
        writeln!(writer, "Placed:      {}", self.stats.placed)?;
        writeln!(writer, "Completed:   {}", self.stats.completed)?;
        writeln!(writer, "Preemptions: {}", self.stats.preemptions)?;
        writeln!(writer, "Evictions:   {}", self.stats.evictions)?;
        if self.stats.eviction_failures > 0 {
            writeln!(writer, "Failures:    {}", self.stats.eviction_failures)?;
        }
        Ok(())
    }
}

fn resources(vector: &ResourceVector) -> String {
    if vector.is_unset() {
        "-".to_string()
    } else {
        vector.to_string()
    }
}

/// Indents a queue path by its depth and keeps only the last segment.
fn indented(path: &str) -> String {
    let depth = path.matches('.').count();
    let name = path.rsplit('.').next().unwrap_or(path);
    format!("{}{name}", "  ".repeat(depth))
}

/// Truncate a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_len).collect()
    }
}
