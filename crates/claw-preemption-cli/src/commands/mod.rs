//! CLI command implementations.
//!
//! - [`validate`] - Parse a queue document and print the tree
//! - [`simulate`] - Replay a scenario against a simulated partition

pub mod simulate;
pub mod validate;

pub use simulate::SimulateCommand;
pub use validate::ValidateCommand;

use std::path::Path;

use crate::error::CliError;

/// Reads an input file, keeping its path in the error.
pub(crate) fn read_input(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}
