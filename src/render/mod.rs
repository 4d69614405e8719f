//! Output rendering for human and robot modes.

pub mod error;
pub mod human;
pub mod robot;

use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::Result;

/// Render `data` for `command`: JSON envelope in robot mode, otherwise the
/// human renderer's output.
///
/// # Errors
///
/// Returns error if JSON serialization fails.
pub fn render<T: Serialize>(
    command: &str,
    data: &T,
    format: OutputFormat,
    pretty: bool,
    human: impl FnOnce() -> String,
) -> Result<String> {
    match format {
        OutputFormat::Json => robot::render_envelope(command, data, pretty),
        OutputFormat::Human => Ok(human()),
    }
}
