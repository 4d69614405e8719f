//! `health` and `status` commands.

use crate::cli::args::OutputFormat;
use crate::cli::models::print_output;
use crate::core::engine::Engine;
use crate::error::{Result, SwitchyardError};
use crate::render::{self, human};

/// Probe every backend. Fails when none is reachable.
///
/// # Errors
///
/// Returns `ProviderUnavailable` when every probe fails, or a render error.
pub async fn execute_health(engine: &Engine, format: OutputFormat, pretty: bool, no_color: bool) -> Result<()> {
    let reports = engine.health().await;
    let output = render::render("health", &reports, format, pretty, || {
        human::render_health(&reports, no_color)
    })?;
    print_output(&output, format);

    if reports.iter().any(|r| r.reachable) {
        Ok(())
    } else {
        Err(SwitchyardError::ProviderUnavailable {
            provider: "all".to_string(),
            message: "no backend is reachable".to_string(),
        })
    }
}

/// Show tier state, the active local model, and memory.
///
/// # Errors
///
/// Returns error if rendering fails.
pub async fn execute_status(engine: &Engine, format: OutputFormat, pretty: bool, no_color: bool) -> Result<()> {
    let status = engine.status().await;
    let output = render::render("status", &status, format, pretty, || {
        human::render_status(&status, no_color)
    })?;
    print_output(&output, format);
    Ok(())
}
