//! `load`, `unload` and `free` commands.

use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::cli::models::print_output;
use crate::core::engine::Engine;
use crate::error::{Result, SwitchyardError};
use crate::render::{self, human};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LifecycleResult<'a> {
    action: &'a str,
    model: &'a str,
    ok: bool,
}

/// Load a local model, resolving the `local` alias first.
///
/// # Errors
///
/// Returns `NoLocalModel` when the alias resolves to nothing and
/// `LoadFailed` when the server refuses.
pub async fn execute_load(
    engine: &Engine,
    model: &str,
    format: OutputFormat,
    pretty: bool,
    no_color: bool,
) -> Result<()> {
    engine.catalog().discover_local().await;
    let Some(model) = engine.local().resolve_alias(model).await else {
        return Err(SwitchyardError::NoLocalModel);
    };

    let ok = engine.load(&model).await;
    report("load", &model, ok, format, pretty, no_color)?;
    if ok {
        Ok(())
    } else {
        Err(SwitchyardError::LoadFailed {
            model,
            reason: "the local server did not confirm the load".to_string(),
        })
    }
}

/// Unload one local model.
///
/// # Errors
///
/// Returns `UnloadFailed` when the server refuses.
pub async fn execute_unload(
    engine: &Engine,
    model: &str,
    format: OutputFormat,
    pretty: bool,
    no_color: bool,
) -> Result<()> {
    engine.catalog().discover_local().await;
    let ok = engine.unload(model).await;
    report("unload", model, ok, format, pretty, no_color)?;
    if ok {
        Ok(())
    } else {
        Err(SwitchyardError::UnloadFailed {
            model: model.to_string(),
            reason: "the local server did not confirm the unload".to_string(),
        })
    }
}

/// Unload everything the local server reports as loaded.
///
/// # Errors
///
/// Returns error if rendering fails.
pub async fn execute_free(engine: &Engine, format: OutputFormat, pretty: bool, no_color: bool) -> Result<()> {
    engine.catalog().discover_local().await;
    let freed = engine.free_all().await;
    let label = format!("{freed} model(s)");
    report("freed", &label, true, format, pretty, no_color)
}

fn report(action: &str, model: &str, ok: bool, format: OutputFormat, pretty: bool, no_color: bool) -> Result<()> {
    let result = LifecycleResult { action, model, ok };
    let output = render::render(action, &result, format, pretty, || {
        human::render_lifecycle(action, model, ok, no_color)
    })?;
    print_output(&output, format);
    Ok(())
}
