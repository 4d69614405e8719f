//! `models` and `route` commands.

use crate::cli::args::{ModelsArgs, OutputFormat, RouteArgs};
use crate::core::engine::Engine;
use crate::core::router::RouteRequest;
use crate::error::Result;
use crate::render::{self, human};

/// Discover and list models.
///
/// # Errors
///
/// Returns error if rendering fails.
pub async fn execute_models(
    engine: &Engine,
    args: &ModelsArgs,
    format: OutputFormat,
    pretty: bool,
    no_color: bool,
) -> Result<()> {
    let mut models = engine.discover().await;
    if args.local_only {
        models.retain(crate::core::models::ModelDescriptor::is_local);
    }
    tracing::debug!(count = models.len(), local_only = args.local_only, "Discovered models");

    let output = render::render("models", &models, format, pretty, || {
        human::render_models(&models, no_color)
    })?;
    print_output(&output, format);
    Ok(())
}

/// Show the route a request would take, without sending it.
///
/// # Errors
///
/// Returns error if rendering fails.
pub async fn execute_route(
    engine: &Engine,
    args: &RouteArgs,
    format: OutputFormat,
    pretty: bool,
    no_color: bool,
) -> Result<()> {
    engine.discover().await;
    let request = RouteRequest {
        has_vision: args.vision,
        force_cloud: args.force_cloud,
    };
    let route = engine.route(request).await;

    let output = render::render("route", &route, format, pretty, || {
        human::render_route(&route, no_color)
    })?;
    print_output(&output, format);
    Ok(())
}

/// Print rendered output; JSON gets a trailing newline, human text has its own.
pub(crate) fn print_output(output: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{output}"),
        OutputFormat::Human => print!("{output}"),
    }
}
