//! `ask` command: one routed completion.

use crate::cli::args::{AskArgs, OutputFormat};
use crate::cli::models::print_output;
use crate::core::completion::ImageAttachment;
use crate::core::engine::Engine;
use crate::core::orchestrator::{CompletionOutcome, CompletionRequest};
use crate::error::{Result, SwitchyardError};
use crate::render::{self, human};

/// Send one prompt. An exhausted ladder is reported with a non-zero exit.
///
/// # Errors
///
/// Returns error if an image cannot be read, if rendering fails, or when no
/// backend produced an answer.
pub async fn execute(engine: &Engine, args: &AskArgs, format: OutputFormat, pretty: bool, no_color: bool) -> Result<()> {
    if args.prompt.trim().is_empty() {
        return Err(SwitchyardError::Config("prompt must not be empty".to_string()));
    }

    let mut images = Vec::with_capacity(args.image.len());
    for path in &args.image {
        images.push(ImageAttachment::from_path(path).await?);
    }

    engine.discover().await;
    let request = CompletionRequest::new(&args.conversation, &args.prompt)
        .with_images(images)
        .with_force_cloud(args.force_cloud);
    let outcome = engine.complete(request).await;

    let output = render::render("ask", &outcome, format, pretty, || {
        human::render_outcome(&outcome, args.trace, no_color)
    })?;
    print_output(&output, format);
    into_result(&outcome)
}

/// Map an exhausted ladder to an error for the exit code.
pub(crate) fn into_result(outcome: &CompletionOutcome) -> Result<()> {
    if outcome.success {
        return Ok(());
    }
    let provider = outcome
        .route
        .as_ref()
        .map_or_else(|| "none".to_string(), |r| r.backend.name().to_string());
    Err(SwitchyardError::ProviderUnavailable {
        provider,
        message: outcome
            .error
            .map_or("no answer", |kind| kind.code())
            .to_string(),
    })
}
