//! `chat` command: interactive loop over stdin.
//!
//! Idle eviction runs in the background for the whole session; ctrl-c or
//! end of input stops both.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

use crate::cli::args::{ChatArgs, OutputFormat};
use crate::cli::models::print_output;
use crate::core::engine::Engine;
use crate::core::orchestrator::{CompletionOutcome, CompletionRequest};
use crate::core::semantic::SemanticErrorKind;
use crate::error::Result;
use crate::render::{self, human};

/// Counters across one chat session.
#[derive(Debug, Default)]
pub struct ChatState {
    pub turns: u64,
    pub failures: u64,
    pub recovered: u64,
    pub last_error: Option<SemanticErrorKind>,
}

impl ChatState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, outcome: &CompletionOutcome) {
        self.turns += 1;
        if outcome.success {
            if outcome.attempts.len() > 1 {
                self.recovered += 1;
            }
            self.last_error = None;
        } else {
            self.failures += 1;
            self.last_error = outcome.error;
        }
    }
}

/// Run the interactive loop.
///
/// # Errors
///
/// Returns error if stdin cannot be read or rendering fails.
pub async fn execute(engine: &Engine, args: &ChatArgs, format: OutputFormat, pretty: bool, no_color: bool) -> Result<()> {
    if args.reset {
        engine.orchestrator().reset(&args.conversation);
    }
    engine.discover().await;

    let (maintenance_tx, maintenance_rx) = oneshot::channel();
    let maintenance = engine.spawn_maintenance(maintenance_rx);

    // Ctrl+C handler for clean shutdown.
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = ChatState::new();

    loop {
        if format == OutputFormat::Human {
            eprint!("> ");
        }
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown_rx => break,
        };
        let Some(line) = line else { break };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt, "/exit" | "/quit") {
            break;
        }
        if prompt == "/reset" {
            engine.orchestrator().reset(&args.conversation);
            continue;
        }

        let request = CompletionRequest::new(&args.conversation, prompt).with_force_cloud(args.force_cloud);
        let outcome = tokio::select! {
            outcome = engine.complete(request) => outcome,
            _ = &mut shutdown_rx => break,
        };
        state.update(&outcome);

        let output = render::render("chat", &outcome, format, pretty, || {
            human::render_outcome(&outcome, false, no_color)
        })?;
        print_output(&output, format);
    }

    let _ = maintenance_tx.send(());
    let _ = maintenance.await;
    tracing::debug!(
        turns = state.turns,
        failures = state.failures,
        recovered = state.recovered,
        "Chat session ended"
    );
    Ok(())
}
