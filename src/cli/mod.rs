//! CLI argument parsing and command dispatch.

pub mod args;
pub mod ask;
pub mod chat;
pub mod health;
pub mod lifecycle;
pub mod models;

pub use args::{Cli, Commands, OutputFormat};

use crate::core::engine::{Engine, EngineOptions};
use crate::error::Result;
use crate::storage::config::Config;
use crate::storage::paths::AppPaths;

/// Build the engine for a CLI invocation.
///
/// # Errors
///
/// Returns error if the state directories cannot be created or an HTTP
/// client cannot be built.
pub fn build_engine(config: Config) -> Result<Engine> {
    let paths = AppPaths::new();
    if let Err(e) = paths.ensure_dirs() {
        tracing::warn!(error = %e, "Failed to create state directories");
    }
    let options = EngineOptions::for_paths(&config, &paths);
    Engine::new(config, options)
}

/// Run one parsed command.
///
/// # Errors
///
/// Propagates the command's error; the caller maps it to an exit code.
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let format = cli.effective_format();
    let pretty = cli.pretty;
    let no_color = cli.no_color || std::env::var_os("NO_COLOR").is_some();

    let Some(command) = cli.command else {
        print_quickstart();
        return Ok(());
    };
    let engine = build_engine(config)?;

    match command {
        Commands::Models(args) => models::execute_models(&engine, &args, format, pretty, no_color).await,
        Commands::Health => health::execute_health(&engine, format, pretty, no_color).await,
        Commands::Route(args) => models::execute_route(&engine, &args, format, pretty, no_color).await,
        Commands::Ask(args) => ask::execute(&engine, &args, format, pretty, no_color).await,
        Commands::Chat(args) => chat::execute(&engine, &args, format, pretty, no_color).await,
        Commands::Load { model } => lifecycle::execute_load(&engine, &model, format, pretty, no_color).await,
        Commands::Unload { model } => lifecycle::execute_unload(&engine, &model, format, pretty, no_color).await,
        Commands::Free => lifecycle::execute_free(&engine, format, pretty, no_color).await,
        Commands::Status => health::execute_status(&engine, format, pretty, no_color).await,
    }
}

fn print_quickstart() {
    println!("switchyard - route prompts across local and cloud LLM backends\n");
    println!("  switchyard models          list local and cloud models");
    println!("  switchyard health          probe every backend");
    println!("  switchyard ask \"PROMPT\"    one routed completion");
    println!("  switchyard chat            interactive session");
    println!("  switchyard status          tier state and active model\n");
    println!("Run `switchyard --help` for all commands.");
}
