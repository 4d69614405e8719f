//! switchyard CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use switchyard::cli::{self, Cli};
use switchyard::core::logging::{self, LogFormat, LogLevel, LogSettings};
use switchyard::render;
use switchyard::storage::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = cli.effective_format();
    let no_color = cli.no_color;
    let pretty = cli.pretty;

    // Config errors are reported after logging is up.
    let config = Config::resolve_with(cli.config.as_deref());
    let config_level = config
        .as_ref()
        .ok()
        .and_then(|c| c.general.log_level.as_deref())
        .and_then(LogLevel::from_arg);

    let log_format = if cli.json_output {
        Some(LogFormat::Json)
    } else {
        cli.log_format.as_deref().and_then(LogFormat::from_arg)
    };
    let settings = LogSettings::resolve(
        cli.log_level.as_deref().and_then(LogLevel::from_arg),
        log_format,
        None::<PathBuf>,
        config_level,
        cli.verbose,
    );
    logging::init(&settings);

    let result = match config {
        Ok(config) => cli::run(cli, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("{}", render::error::render_error(&e, format, no_color, pretty));
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
