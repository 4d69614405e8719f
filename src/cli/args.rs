//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Switchyard - route prompts across local and cloud LLM backends.
#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    // === Global flags ===
    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Config file (defaults to the platform config dir)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (human, json, compact)
    #[arg(long, value_name = "FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the effective output format.
    #[must_use]
    pub fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover and list local and cloud models
    Models(ModelsArgs),

    /// Probe every configured backend
    Health,

    /// Show which backend and model a request would use
    Route(RouteArgs),

    /// Send one prompt through the router and recovery ladder
    Ask(AskArgs),

    /// Interactive conversation over stdin
    Chat(ChatArgs),

    /// Load a local model (unloading any other)
    Load {
        /// Model id, or `local` for the preferred model
        model: String,
    },

    /// Unload a local model
    Unload {
        /// Model id
        model: String,
    },

    /// Unload every local model
    Free,

    /// Show tier state, active model, and memory
    Status,
}

/// Arguments for the `models` command.
#[derive(Parser, Debug, Default)]
pub struct ModelsArgs {
    /// Only list local models
    #[arg(long)]
    pub local_only: bool,
}

/// Arguments for the `route` command.
#[derive(Parser, Debug, Default)]
pub struct RouteArgs {
    /// Route as a vision request
    #[arg(long)]
    pub vision: bool,

    /// Never use the local backend
    #[arg(long)]
    pub force_cloud: bool,
}

/// Arguments for the `ask` command.
#[derive(Parser, Debug, Default)]
pub struct AskArgs {
    /// Prompt text
    pub prompt: String,

    /// Conversation id; history is kept per id
    #[arg(long, short = 'c', value_name = "ID", default_value = "default")]
    pub conversation: String,

    /// Attach an image (repeatable)
    #[arg(long, value_name = "PATH")]
    pub image: Vec<PathBuf>,

    /// Never use the local backend
    #[arg(long)]
    pub force_cloud: bool,

    /// Show every attempt of the recovery ladder
    #[arg(long)]
    pub trace: bool,
}

/// Arguments for the `chat` command.
#[derive(Parser, Debug, Default)]
pub struct ChatArgs {
    /// Conversation id; history is kept per id
    #[arg(long, short = 'c', value_name = "ID", default_value = "default")]
    pub conversation: String,

    /// Never use the local backend
    #[arg(long)]
    pub force_cloud: bool,

    /// Start with an empty history
    #[arg(long)]
    pub reset: bool,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable colored output
    #[default]
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn json_flag_overrides_format() {
        let cli = Cli::parse_from(["switchyard", "--json", "status"]);
        assert_eq!(cli.effective_format(), OutputFormat::Json);
        assert!(matches!(cli.command, Some(Commands::Status)));
    }

    #[test]
    fn ask_collects_images() {
        let cli = Cli::parse_from([
            "switchyard",
            "ask",
            "what is this?",
            "--image",
            "a.png",
            "--image",
            "b.jpg",
            "-c",
            "work",
        ]);
        let Some(Commands::Ask(args)) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.prompt, "what is this?");
        assert_eq!(args.image.len(), 2);
        assert_eq!(args.conversation, "work");
        assert!(!args.force_cloud);
    }
}
