//! Structured logging setup.
//!
//! Logs go to stderr (or a file) so stdout stays clean for command output.
//! Precedence: CLI flags, then `SWITCHYARD_LOG*` env vars, then defaults.

use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

const LOG_LEVEL_ENV: &str = "SWITCHYARD_LOG";
const LOG_FORMAT_ENV: &str = "SWITCHYARD_LOG_FORMAT";
const LOG_FILE_ENV: &str = "SWITCHYARD_LOG_FILE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable logs.
    #[default]
    Human,
    /// JSON logs (one event per line).
    Json,
    /// Compact logs (single line, terse).
    Compact,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" => Some(Self::Human),
            "json" | "jsonl" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Parse from CLI argument or env value.
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "verbose" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "critical" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub const fn as_tracing_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `SWITCHYARD_LOG` as a plain level, if it is one.
#[must_use]
pub fn parse_log_level_from_env() -> Option<LogLevel> {
    env_value(LOG_LEVEL_ENV).and_then(|v| LogLevel::from_arg(&v))
}

/// `SWITCHYARD_LOG` as a full filter directive (e.g. `switchyard=debug,reqwest=warn`).
#[must_use]
pub fn parse_log_directive_from_env() -> Option<String> {
    env_value(LOG_LEVEL_ENV).filter(|v| LogLevel::from_arg(v).is_none())
}

#[must_use]
pub fn parse_log_format_from_env() -> Option<LogFormat> {
    env_value(LOG_FORMAT_ENV).and_then(|v| LogFormat::from_arg(&v))
}

#[must_use]
pub fn parse_log_file_from_env() -> Option<PathBuf> {
    env_value(LOG_FILE_ENV).map(PathBuf::from)
}

/// Resolved logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LogLevel,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    /// Raw directive that overrides `level` when set.
    pub directive: Option<String>,
}

impl LogSettings {
    /// Merge CLI values over env values over defaults.
    ///
    /// `verbose` raises the default level to debug; an explicit level wins.
    #[must_use]
    pub fn resolve(
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
        cli_file: Option<PathBuf>,
        config_level: Option<LogLevel>,
        verbose: bool,
    ) -> Self {
        let directive = cli_level
            .is_none()
            .then(parse_log_directive_from_env)
            .flatten();
        let fallback = if verbose { LogLevel::Debug } else { LogLevel::default() };
        Self {
            level: cli_level
                .or_else(parse_log_level_from_env)
                .or(config_level)
                .unwrap_or(fallback),
            format: cli_format
                .or_else(parse_log_format_from_env)
                .unwrap_or_default(),
            file: cli_file.or_else(parse_log_file_from_env),
            directive,
        }
    }

    fn filter(&self) -> EnvFilter {
        self.directive
            .as_deref()
            .and_then(|d| EnvFilter::try_new(d).ok())
            .unwrap_or_else(|| EnvFilter::new(format!("switchyard={}", self.level.as_filter())))
    }
}

/// Install the global subscriber. Repeated calls are ignored.
pub fn init(settings: &LogSettings) {
    let file = settings.file.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    let make_writer = |file: Option<&std::fs::File>| -> BoxMakeWriter {
        if let Some(file) = file.and_then(|inner| inner.try_clone().ok()) {
            BoxMakeWriter::new(file)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        }
    };

    let filter = settings.filter();
    let writer = make_writer(file.as_ref());
    match settings.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(writer)
                .with_span_events(FmtSpan::CLOSE)
                .try_init()
                .ok();
        }
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .compact()
                .with_writer(writer)
                .with_target(true)
                .try_init()
                .ok();
        }
        LogFormat::Human => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_target(false)
                .without_time()
                .try_init()
                .ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[allow(unsafe_code)]
    fn with_env_var(key: &str, value: &str, f: impl FnOnce()) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let prior = std::env::var(key).ok();
        unsafe {
            std::env::set_var(key, value);
        }
        f();
        match prior {
            Some(val) => unsafe {
                std::env::set_var(key, val);
            },
            None => unsafe {
                std::env::remove_var(key);
            },
        }
    }

    #[test]
    fn env_level_and_directive_are_distinguished() {
        with_env_var(LOG_LEVEL_ENV, "trace", || {
            assert_eq!(parse_log_level_from_env(), Some(LogLevel::Trace));
            assert_eq!(parse_log_directive_from_env(), None);
        });

        with_env_var(LOG_LEVEL_ENV, "switchyard=debug,reqwest=warn", || {
            assert_eq!(parse_log_level_from_env(), None);
            assert_eq!(
                parse_log_directive_from_env().as_deref(),
                Some("switchyard=debug,reqwest=warn")
            );
        });
    }

    #[test]
    fn cli_beats_env() {
        with_env_var(LOG_FORMAT_ENV, "json", || {
            let settings = LogSettings::resolve(
                Some(LogLevel::Error),
                Some(LogFormat::Compact),
                None,
                None,
                false,
            );
            assert_eq!(settings.level, LogLevel::Error);
            assert_eq!(settings.format, LogFormat::Compact);

            let settings = LogSettings::resolve(None, None, None, None, false);
            assert_eq!(settings.format, LogFormat::Json);
        });
    }

    #[test]
    fn verbose_raises_default_level() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if std::env::var(LOG_LEVEL_ENV).is_ok() {
            return;
        }
        let settings = LogSettings::resolve(None, None, None, None, true);
        assert_eq!(settings.level, LogLevel::Debug);
        let settings = LogSettings::resolve(None, None, None, Some(LogLevel::Info), true);
        assert_eq!(settings.level, LogLevel::Info);
    }

    #[test]
    fn format_parsing() {
        assert_eq!(LogFormat::from_arg("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::from_arg("pretty"), Some(LogFormat::Human));
        assert_eq!(LogFormat::from_arg("xml"), None);
    }
}
