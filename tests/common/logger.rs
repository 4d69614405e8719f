//! Per-test structured logging.
//!
//! ```rust,ignore
//! let log = TestLogger::new("ladder_stops_after_four_attempts");
//! log.phase("setup");
//! // ...
//! log.finish_ok();
//! ```
//!
//! # Environment Variables
//!
//! - `TEST_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! - `TEST_LOG_JSON` - "1" or "true" for one JSON object per line

use std::env;
use std::fmt::Display;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::log_capture::TestLogCapture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    test: &'a str,
    phase: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
}

struct Settings {
    min_level: LogLevel,
    json: bool,
}

fn settings() -> &'static Settings {
    static SETTINGS: OnceLock<Settings> = OnceLock::new();
    SETTINGS.get_or_init(|| Settings {
        min_level: env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or(LogLevel::Info),
        json: env::var("TEST_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
    })
}

/// Per-test logger with phase and duration tracking.
pub struct TestLogger {
    test_name: String,
    start_time: Instant,
    current_phase: Mutex<String>,
}

impl TestLogger {
    #[must_use]
    pub fn new(test_name: &str) -> Self {
        let logger = Self {
            test_name: test_name.to_string(),
            start_time: Instant::now(),
            current_phase: Mutex::new("init".to_string()),
        };
        logger.log(LogLevel::Info, "Test starting", None);
        logger
    }

    /// Logger plus a tracing capture for assertions on engine logs.
    pub fn with_capture(test_name: &str) -> (Self, TestLogCapture) {
        let capture = TestLogCapture::start();
        (Self::new(test_name), capture)
    }

    pub fn phase(&self, phase: &str) {
        if let Ok(mut current) = self.current_phase.lock() {
            *current = phase.to_string();
        }
        self.log(LogLevel::Debug, &format!("Phase: {phase}"), None);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn finish_ok(&self) {
        let duration_ms = self.elapsed_ms();
        self.log(LogLevel::Info, &format!("Test passed (duration: {duration_ms}ms)"), Some(duration_ms));
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn log(&self, level: LogLevel, message: &str, duration_ms: Option<u64>) {
        let settings = settings();
        if level < settings.min_level {
            return;
        }
        let phase = self
            .current_phase
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default();

        if settings.json {
            let entry = LogEntry {
                timestamp: Utc::now(),
                level,
                test: &self.test_name,
                phase: &phase,
                message,
                duration_ms,
            };
            if let Ok(json) = serde_json::to_string(&entry) {
                eprintln!("{json}");
            }
        } else {
            let ts = Utc::now().format("%H:%M:%S%.3f");
            eprintln!("[{ts}] [{level}] [{}:{phase}] {message}", self.test_name);
        }
    }
}
