//! Error rendering for the CLI.
//!
//! Human mode prints one line with the stable error code; JSON mode prints a
//! structured object agents can match on.

use colored::Colorize;
use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::SwitchyardError;

/// Render an error for stderr.
#[must_use]
pub fn render_error(error: &SwitchyardError, format: OutputFormat, no_color: bool, pretty: bool) -> String {
    match format {
        OutputFormat::Json => render_error_json(error, pretty),
        OutputFormat::Human => render_simple(error, no_color),
    }
}

fn render_simple(error: &SwitchyardError, no_color: bool) -> String {
    let header = format!("Error [{}]:", error.error_code());
    let header = if no_color {
        header
    } else {
        header.red().bold().to_string()
    };
    let mut line = format!("{header} {error}");
    if let Some(retry) = error.retry_after() {
        line.push_str(&format!(" (retry after {}s)", retry.as_secs()));
    }
    line
}

/// JSON representation of an error for machine consumption.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorJson {
    error_code: String,
    category: String,
    message: String,
    is_retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

impl ErrorJson {
    fn from_error(error: &SwitchyardError) -> Self {
        Self {
            error_code: error.error_code().to_string(),
            category: error.category().to_string(),
            message: error.to_string(),
            is_retryable: error.is_retryable(),
            provider: error.provider().map(String::from),
            retry_after_seconds: error.retry_after().map(|d| d.as_secs()),
        }
    }
}

#[must_use]
pub fn render_error_json(error: &SwitchyardError, pretty: bool) -> String {
    let json = ErrorJson::from_error(error);
    let rendered = if pretty {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    };
    rendered.unwrap_or_else(|_| render_simple(error, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_render_includes_code() {
        let err = SwitchyardError::NoLocalModel;
        let output = render_error(&err, OutputFormat::Human, true, false);
        assert!(output.starts_with(&format!("Error [{}]:", err.error_code())));
    }

    #[test]
    fn json_render_is_structured() {
        let err = SwitchyardError::Timeout {
            provider: "cloud-primary".into(),
            seconds: 30,
        };
        let output = render_error(&err, OutputFormat::Json, true, false);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["errorCode"], err.error_code());
        assert_eq!(value["provider"], "cloud-primary");
        assert_eq!(value["isRetryable"], true);
    }
}
