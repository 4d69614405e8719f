//! Robot-mode output (JSON).
//!
//! Every command's payload is wrapped in a [`RobotOutput`] envelope so agents
//! can rely on a stable top-level shape.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// Schema identifier for robot output.
pub const SCHEMA_VERSION: &str = "switchyard.v1";

/// Top-level JSON envelope for robot mode output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotOutput<T> {
    pub schema_version: &'static str,
    pub generated_at: DateTime<Utc>,
    pub command: String,
    pub data: T,
    pub errors: Vec<String>,
}

impl<T> RobotOutput<T> {
    pub fn new(command: impl Into<String>, data: T) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generated_at: Utc::now(),
            command: command.into(),
            data,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }
}

/// Render any serializable value as JSON.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn render_json<T: Serialize>(output: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(output)?
    } else {
        serde_json::to_string(output)?
    };
    Ok(json)
}

/// Wrap `data` in an envelope for `command` and render it.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn render_envelope<T: Serialize>(command: &str, data: T, pretty: bool) -> Result<String> {
    render_json(&RobotOutput::new(command, data), pretty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn envelope_shape_is_stable() {
        let json = render_envelope("status", serde_json::json!({"ok": true}), false).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(value["command"], "status");
        assert_eq!(value["data"]["ok"], true);
        assert!(value["errors"].as_array().unwrap().is_empty());
        assert!(value["generatedAt"].is_string());
    }

    #[test]
    fn pretty_output_is_multiline() {
        let json = render_envelope("health", vec![1, 2], true).unwrap();
        assert!(json.contains('\n'));
    }
}
