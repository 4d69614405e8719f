//! Semantic error detection.
//!
//! Backends sometimes answer HTTP 200 and put the failure in the body. This
//! module classifies buffered completion text against an ordered table of
//! `(substring, kind)` patterns; the first match wins.
//!
//! Substring matching ties correctness to provider wording. The table is
//! configurable so new wording can be added without code changes, but a
//! legitimate answer that happens to contain e.g. "timeout" is misclassified.

use serde::{Deserialize, Serialize};

use crate::error::SwitchyardError;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticErrorKind {
    EmptyResponse,
    ModelNotLoaded,
    QuotaExceeded,
    UnsupportedKeyType,
    AuthInvalid,
    ProviderTimeout,
    /// Connection failures and 5xx from the transport layer.
    BackendUnavailable,
}

impl SemanticErrorKind {
    /// Stable code recorded in `TierState::last_error_code`.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::EmptyResponse => "empty_response",
            Self::ModelNotLoaded => "model_not_loaded",
            Self::QuotaExceeded => "quota_exceeded",
            Self::UnsupportedKeyType => "unsupported_key_type",
            Self::AuthInvalid => "auth_invalid",
            Self::ProviderTimeout => "provider_timeout",
            Self::BackendUnavailable => "backend_unavailable",
        }
    }

    /// Fixed message shown to the end user. Never includes provider text.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::EmptyResponse => "The model returned an empty answer. Please try again.",
            Self::ModelNotLoaded => {
                "No model is currently loaded on the local server. Please try again in a moment."
            }
            Self::QuotaExceeded => {
                "All available providers are over their usage limits right now. Please try again later."
            }
            Self::UnsupportedKeyType | Self::AuthInvalid => {
                "The AI service rejected the configured credentials. Please contact the operator."
            }
            Self::ProviderTimeout => "The AI service took too long to answer. Please try again.",
            Self::BackendUnavailable => {
                "No AI backend is reachable right now. Please try again later."
            }
        }
    }

    /// Eligible for the primary-provider tier switch.
    #[must_use]
    pub const fn triggers_tier_switch(self) -> bool {
        matches!(self, Self::QuotaExceeded)
    }

    /// Eligible for substitution with the secondary provider.
    #[must_use]
    pub const fn triggers_provider_swap(self) -> bool {
        matches!(
            self,
            Self::AuthInvalid | Self::UnsupportedKeyType | Self::QuotaExceeded
        )
    }

    /// Eligible for the local fallback stage.
    #[must_use]
    pub const fn triggers_local_fallback(self) -> bool {
        matches!(
            self,
            Self::AuthInvalid
                | Self::UnsupportedKeyType
                | Self::QuotaExceeded
                | Self::ProviderTimeout
                | Self::BackendUnavailable
        )
    }

    /// Map a transport-level error onto a ladder classification.
    #[must_use]
    pub const fn from_error(err: &SwitchyardError) -> Self {
        match err {
            SwitchyardError::AuthInvalid { .. } | SwitchyardError::AuthNotConfigured { .. } => {
                Self::AuthInvalid
            }
            SwitchyardError::QuotaExceeded { .. } => Self::QuotaExceeded,
            SwitchyardError::Timeout { .. } => Self::ProviderTimeout,
            SwitchyardError::ModelNotLoaded { .. } | SwitchyardError::NoLocalModel => {
                Self::ModelNotLoaded
            }
            _ => Self::BackendUnavailable,
        }
    }
}

impl std::fmt::Display for SemanticErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// One row of the pattern table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticPattern {
    /// Lowercase substring to look for.
    pub needle: String,
    pub kind: SemanticErrorKind,
}

impl SemanticPattern {
    #[must_use]
    pub fn new(needle: &str, kind: SemanticErrorKind) -> Self {
        Self {
            needle: needle.to_lowercase(),
            kind,
        }
    }
}

/// Ordered pattern table. Empty text always classifies as `EmptyResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticTable {
    patterns: Vec<SemanticPattern>,
}

impl Default for SemanticTable {
    fn default() -> Self {
        use SemanticErrorKind::{
            AuthInvalid, ModelNotLoaded, ProviderTimeout, QuotaExceeded, UnsupportedKeyType,
        };
        Self::new(vec![
            SemanticPattern::new("no models loaded", ModelNotLoaded),
            SemanticPattern::new("quota", QuotaExceeded),
            SemanticPattern::new("429", QuotaExceeded),
            SemanticPattern::new("api keys are not supported", UnsupportedKeyType),
            SemanticPattern::new("unauthenticated", AuthInvalid),
            SemanticPattern::new("invalid api key", AuthInvalid),
            SemanticPattern::new("forbidden", AuthInvalid),
            SemanticPattern::new("timeout", ProviderTimeout),
        ])
    }
}

impl SemanticTable {
    #[must_use]
    pub const fn new(patterns: Vec<SemanticPattern>) -> Self {
        Self { patterns }
    }

    #[must_use]
    pub fn patterns(&self) -> &[SemanticPattern] {
        &self.patterns
    }

    /// Append a pattern after the existing ones.
    pub fn push(&mut self, pattern: SemanticPattern) {
        self.patterns.push(pattern);
    }

    /// Classify buffered text. `None` means the text is a real answer.
    #[must_use]
    pub fn classify(&self, text: &str) -> Option<SemanticErrorKind> {
        if text.trim().is_empty() {
            return Some(SemanticErrorKind::EmptyResponse);
        }
        let lower = text.to_lowercase();
        self.patterns
            .iter()
            .find(|p| lower.contains(&p.needle))
            .map(|p| p.kind)
    }

    /// Classify a transport error, preferring body wording over the status.
    #[must_use]
    pub fn classify_error(&self, err: &SwitchyardError) -> SemanticErrorKind {
        let body = match err {
            SwitchyardError::AuthInvalid { reason, .. } => Some(reason.as_str()),
            SwitchyardError::QuotaExceeded { message, .. }
            | SwitchyardError::ProviderUnavailable { message, .. }
            | SwitchyardError::ProviderApi { message, .. } => Some(message.as_str()),
            _ => None,
        };
        body.filter(|b| !b.trim().is_empty())
            .and_then(|b| self.classify(b))
            .filter(|kind| *kind != SemanticErrorKind::EmptyResponse)
            .unwrap_or_else(|| SemanticErrorKind::from_error(err))
    }
}

/// Markers that reveal a failed lifecycle call hidden behind a 2xx status.
const LIFECYCLE_ERROR_MARKERS: &[&str] = &["unexpected endpoint"];

/// Whether a 2xx lifecycle (load/unload) body actually reports an error.
///
/// A JSON object with a non-null `error` field, or any body containing a known
/// marker, counts as a failure.
#[must_use]
pub fn lifecycle_body_reports_error(body: &str) -> bool {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body)
        && value.get("error").is_some_and(|e| !e.is_null())
    {
        return true;
    }
    let lower = body.to_lowercase();
    LIFECYCLE_ERROR_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_text_is_empty_response() {
        let table = SemanticTable::default();
        assert_eq!(table.classify(""), Some(SemanticErrorKind::EmptyResponse));
        assert_eq!(table.classify("  \n "), Some(SemanticErrorKind::EmptyResponse));
    }

    #[test]
    fn patterns_match_in_order() {
        let table = SemanticTable::default();
        assert_eq!(
            table.classify("Error: No models loaded. Please load a model first."),
            Some(SemanticErrorKind::ModelNotLoaded)
        );
        assert_eq!(
            table.classify("429 quota exceeded"),
            Some(SemanticErrorKind::QuotaExceeded)
        );
        assert_eq!(
            table.classify("API keys are not supported by this API"),
            Some(SemanticErrorKind::UnsupportedKeyType)
        );
        assert_eq!(
            table.classify("Request had invalid authentication: UNAUTHENTICATED"),
            Some(SemanticErrorKind::AuthInvalid)
        );
        assert_eq!(
            table.classify("upstream timeout"),
            Some(SemanticErrorKind::ProviderTimeout)
        );
        assert_eq!(table.classify("Paris is the capital of France."), None);
    }

    #[test]
    fn first_match_wins() {
        // Mentions both quota and timeout; quota is earlier in the table.
        let table = SemanticTable::default();
        assert_eq!(
            table.classify("quota check timeout"),
            Some(SemanticErrorKind::QuotaExceeded)
        );
    }

    #[test]
    fn custom_patterns_extend_table() {
        let mut table = SemanticTable::default();
        table.push(SemanticPattern::new("RESOURCE_EXHAUSTED", SemanticErrorKind::QuotaExceeded));
        assert_eq!(
            table.classify("status: resource_exhausted"),
            Some(SemanticErrorKind::QuotaExceeded)
        );
    }

    #[test]
    fn transport_errors_map_to_kinds() {
        let table = SemanticTable::default();
        let timeout = Duration::from_secs(5);

        let err = SwitchyardError::from_status("p", 401, "", timeout);
        assert_eq!(table.classify_error(&err), SemanticErrorKind::AuthInvalid);

        let err = SwitchyardError::from_status("p", 429, "", timeout);
        assert_eq!(table.classify_error(&err), SemanticErrorKind::QuotaExceeded);

        let err = SwitchyardError::Timeout { provider: "p".into(), seconds: 5 };
        assert_eq!(table.classify_error(&err), SemanticErrorKind::ProviderTimeout);

        let err = SwitchyardError::Network { provider: "p".into(), message: "refused".into() };
        assert_eq!(table.classify_error(&err), SemanticErrorKind::BackendUnavailable);

        // Body wording beats the status mapping.
        let err = SwitchyardError::from_status(
            "p",
            400,
            r#"{"error":{"message":"API keys are not supported by this API"}}"#,
            timeout,
        );
        assert_eq!(table.classify_error(&err), SemanticErrorKind::UnsupportedKeyType);
    }

    #[test]
    fn ladder_eligibility() {
        use SemanticErrorKind::*;
        assert!(QuotaExceeded.triggers_tier_switch());
        assert!(!AuthInvalid.triggers_tier_switch());
        assert!(AuthInvalid.triggers_provider_swap());
        assert!(!ProviderTimeout.triggers_provider_swap());
        assert!(ProviderTimeout.triggers_local_fallback());
        assert!(!EmptyResponse.triggers_local_fallback());
        assert!(!ModelNotLoaded.triggers_local_fallback());
    }

    #[test]
    fn lifecycle_false_success_detection() {
        assert!(lifecycle_body_reports_error(
            r#"{"error": {"message": "Unexpected endpoint or method"}}"#
        ));
        assert!(lifecycle_body_reports_error("Unexpected endpoint or method. (POST /x)"));
        assert!(!lifecycle_body_reports_error(r#"{"status":"loaded","instance_id":"m"}"#));
        assert!(!lifecycle_body_reports_error(r#"{"error": null}"#));
        assert!(!lifecycle_body_reports_error(""));
    }

    #[test]
    fn user_messages_never_empty() {
        use SemanticErrorKind::*;
        for kind in [
            EmptyResponse,
            ModelNotLoaded,
            QuotaExceeded,
            UnsupportedKeyType,
            AuthInvalid,
            ProviderTimeout,
            BackendUnavailable,
        ] {
            assert!(!kind.user_message().is_empty());
        }
    }
}
