//! Error types for switchyard.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Errors are categorized into six main categories:
//! - **Authentication**: Rejected or unsupported credentials
//! - **Network**: Connection, timeout, or transport issues
//! - **Configuration**: Config file parsing, validation, or missing values
//! - **Provider**: Quota, service unavailability, or API issues
//! - **Local**: Local inference server lifecycle problems (load/unload)
//! - **Internal**: Unexpected errors, bugs, or unclassified issues
//!
//! Each error has a stable error code (e.g., `SWY-A001`) for programmatic handling.
//!
//! Semantic failures (HTTP 200 with an error hidden in the body) are not errors
//! here. They are [`SemanticErrorKind`](crate::core::semantic::SemanticErrorKind)
//! values inspected by the recovery ladder.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Authentication issues (invalid or unsupported credentials).
    Authentication,
    /// Network issues (timeout, connection refused, reset).
    Network,
    /// Configuration issues (parse errors, invalid values).
    Configuration,
    /// Provider-specific issues (quota, unavailable, API errors).
    Provider,
    /// Local inference server lifecycle issues.
    Local,
    /// Internal errors (bugs, unexpected state, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "Authentication error",
            Self::Network => "Network error",
            Self::Configuration => "Configuration error",
            Self::Provider => "Provider error",
            Self::Local => "Local backend error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Authentication => "A",
            Self::Network => "N",
            Self::Configuration => "C",
            Self::Provider => "P",
            Self::Local => "L",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// No backend could serve the request
    BackendUnavailable = 2,
    /// Configuration or parse errors
    ConfigError = 3,
    /// Timeout
    Timeout = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Main error type for switchyard operations.
///
/// Each variant has:
/// - A stable error code (e.g., `SWY-A001`)
/// - A category for classification
/// - A retryable flag for retry logic
#[derive(Error, Debug)]
pub enum SwitchyardError {
    // ==========================================================================
    // Authentication errors (Category: Authentication)
    // ==========================================================================
    /// Credentials were rejected (401/403).
    #[error("invalid credentials for {provider}: {reason}")]
    AuthInvalid {
        provider: String,
        status_code: Option<u16>,
        reason: String,
    },

    /// No credential is configured for the provider.
    #[error("no API key configured for {provider}")]
    AuthNotConfigured { provider: String },

    // ==========================================================================
    // Network errors (Category: Network)
    // ==========================================================================
    /// Request timed out after the given duration.
    #[error("request timeout after {seconds}s for {provider}")]
    Timeout { provider: String, seconds: u64 },

    /// Connection could not be established.
    #[error("connection to {provider} failed: {message}")]
    Network { provider: String, message: String },

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// Error parsing configuration file.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// Invalid value in configuration.
    #[error("invalid config value for '{key}': {message}")]
    ConfigInvalid {
        key: String,
        value: String,
        message: String,
    },

    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    // ==========================================================================
    // Provider errors (Category: Provider)
    // ==========================================================================
    /// Quota or rate limit exhausted for the current credential (429).
    #[error("quota exceeded at {provider}: {message}")]
    QuotaExceeded {
        provider: String,
        retry_after: Option<Duration>,
        message: String,
    },

    /// Provider service is temporarily unavailable (5xx).
    #[error("provider {provider} unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// Provider API returned an unexpected status.
    #[error("provider {provider} API error: {message}")]
    ProviderApi {
        provider: String,
        status_code: Option<u16>,
        message: String,
    },

    /// Failed to parse a provider response.
    #[error("failed to parse response: {0}")]
    ParseResponse(String),

    // ==========================================================================
    // Local backend errors (Category: Local)
    // ==========================================================================
    /// The local server reports that no model is loaded.
    #[error("no model loaded on local backend for {model}")]
    ModelNotLoaded { model: String },

    /// A load request failed on every endpoint shape.
    #[error("failed to load {model}: {reason}")]
    LoadFailed { model: String, reason: String },

    /// An unload request failed on every endpoint shape.
    #[error("failed to unload {model}: {reason}")]
    UnloadFailed { model: String, reason: String },

    /// No local model is known to the catalog.
    #[error("no local model available")]
    NoLocalModel,

    // ==========================================================================
    // I/O errors (Category: Internal)
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SwitchyardError {
    /// Map error to a CLI exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::ConfigParse { .. }
            | Self::ConfigInvalid { .. }
            | Self::Config(_)
            | Self::AuthNotConfigured { .. } => ExitCode::ConfigError,

            Self::Timeout { .. } => ExitCode::Timeout,

            Self::Network { .. }
            | Self::ProviderUnavailable { .. }
            | Self::NoLocalModel
            | Self::ModelNotLoaded { .. } => ExitCode::BackendUnavailable,

            Self::AuthInvalid { .. }
            | Self::QuotaExceeded { .. }
            | Self::ProviderApi { .. }
            | Self::ParseResponse(_)
            | Self::LoadFailed { .. }
            | Self::UnloadFailed { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthInvalid { .. } | Self::AuthNotConfigured { .. } => {
                ErrorCategory::Authentication
            }

            Self::Timeout { .. } | Self::Network { .. } => ErrorCategory::Network,

            Self::ConfigParse { .. } | Self::ConfigInvalid { .. } | Self::Config(_) => {
                ErrorCategory::Configuration
            }

            Self::QuotaExceeded { .. }
            | Self::ProviderUnavailable { .. }
            | Self::ProviderApi { .. }
            | Self::ParseResponse(_) => ErrorCategory::Provider,

            Self::ModelNotLoaded { .. }
            | Self::LoadFailed { .. }
            | Self::UnloadFailed { .. }
            | Self::NoLocalModel => ErrorCategory::Local,

            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `SWY-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AuthInvalid { .. } => "SWY-A001",
            Self::AuthNotConfigured { .. } => "SWY-A002",

            Self::Timeout { .. } => "SWY-N001",
            Self::Network { .. } => "SWY-N002",

            Self::ConfigParse { .. } => "SWY-C001",
            Self::ConfigInvalid { .. } => "SWY-C002",
            Self::Config(_) => "SWY-C099",

            Self::QuotaExceeded { .. } => "SWY-P001",
            Self::ProviderUnavailable { .. } => "SWY-P002",
            Self::ProviderApi { .. } => "SWY-P003",
            Self::ParseResponse(_) => "SWY-P020",

            Self::ModelNotLoaded { .. } => "SWY-L001",
            Self::LoadFailed { .. } => "SWY-L002",
            Self::UnloadFailed { .. } => "SWY-L003",
            Self::NoLocalModel => "SWY-L004",

            Self::Io(_) => "SWY-X001",
            Self::Json(_) => "SWY-X002",
            Self::Other(_) => "SWY-X099",
        }
    }

    /// Returns whether the error is potentially recoverable by retrying.
    ///
    /// Quota errors are not retryable with the same credential; the recovery
    /// ladder handles them by switching tier or provider instead.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Network { .. }
                | Self::ProviderUnavailable { .. }
                | Self::ModelNotLoaded { .. }
        )
    }

    /// Returns the retry-after duration if this error specifies one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::QuotaExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status code carried by the error, if any.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::AuthInvalid { status_code, .. } | Self::ProviderApi { status_code, .. } => {
                *status_code
            }
            Self::QuotaExceeded { .. } => Some(429),
            _ => None,
        }
    }

    /// Returns the provider name if this error is provider-specific.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::AuthInvalid { provider, .. }
            | Self::AuthNotConfigured { provider }
            | Self::Timeout { provider, .. }
            | Self::Network { provider, .. }
            | Self::QuotaExceeded { provider, .. }
            | Self::ProviderUnavailable { provider, .. }
            | Self::ProviderApi { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Map a reqwest transport failure onto the typed hierarchy.
    #[must_use]
    pub fn from_transport(provider: &str, err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                provider: provider.to_string(),
                seconds: timeout.as_secs(),
            }
        } else {
            Self::Network {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Map a non-success HTTP status onto the typed hierarchy.
    #[must_use]
    pub fn from_status(provider: &str, status: u16, body: &str, timeout: Duration) -> Self {
        let provider = provider.to_string();
        let message = truncate_body(body);
        match status {
            401 | 403 => Self::AuthInvalid {
                provider,
                status_code: Some(status),
                reason: message,
            },
            429 => Self::QuotaExceeded {
                provider,
                retry_after: None,
                message,
            },
            408 => Self::Timeout {
                provider,
                seconds: timeout.as_secs(),
            },
            500..=599 => Self::ProviderUnavailable { provider, message },
            _ => Self::ProviderApi {
                provider,
                status_code: Some(status),
                message,
            },
        }
    }
}

/// Keep provider bodies short in error messages and logs.
fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

/// Result type alias for switchyard operations.
pub type Result<T> = std::result::Result<T, SwitchyardError>;

// =============================================================================
// Tests
// =============================================================================
