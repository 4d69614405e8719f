//! Core data models shared by the routing engine.
//!
//! These types describe models, backends, conversation messages, and the
//! cloud tier state mutated by the recovery ladder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Context window assumed when a backend does not report one.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 4096;

/// Alias that resolves to the preferred or first known local model.
pub const LOCAL_ALIAS: &str = "local";

/// Model id value meaning "let the router decide".
pub const AUTO_MODEL: &str = "auto";

/// Whether a configured model value asks for automatic selection.
#[must_use]
pub fn is_auto(model: Option<&str>) -> bool {
    model.is_none_or(|m| m.trim().is_empty() || m.trim().eq_ignore_ascii_case(AUTO_MODEL))
}

// =============================================================================
// Model Kind / Status
// =============================================================================

/// Where a model runs and what it can do.
///
/// Assigned once at discovery time; never changes for a known id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelKind {
    /// Text-only model served by the local inference server.
    LocalText,
    /// Vision-capable model served by the local inference server.
    LocalVision,
    /// Model served by the primary (tiered) cloud provider.
    CloudPrimary,
    /// Model served by the secondary cloud provider.
    CloudSecondary,
}

impl ModelKind {
    /// Whether the model lives on the local inference server.
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::LocalText | Self::LocalVision)
    }

    /// Backend that serves this kind of model.
    #[must_use]
    pub const fn backend(self) -> Backend {
        match self {
            Self::LocalText | Self::LocalVision => Backend::Local,
            Self::CloudPrimary => Backend::Cloud(CloudProvider::Primary),
            Self::CloudSecondary => Backend::Cloud(CloudProvider::Secondary),
        }
    }

    /// Short label for output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::LocalText => "local",
            Self::LocalVision => "local-vision",
            Self::CloudPrimary => "cloud",
            Self::CloudSecondary => "cloud-secondary",
        }
    }
}

/// Lifecycle status of a model.
///
/// Local models move `Available → Loading → Loaded → Unloading → Available`;
/// `Error` is reachable from `Loading` and `Unloading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelStatus {
    Available,
    Loading,
    Loaded,
    Unloading,
    Error,
    #[default]
    Unknown,
}

impl ModelStatus {
    /// Statuses owned by the local resource manager; discovery never overwrites them.
    #[must_use]
    pub const fn is_lifecycle_owned(self) -> bool {
        matches!(self, Self::Loading | Self::Loaded | Self::Unloading)
    }

    /// Short label for output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

// =============================================================================
// Model Descriptor
// =============================================================================

/// One discoverable model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub kind: ModelKind,
    pub status: ModelStatus,
    /// Estimated resident size in GB, 0 if unknown.
    pub size_gb: f64,
    pub context_window: u32,
    pub supports_vision: bool,
}

impl ModelDescriptor {
    /// Create a descriptor with default status and context window.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ModelKind) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            supports_vision: matches!(kind, ModelKind::LocalVision),
            id,
            kind,
            status: ModelStatus::Available,
            size_gb: 0.0,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    /// Builder-style size setter.
    #[must_use]
    pub const fn with_size_gb(mut self, size_gb: f64) -> Self {
        self.size_gb = size_gb;
        self
    }

    /// Builder-style display name setter.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Builder-style vision flag setter.
    #[must_use]
    pub const fn with_vision(mut self, supports_vision: bool) -> Self {
        self.supports_vision = supports_vision;
        self
    }

    /// Whether the model runs on the local server.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.kind.is_local()
    }
}

// =============================================================================
// Backends and Routes
// =============================================================================

/// Cloud providers known to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CloudProvider {
    /// Provider with free and paid credential tiers.
    Primary,
    /// Alternate provider used when the primary rejects the request.
    Secondary,
}

impl CloudProvider {
    /// Name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Primary => "cloud-primary",
            Self::Secondary => "cloud-secondary",
        }
    }
}

/// The backend that serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "provider")]
pub enum Backend {
    Local,
    Cloud(CloudProvider),
}

impl Backend {
    /// Name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud(provider) => provider.name(),
        }
    }

    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Local)
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A routing decision: which model on which backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub model_id: String,
    pub backend: Backend,
}

impl Route {
    #[must_use]
    pub fn local(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            backend: Backend::Local,
        }
    }

    #[must_use]
    pub fn cloud(model_id: impl Into<String>, provider: CloudProvider) -> Self {
        Self {
            model_id: model_id.into(),
            backend: Backend::Cloud(provider),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Character count used for window bounds.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

// =============================================================================
// Tier State
// =============================================================================

/// Credential tier of the primary cloud provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Paid,
}

impl Tier {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
        }
    }
}

/// Cloud credential routing state.
///
/// Mutated only by the recovery ladder (through the gateway), read by diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierState {
    pub active_tier: Tier,
    pub switch_count: u32,
    pub last_switch_at: Option<DateTime<Utc>>,
    pub last_error_code: Option<String>,
    pub last_recovery_action: String,
    pub last_provider_status: String,
}

impl TierState {
    /// Initial state for the given active tier.
    #[must_use]
    pub fn new(active_tier: Tier) -> Self {
        Self {
            active_tier,
            switch_count: 0,
            last_switch_at: None,
            last_error_code: None,
            last_recovery_action: "none".to_string(),
            last_provider_status: "unknown".to_string(),
        }
    }
}

impl Default for TierState {
    fn default() -> Self {
        Self::new(Tier::Free)
    }
}
