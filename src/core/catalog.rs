//! Model catalog: discovery and normalization of local and cloud models.
//!
//! The local server is asked through two listing shapes (`/api/v1/models`
//! first, `/v1/models` as the legacy fallback). Cloud providers are asked
//! through their OpenAI-compatible `/models` listing. A source that fails
//! contributes nothing; the other source still does.

use std::collections::HashMap;
use std::sync::{LazyLock, PoisonError, RwLock};

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use super::http::{self, DISCOVERY_TIMEOUT};
use super::models::{CloudProvider, DEFAULT_CONTEXT_WINDOW, ModelDescriptor, ModelKind, ModelStatus};
use super::semantic::lifecycle_body_reports_error;
use crate::error::Result;

/// Local listing endpoints, preferred first.
pub const LOCAL_LIST_PATHS: [&str; 2] = ["/api/v1/models", "/v1/models"];

/// Which local listing shape answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListingShape {
    /// `/api/v1/models`: every downloaded model, with `loaded_instances`.
    Native,
    /// `/v1/models`: OpenAI-style list of the models currently served.
    Legacy,
}

// =============================================================================
// Wire shapes
// =============================================================================

/// Response of either local listing shape (`models` or `data`).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct LocalListing {
    models: Option<Vec<LocalModelEntry>>,
    data: Option<Vec<LocalModelEntry>>,
}

impl LocalListing {
    /// Parse a 2xx listing body.
    ///
    /// Older servers answer unknown routes with 200 and an `error` object, so
    /// a body that reports an error or carries neither list is rejected.
    pub(crate) fn parse(body: &str) -> Option<Self> {
        if lifecycle_body_reports_error(body) {
            return None;
        }
        serde_json::from_str::<Self>(body)
            .ok()
            .filter(|listing| listing.models.is_some() || listing.data.is_some())
    }

    pub(crate) fn into_entries(self) -> Vec<LocalModelEntry> {
        let models = self.models.unwrap_or_default();
        if models.is_empty() {
            self.data.unwrap_or_default()
        } else {
            models
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LocalModelEntry {
    key: Option<String>,
    id: Option<String>,
    display_name: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    model_type: Option<String>,
    capabilities: Option<serde_json::Value>,
    size_bytes: Option<u64>,
    max_context_length: Option<u32>,
    #[serde(default)]
    loaded_instances: Vec<LoadedInstance>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LoadedInstance {
    pub(crate) id: String,
}

impl LocalModelEntry {
    pub(crate) fn model_id(&self) -> Option<&str> {
        self.key
            .as_deref()
            .or(self.id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }

    pub(crate) fn loaded_instances(&self) -> &[LoadedInstance] {
        &self.loaded_instances
    }

    fn is_embedding(&self) -> bool {
        self.model_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("embedding") || t.eq_ignore_ascii_case("embeddings"))
            || self.model_id().is_some_and(|id| id.contains("embed"))
    }

    /// Vision flag from structured fields, if the server reported any.
    fn reported_vision(&self) -> Option<bool> {
        if self.model_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("vlm")) {
            return Some(true);
        }
        match self.capabilities.as_ref()? {
            serde_json::Value::Object(map) => map.get("vision").and_then(serde_json::Value::as_bool),
            serde_json::Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .any(|c| c.eq_ignore_ascii_case("vision")),
            ),
            _ => None,
        }
    }

    fn into_descriptor(self) -> Option<ModelDescriptor> {
        let id = self.model_id()?.to_string();
        let vision = self.reported_vision().unwrap_or_else(|| looks_like_vision(&id));
        #[allow(clippy::cast_precision_loss)]
        let size_gb = self
            .size_bytes
            .map(|b| b as f64 / 1_073_741_824.0)
            .or_else(|| estimate_size_gb(&id))
            .unwrap_or(0.0);
        let kind = if vision {
            ModelKind::LocalVision
        } else {
            ModelKind::LocalText
        };
        let display = self
            .display_name
            .or(self.name)
            .unwrap_or_else(|| id.clone());

        let mut desc = ModelDescriptor::new(id, kind)
            .with_display_name(display)
            .with_size_gb(size_gb)
            .with_vision(vision);
        desc.context_window = self.max_context_length.unwrap_or(DEFAULT_CONTEXT_WINDOW);
        Some(desc)
    }
}

#[derive(Debug, Default, Deserialize)]
struct CloudListing {
    #[serde(default)]
    data: Vec<CloudModelEntry>,
    #[serde(default)]
    models: Vec<CloudModelEntry>,
}

#[derive(Debug, Deserialize)]
struct CloudModelEntry {
    id: Option<String>,
    name: Option<String>,
    display_name: Option<String>,
    context_length: Option<u32>,
}

impl CloudModelEntry {
    fn into_descriptor(self, provider: CloudProvider) -> Option<ModelDescriptor> {
        let raw = self.id.or_else(|| self.name.clone())?;
        let id = raw.strip_prefix("models/").unwrap_or(&raw).to_string();
        if id.is_empty() || id.contains("embed") {
            return None;
        }
        let kind = match provider {
            CloudProvider::Primary => ModelKind::CloudPrimary,
            CloudProvider::Secondary => ModelKind::CloudSecondary,
        };
        let vision = cloud_supports_vision(&id);
        let display = self.display_name.unwrap_or_else(|| id.clone());
        let mut desc = ModelDescriptor::new(id, kind)
            .with_display_name(display)
            .with_vision(vision);
        desc.context_window = self.context_length.unwrap_or(DEFAULT_CONTEXT_WINDOW);
        Some(desc)
    }
}

// =============================================================================
// Heuristics (used only when the server reports nothing structured)
// =============================================================================

const VISION_HINTS: &[&str] = &["vision", "-vl", "vl-", "llava", "pixtral", "moondream", "minicpm-v"];

const CLOUD_VISION_HINTS: &[&str] = &["vision", "gemini", "gpt-4o", "gpt-4.1", "claude-3", "pixtral", "-vl"];

static PARAMS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^a-z0-9.])(\d+(?:\.\d+)?)b(?:$|[^a-z0-9])").expect("valid regex")
});

static QUANT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^a-z0-9])(?:q(\d)|(\d+)-?bit|int(\d+)|b?f(?:p)?(16|32))(?:$|[^0-9])")
        .expect("valid regex")
});

/// Whether a local model id suggests vision support.
#[must_use]
pub fn looks_like_vision(id: &str) -> bool {
    let lower = id.to_lowercase();
    VISION_HINTS.iter().any(|h| lower.contains(h))
}

/// Whether a cloud model id suggests vision support.
#[must_use]
pub fn cloud_supports_vision(id: &str) -> bool {
    let lower = id.to_lowercase();
    CLOUD_VISION_HINTS.iter().any(|h| lower.contains(h))
}

/// Parameter count in billions parsed from an id like `qwen2.5-7b-instruct`.
#[must_use]
pub fn parse_param_billions(id: &str) -> Option<f64> {
    let lower = id.to_lowercase();
    PARAMS_RE
        .captures(&lower)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|p| *p > 0.0)
}

/// Weight precision in bits parsed from an id (`q4_k_m`, `4bit`, `int8`, `fp16`).
#[must_use]
pub fn parse_quant_bits(id: &str) -> Option<u32> {
    let lower = id.to_lowercase();
    let caps = QUANT_RE.captures(&lower)?;
    (1..=4)
        .find_map(|i| caps.get(i))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|bits| (2..=32).contains(bits))
}

/// Resident size estimate: `params * bits / 8` plus 10% runtime overhead.
///
/// Unquantized ids are assumed to be 16-bit.
#[must_use]
pub fn estimate_size_gb(id: &str) -> Option<f64> {
    let params = parse_param_billions(id)?;
    let bits = f64::from(parse_quant_bits(id).unwrap_or(16));
    Some(params * bits / 8.0 * 1.1)
}

// =============================================================================
// Catalog
// =============================================================================

/// A cloud provider listing to include in discovery.
#[derive(Debug, Clone)]
pub struct CloudSource {
    pub provider: CloudProvider,
    pub base_url: String,
    /// Verified key; `None` skips the provider.
    pub key: Option<String>,
}

/// In-memory mapping from model id to descriptor.
pub struct ModelCatalog {
    client: Client,
    local_base_url: String,
    entries: RwLock<HashMap<String, ModelDescriptor>>,
}

impl std::fmt::Debug for ModelCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCatalog")
            .field("local_base_url", &self.local_base_url)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl ModelCatalog {
    /// Create an empty catalog for the given local server.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(local_base_url: impl Into<String>) -> Result<Self> {
        Ok(Self::with_client(
            http::build_client(DISCOVERY_TIMEOUT)?,
            local_base_url,
        ))
    }

    #[must_use]
    pub fn with_client(client: Client, local_base_url: impl Into<String>) -> Self {
        Self {
            client,
            local_base_url: local_base_url.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn local_base_url(&self) -> &str {
        &self.local_base_url
    }

    /// Discover local and cloud models concurrently and merge them.
    ///
    /// Never fails: a source that errors contributes an empty list.
    pub async fn discover(&self, cloud: &[CloudSource]) -> Vec<ModelDescriptor> {
        let cloud_futures = cloud.iter().map(|source| self.discover_cloud(source));
        let (local, cloud_lists) = tokio::join!(
            self.discover_local(),
            futures::future::join_all(cloud_futures)
        );

        let mut found = local;
        found.extend(cloud_lists.into_iter().flatten());
        tracing::info!(models = found.len(), "Catalog discovery finished");
        found
    }

    /// Discover local models and merge them into the catalog.
    pub async fn discover_local(&self) -> Vec<ModelDescriptor> {
        match self.fetch_local_listing().await {
            Some((_, entries)) => {
                let descriptors: Vec<_> = entries
                    .into_iter()
                    .filter(|e| !e.is_embedding())
                    .filter_map(LocalModelEntry::into_descriptor)
                    .collect();
                self.merge(descriptors)
            }
            None => Vec::new(),
        }
    }

    /// Raw local listing, trying each endpoint shape in order.
    pub(crate) async fn fetch_local_listing(&self) -> Option<(ListingShape, Vec<LocalModelEntry>)> {
        let shapes = [ListingShape::Native, ListingShape::Legacy];
        for (path, shape) in LOCAL_LIST_PATHS.into_iter().zip(shapes) {
            let url = http::join_url(&self.local_base_url, path);
            match http::get_raw(&self.client, &url, None, "local", DISCOVERY_TIMEOUT).await {
                Ok(resp) if (200..300).contains(&resp.status) => match LocalListing::parse(&resp.body) {
                    Some(listing) => {
                        tracing::debug!(%url, "Local listing answered");
                        return Some((shape, listing.into_entries()));
                    }
                    None => {
                        tracing::debug!(%url, "Local listing body rejected");
                    }
                },
                Ok(resp) => {
                    tracing::debug!(%url, status = resp.status, "Local listing shape failed");
                }
                Err(e) => {
                    tracing::debug!(%url, error = %e, "Local listing shape failed");
                }
            }
        }
        tracing::warn!(base_url = %self.local_base_url, "Local server listing unavailable");
        None
    }

    /// Discover one cloud provider's models and merge them into the catalog.
    pub async fn discover_cloud(&self, source: &CloudSource) -> Vec<ModelDescriptor> {
        let Some(key) = source.key.as_deref() else {
            tracing::debug!(provider = source.provider.name(), "No key configured, skipping listing");
            return Vec::new();
        };
        let url = http::join_url(&source.base_url, "/models");
        match http::fetch_json::<CloudListing>(
            &self.client,
            &url,
            Some(key),
            source.provider.name(),
            DISCOVERY_TIMEOUT,
        )
        .await
        {
            Ok(listing) => {
                let entries = if listing.data.is_empty() {
                    listing.models
                } else {
                    listing.data
                };
                let descriptors: Vec<_> = entries
                    .into_iter()
                    .filter_map(|e| e.into_descriptor(source.provider))
                    .collect();
                self.merge(descriptors)
            }
            Err(e) => {
                tracing::warn!(provider = source.provider.name(), error = %e, "Cloud listing failed");
                Vec::new()
            }
        }
    }

    /// Merge freshly discovered descriptors.
    ///
    /// Known ids keep their original kind (with its vision flag) and any
    /// status owned by the local resource manager; everything else is
    /// overwritten.
    pub fn merge(&self, descriptors: Vec<ModelDescriptor>) -> Vec<ModelDescriptor> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut merged = Vec::with_capacity(descriptors.len());
        for mut desc in descriptors {
            match entries.get(&desc.id) {
                Some(existing) => {
                    if desc.kind != existing.kind {
                        desc.kind = existing.kind;
                        desc.supports_vision = existing.supports_vision;
                    }
                    desc.status = if existing.status.is_lifecycle_owned() {
                        existing.status
                    } else {
                        ModelStatus::Available
                    };
                }
                None => desc.status = ModelStatus::Available,
            }
            entries.insert(desc.id.clone(), desc.clone());
            merged.push(desc);
        }
        merged
    }

    /// Seed a descriptor directly (bootstrap and tests).
    pub fn insert(&self, desc: ModelDescriptor) {
        self.merge(vec![desc]);
    }

    /// Set a lifecycle status. Only the local resource manager calls this.
    pub(crate) fn set_status(&self, id: &str, status: ModelStatus) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(desc) = entries.get_mut(id) {
            tracing::debug!(model = id, from = desc.status.label(), to = status.label(), "Model status");
            desc.status = status;
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<ModelDescriptor> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All descriptors, sorted by id.
    #[must_use]
    pub fn all(&self) -> Vec<ModelDescriptor> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Local descriptors, sorted by id.
    #[must_use]
    pub fn local_models(&self) -> Vec<ModelDescriptor> {
        self.all().into_iter().filter(ModelDescriptor::is_local).collect()
    }

    /// Local vision-capable descriptors, sorted by id.
    #[must_use]
    pub fn vision_local_models(&self) -> Vec<ModelDescriptor> {
        self.local_models()
            .into_iter()
            .filter(|d| d.supports_vision)
            .collect()
    }

    /// Ids currently marked `Loaded`.
    #[must_use]
    pub fn loaded_ids(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|d| d.status == ModelStatus::Loaded)
            .map(|d| d.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parameter_counts() {
        assert_eq!(parse_param_billions("qwen2.5-7b-instruct"), Some(7.0));
        assert_eq!(parse_param_billions("llama-3.1-8b"), Some(8.0));
        assert_eq!(parse_param_billions("gemma-3-4b-it"), Some(4.0));
        assert_eq!(parse_param_billions("phi-3.5-mini"), None);
        assert_eq!(parse_param_billions("mistral-small-24b"), Some(24.0));
        assert_eq!(parse_param_billions("qwen3-0.6b"), Some(0.6));
    }

    #[test]
    fn parses_quantization_bits() {
        assert_eq!(parse_quant_bits("qwen2.5-7b-instruct-q4_k_m"), Some(4));
        assert_eq!(parse_quant_bits("llama-3-8b-4bit"), Some(4));
        assert_eq!(parse_quant_bits("model-int8"), Some(8));
        assert_eq!(parse_quant_bits("model-fp16"), Some(16));
        assert_eq!(parse_quant_bits("qwen2.5-7b-instruct"), None);
    }

    #[test]
    fn size_estimate_applies_quantization_discount() {
        let full = estimate_size_gb("llama-3.1-8b").unwrap();
        let quant = estimate_size_gb("llama-3.1-8b-q4_k_m").unwrap();
        assert!((full - 17.6).abs() < 0.01);
        assert!((quant - 4.4).abs() < 0.01);
        assert!(estimate_size_gb("no-size-here").is_none());
    }

    #[test]
    fn vision_heuristics() {
        assert!(looks_like_vision("qwen2-vl-7b-instruct"));
        assert!(looks_like_vision("llava-1.6-mistral-7b"));
        assert!(!looks_like_vision("qwen2.5-7b-instruct"));
        assert!(cloud_supports_vision("gemini-2.0-flash"));
        assert!(!cloud_supports_vision("deepseek-chat"));
    }

    #[test]
    fn structured_capabilities_beat_heuristics() {
        let entry: LocalModelEntry = serde_json::from_value(serde_json::json!({
            "key": "plain-name-7b",
            "type": "llm",
            "capabilities": {"vision": true},
            "size_bytes": 4_294_967_296_u64
        }))
        .unwrap();
        let desc = entry.into_descriptor().unwrap();
        assert_eq!(desc.kind, ModelKind::LocalVision);
        assert!(desc.supports_vision);
        assert!((desc.size_gb - 4.0).abs() < 0.001);

        let entry: LocalModelEntry = serde_json::from_value(serde_json::json!({
            "id": "llava-looking-name",
            "capabilities": {"vision": false}
        }))
        .unwrap();
        let desc = entry.into_descriptor().unwrap();
        assert_eq!(desc.kind, ModelKind::LocalText);
    }

    #[test]
    fn listing_accepts_both_shapes() {
        let preferred: LocalListing =
            serde_json::from_str(r#"{"models":[{"key":"a"},{"key":"b"}]}"#).unwrap();
        assert_eq!(preferred.into_entries().len(), 2);

        let legacy: LocalListing =
            serde_json::from_str(r#"{"object":"list","data":[{"id":"a","object":"model"}]}"#).unwrap();
        let entries = legacy.into_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].model_id(), Some("a"));
    }

    #[test]
    fn merge_keeps_kind_and_lifecycle_status() {
        let catalog = ModelCatalog::with_client(Client::new(), "http://localhost:1234");
        catalog.insert(ModelDescriptor::new("m", ModelKind::LocalText));
        catalog.set_status("m", ModelStatus::Loaded);

        catalog.merge(vec![ModelDescriptor::new("m", ModelKind::LocalVision).with_size_gb(3.0)]);

        let desc = catalog.get("m").unwrap();
        assert_eq!(desc.kind, ModelKind::LocalText);
        assert!(!desc.supports_vision);
        assert_eq!(desc.status, ModelStatus::Loaded);
        assert!((desc.size_gb - 3.0).abs() < f64::EPSILON);
        assert!(catalog.vision_local_models().is_empty());
    }

    #[test]
    fn listing_rejects_error_bodies() {
        assert!(LocalListing::parse(r#"{"error":"Unexpected endpoint or method. (GET /api/v1/models)"}"#).is_none());
        assert!(LocalListing::parse(r#"{"object":"list"}"#).is_none());
        assert!(LocalListing::parse("not json").is_none());

        let empty = LocalListing::parse(r#"{"models":[]}"#).unwrap();
        assert!(empty.into_entries().is_empty());
        let legacy = LocalListing::parse(r#"{"data":[{"id":"tiny-1b"}]}"#).unwrap();
        assert_eq!(legacy.into_entries()[0].model_id(), Some("tiny-1b"));
    }

    #[test]
    fn merge_resets_error_status() {
        let catalog = ModelCatalog::with_client(Client::new(), "http://localhost:1234");
        catalog.insert(ModelDescriptor::new("m", ModelKind::LocalText));
        catalog.set_status("m", ModelStatus::Error);
        catalog.merge(vec![ModelDescriptor::new("m", ModelKind::LocalText)]);
        assert_eq!(catalog.get("m").unwrap().status, ModelStatus::Available);
    }

    #[test]
    fn local_and_vision_views_are_sorted() {
        let catalog = ModelCatalog::with_client(Client::new(), "http://localhost:1234");
        catalog.insert(ModelDescriptor::new("z-vl", ModelKind::LocalVision));
        catalog.insert(ModelDescriptor::new("a-text", ModelKind::LocalText));
        catalog.insert(ModelDescriptor::new("gemini", ModelKind::CloudPrimary));

        let local: Vec<_> = catalog.local_models().into_iter().map(|d| d.id).collect();
        assert_eq!(local, vec!["a-text", "z-vl"]);
        assert_eq!(catalog.vision_local_models().len(), 1);
        assert_eq!(catalog.all().len(), 3);
    }
}
