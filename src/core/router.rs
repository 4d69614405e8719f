//! Model router.
//!
//! Picks one model per request. Precedence: operator override, forced cloud,
//! vision requirements, then local-first with cloud as the fallback.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::catalog::ModelCatalog;
use super::gateway::CloudTierGateway;
use super::health::HealthProbes;
use super::local::LocalModelManager;
use super::models::{Backend, CloudProvider, LOCAL_ALIAS, ModelDescriptor, Route, is_auto};

/// Per-request routing requirements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    pub has_vision: bool,
    pub force_cloud: bool,
}

impl RouteRequest {
    #[must_use]
    pub const fn text() -> Self {
        Self {
            has_vision: false,
            force_cloud: false,
        }
    }

    #[must_use]
    pub const fn vision() -> Self {
        Self {
            has_vision: true,
            force_cloud: false,
        }
    }

    #[must_use]
    pub const fn with_force_cloud(mut self, force_cloud: bool) -> Self {
        self.force_cloud = force_cloud;
        self
    }
}

#[derive(Debug)]
pub struct ModelRouter {
    catalog: Arc<ModelCatalog>,
    local: Arc<LocalModelManager>,
    gateway: Arc<CloudTierGateway>,
    health: Arc<HealthProbes>,
    configured_model: Option<String>,
}

impl ModelRouter {
    #[must_use]
    pub fn new(
        catalog: Arc<ModelCatalog>,
        local: Arc<LocalModelManager>,
        gateway: Arc<CloudTierGateway>,
        health: Arc<HealthProbes>,
        configured_model: Option<String>,
    ) -> Self {
        Self {
            catalog,
            local,
            gateway,
            health,
            configured_model,
        }
    }

    #[must_use]
    pub fn configured_model(&self) -> Option<&str> {
        self.configured_model.as_deref().filter(|m| !is_auto(Some(m)))
    }

    /// Decide which model serves a request.
    pub async fn route(&self, request: RouteRequest) -> Route {
        if let Some(model) = self.configured_model() {
            let route = self.route_configured(model);
            tracing::debug!(model = %route.model_id, backend = %route.backend, "Configured model override");
            return route;
        }

        if request.force_cloud {
            return self.gateway.select_cloud_model(request.has_vision).await;
        }

        if request.has_vision {
            return self.route_vision().await;
        }

        if self.health.local_reachable().await {
            let model = self
                .local
                .preferred_local_id()
                .unwrap_or_else(|| LOCAL_ALIAS.to_string());
            return Route::local(model);
        }

        tracing::debug!("Local server unreachable, routing to cloud");
        self.gateway.select_cloud_model(false).await
    }

    /// Backend for an explicitly configured id: catalog kind if known, the
    /// local server for the `local` alias, the primary cloud otherwise.
    fn route_configured(&self, model: &str) -> Route {
        let model = model.trim();
        if model.eq_ignore_ascii_case(LOCAL_ALIAS) {
            return Route::local(LOCAL_ALIAS);
        }
        let backend = self
            .catalog
            .get(model)
            .map_or(Backend::Cloud(CloudProvider::Primary), |d| d.kind.backend());
        Route {
            model_id: model.to_string(),
            backend,
        }
    }

    async fn route_vision(&self) -> Route {
        let active = self
            .local
            .active_model()
            .and_then(|info| self.catalog.get(&info.model_id));
        let candidates = self.catalog.vision_local_models();
        let preferred = self.local.settings().preferred_model.as_deref();

        match pick_vision_model(active.as_ref(), &candidates, preferred) {
            Some(id) => Route::local(id),
            None => {
                tracing::debug!("No local vision model, using cloud vision model");
                self.gateway.select_cloud_model(true).await
            }
        }
    }
}

/// Local vision choice: the active model if it has vision, else a preferred
/// substring match, else the smallest candidate (unknown sizes last).
#[must_use]
pub fn pick_vision_model(
    active: Option<&ModelDescriptor>,
    candidates: &[ModelDescriptor],
    preferred: Option<&str>,
) -> Option<String> {
    if let Some(active) = active.filter(|d| d.is_local() && d.supports_vision) {
        return Some(active.id.clone());
    }

    if let Some(needle) = preferred.map(str::trim).filter(|p| !p.is_empty()) {
        let needle = needle.to_lowercase();
        if let Some(hit) = candidates.iter().find(|d| d.id.to_lowercase().contains(&needle)) {
            return Some(hit.id.clone());
        }
    }

    let size_key = |d: &ModelDescriptor| if d.size_gb > 0.0 { d.size_gb } else { f64::MAX };
    candidates
        .iter()
        .min_by(|a, b| size_key(a).partial_cmp(&size_key(b)).unwrap_or(Ordering::Equal))
        .map(|d| d.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ModelKind;

    fn vision(id: &str, size: f64) -> ModelDescriptor {
        ModelDescriptor::new(id, ModelKind::LocalVision).with_size_gb(size)
    }

    #[test]
    fn active_vision_model_is_kept() {
        let active = vision("big-vl", 12.0);
        let candidates = vec![vision("small-vl", 2.0), active.clone()];
        assert_eq!(
            pick_vision_model(Some(&active), &candidates, None).as_deref(),
            Some("big-vl")
        );
    }

    #[test]
    fn active_text_model_is_ignored() {
        let active = ModelDescriptor::new("qwen2.5-7b", ModelKind::LocalText);
        let candidates = vec![vision("small-vl", 2.0), vision("big-vl", 12.0)];
        assert_eq!(
            pick_vision_model(Some(&active), &candidates, None).as_deref(),
            Some("small-vl")
        );
    }

    #[test]
    fn preferred_substring_beats_smallest() {
        let candidates = vec![vision("small-vl", 2.0), vision("pixtral-12b", 12.0)];
        assert_eq!(
            pick_vision_model(None, &candidates, Some("Pixtral")).as_deref(),
            Some("pixtral-12b")
        );
    }

    #[test]
    fn unknown_sizes_sort_last() {
        let candidates = vec![vision("unknown-vl", 0.0), vision("known-vl", 9.0)];
        assert_eq!(pick_vision_model(None, &candidates, None).as_deref(), Some("known-vl"));
        assert_eq!(pick_vision_model(None, &[], None), None);
    }
}
