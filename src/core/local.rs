//! Local resource manager.
//!
//! Owns the single resident local model. Every load/unload sequence runs under
//! one async lock; the active-model marker is only written while that lock is
//! held (`touch` updates the timestamp only).

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::catalog::{ListingShape, ModelCatalog};
use super::http::{self, LOAD_TIMEOUT};
use super::memory::{self, MemoryProbe};
use super::models::{AUTO_MODEL, LOCAL_ALIAS, ModelStatus};
use super::semantic::lifecycle_body_reports_error;
use crate::error::{Result, SwitchyardError};

/// Lifecycle endpoints, preferred shape first.
const LOAD_PATHS: [&str; 2] = ["/api/v1/models/load", "/v1/models/load"];
const UNLOAD_PATHS: [&str; 2] = ["/api/v1/models/unload", "/v1/models/unload"];

/// Tuning for the local manager.
#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub base_url: String,
    /// Exact id or case-insensitive substring of the preferred local model.
    pub preferred_model: Option<String>,
    /// Hard ceiling for a single model; 0 disables the check.
    pub ram_budget_gb: f64,
    pub safety_buffer_gb: f64,
    /// Size assumed when the catalog has none.
    pub default_model_size_gb: f64,
    pub idle_threshold: Duration,
    pub maintenance_interval: Duration,
    pub unload_cooldown: Duration,
    pub eviction_cooldown: Duration,
    /// TTL sent with legacy load requests.
    pub load_ttl_secs: u64,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234".to_string(),
            preferred_model: None,
            ram_budget_gb: 0.0,
            safety_buffer_gb: 2.0,
            default_model_size_gb: 4.0,
            idle_threshold: Duration::from_secs(30 * 60),
            maintenance_interval: Duration::from_secs(5 * 60),
            unload_cooldown: Duration::from_secs(2),
            eviction_cooldown: Duration::from_secs(3),
            load_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveModel {
    id: String,
    instance_id: Option<String>,
    last_access: Instant,
}

/// Snapshot of the active model for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveModelInfo {
    pub model_id: String,
    pub instance_id: Option<String>,
    pub idle_secs: u64,
}

pub struct LocalModelManager {
    settings: LocalSettings,
    client: Client,
    catalog: Arc<ModelCatalog>,
    memory: Arc<dyn MemoryProbe>,
    lifecycle: tokio::sync::Mutex<()>,
    active: Mutex<Option<ActiveModel>>,
}

impl std::fmt::Debug for LocalModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalModelManager")
            .field("settings", &self.settings)
            .field("active", &self.active_model())
            .finish_non_exhaustive()
    }
}

impl LocalModelManager {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        settings: LocalSettings,
        catalog: Arc<ModelCatalog>,
        memory: Arc<dyn MemoryProbe>,
    ) -> Result<Self> {
        Ok(Self {
            client: http::build_client(LOAD_TIMEOUT)?,
            settings,
            catalog,
            memory,
            lifecycle: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &LocalSettings {
        &self.settings
    }

    // =========================================================================
    // Active marker
    // =========================================================================

    fn active_guard(&self) -> std::sync::MutexGuard<'_, Option<ActiveModel>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn active_model(&self) -> Option<ActiveModelInfo> {
        self.active_guard().as_ref().map(|a| ActiveModelInfo {
            model_id: a.id.clone(),
            instance_id: a.instance_id.clone(),
            idle_secs: a.last_access.elapsed().as_secs(),
        })
    }

    /// Refresh the active model's access time.
    pub fn touch(&self) {
        if let Some(active) = self.active_guard().as_mut() {
            active.last_access = Instant::now();
        }
    }

    fn touch_if_active(&self, id: &str) -> bool {
        match self.active_guard().as_mut() {
            Some(active) if active.id == id => {
                active.last_access = Instant::now();
                true
            }
            _ => false,
        }
    }

    fn set_active(&self, id: &str, instance_id: Option<String>) {
        *self.active_guard() = Some(ActiveModel {
            id: id.to_string(),
            instance_id,
            last_access: Instant::now(),
        });
    }

    fn clear_active_if(&self, id: &str) {
        let mut active = self.active_guard();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }

    // =========================================================================
    // Alias resolution
    // =========================================================================

    /// Preferred local model id from the catalog: exact match, then
    /// case-insensitive substring, then the first local model.
    #[must_use]
    pub fn preferred_local_id(&self) -> Option<String> {
        let local = self.catalog.local_models();
        if let Some(preferred) = self
            .settings
            .preferred_model
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            if let Some(exact) = local.iter().find(|d| d.id == preferred) {
                return Some(exact.id.clone());
            }
            let needle = preferred.to_lowercase();
            if let Some(hit) = local.iter().find(|d| d.id.to_lowercase().contains(&needle)) {
                return Some(hit.id.clone());
            }
        }
        local.into_iter().next().map(|d| d.id)
    }

    /// Resolve `local`/`auto`/empty to a concrete id, discovering if needed.
    pub async fn resolve_alias(&self, model_id: &str) -> Option<String> {
        let requested = model_id.trim();
        let is_alias = requested.is_empty()
            || requested.eq_ignore_ascii_case(LOCAL_ALIAS)
            || requested.eq_ignore_ascii_case(AUTO_MODEL);
        if !is_alias {
            return Some(requested.to_string());
        }
        if self.catalog.local_models().is_empty() {
            self.catalog.discover_local().await;
        }
        self.preferred_local_id()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Make sure `model_id` (or the alias it names) is the resident model.
    pub async fn ensure_loaded(&self, model_id: &str) -> bool {
        let Some(id) = self.resolve_alias(model_id).await else {
            tracing::warn!(requested = model_id, "No local model to resolve alias to");
            return false;
        };
        if self.touch_if_active(&id) {
            tracing::debug!(model = %id, "Model already active");
            return true;
        }
        self.load(&id).await
    }

    /// Load a model, unloading any other resident model first.
    pub async fn load(&self, model_id: &str) -> bool {
        let _guard = self.lifecycle.lock().await;

        // Another caller may have finished loading it while we waited.
        if self.touch_if_active(model_id) {
            return true;
        }

        let size_gb = self
            .catalog
            .get(model_id)
            .map(|d| d.size_gb)
            .filter(|s| *s > 0.0)
            .unwrap_or(self.settings.default_model_size_gb);

        if self.settings.ram_budget_gb > 0.0 && size_gb > self.settings.ram_budget_gb {
            tracing::warn!(
                model = model_id,
                size_gb,
                budget_gb = self.settings.ram_budget_gb,
                "Model exceeds RAM budget, refusing to load"
            );
            return false;
        }

        let previous = self.active_guard().as_ref().map(|a| a.id.clone());
        if let Some(previous) = previous.filter(|p| p != model_id) {
            tracing::info!(from = %previous, to = model_id, "Switching resident model");
            if let Err(e) = self.unload_locked(&previous).await {
                tracing::warn!(model = %previous, error = %e, "Unload before switch failed");
            }
        }

        let available_gb = memory::available_gb(&self.memory).await;
        let required_gb = size_gb + self.settings.safety_buffer_gb;
        if available_gb < required_gb {
            tracing::info!(
                model = model_id,
                available_gb,
                required_gb,
                "Insufficient memory, evicting all local models"
            );
            let freed = self.free_all_locked().await;
            tracing::debug!(freed, "Eviction finished");
            tokio::time::sleep(self.settings.eviction_cooldown).await;
        }

        self.catalog.set_status(model_id, ModelStatus::Loading);
        match self.request_load(model_id).await {
            Ok(instance_id) => {
                self.set_active(model_id, instance_id);
                self.catalog.set_status(model_id, ModelStatus::Loaded);
                tracing::info!(model = model_id, size_gb, "Model loaded");
                true
            }
            Err(e) => {
                self.catalog.set_status(model_id, ModelStatus::Error);
                tracing::warn!(model = model_id, error = %e, "Model load failed");
                false
            }
        }
    }

    /// Unload a model.
    pub async fn unload(&self, model_id: &str) -> bool {
        let _guard = self.lifecycle.lock().await;
        match self.unload_locked(model_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(model = model_id, error = %e, "Model unload failed");
                false
            }
        }
    }

    /// Unload everything the server reports as loaded.
    ///
    /// Returns the number of instances unloaded.
    pub async fn free_all(&self) -> usize {
        let _guard = self.lifecycle.lock().await;
        self.free_all_locked().await
    }

    async fn unload_locked(&self, model_id: &str) -> Result<()> {
        let instance_id = self
            .active_guard()
            .as_ref()
            .filter(|a| a.id == model_id)
            .and_then(|a| a.instance_id.clone())
            .unwrap_or_else(|| model_id.to_string());

        self.catalog.set_status(model_id, ModelStatus::Unloading);
        match self.request_unload(model_id, &instance_id).await {
            Ok(()) => {
                self.clear_active_if(model_id);
                self.catalog.set_status(model_id, ModelStatus::Available);
                tracing::info!(model = model_id, "Model unloaded");
                tokio::time::sleep(self.settings.unload_cooldown).await;
                Ok(())
            }
            Err(e) => {
                self.catalog.set_status(model_id, ModelStatus::Error);
                Err(e)
            }
        }
    }

    async fn free_all_locked(&self) -> usize {
        let mut loaded = self.list_loaded().await;
        if loaded.is_empty()
            && let Some(active) = self.active_guard().as_ref()
        {
            loaded.push((
                active.id.clone(),
                active.instance_id.clone().unwrap_or_else(|| active.id.clone()),
            ));
        }

        let mut freed = 0;
        for (model_id, instance_id) in &loaded {
            match self.request_unload(model_id, instance_id).await {
                Ok(()) => freed += 1,
                Err(e) => tracing::warn!(model = %model_id, error = %e, "Eviction unload failed"),
            }
        }

        *self.active_guard() = None;
        for id in self.catalog.loaded_ids() {
            if self.catalog.get(&id).is_some_and(|d| d.is_local()) {
                self.catalog.set_status(&id, ModelStatus::Available);
            }
        }
        if freed > 0 {
            tokio::time::sleep(self.settings.unload_cooldown).await;
        }
        freed
    }

    /// `(model_id, instance_id)` pairs the server reports as loaded.
    async fn list_loaded(&self) -> Vec<(String, String)> {
        let Some((shape, entries)) = self.catalog.fetch_local_listing().await else {
            return Vec::new();
        };
        match shape {
            ListingShape::Native => entries
                .iter()
                .filter_map(|e| e.model_id().map(|id| (id, e.loaded_instances())))
                .flat_map(|(id, instances)| {
                    instances
                        .iter()
                        .map(move |inst| (id.to_string(), inst.id.clone()))
                })
                .collect(),
            ListingShape::Legacy => entries
                .iter()
                .filter_map(|e| e.model_id())
                .map(|id| (id.to_string(), id.to_string()))
                .collect(),
        }
    }

    /// Try each load shape; a 2xx whose body reports an error is a failure.
    async fn request_load(&self, model_id: &str) -> Result<Option<String>> {
        let bodies = [
            json!({ "model": model_id }),
            json!({ "model": model_id, "ttl": self.settings.load_ttl_secs }),
        ];
        let mut last_failure = String::from("no endpoint answered");
        for (path, body) in LOAD_PATHS.into_iter().zip(bodies) {
            let url = http::join_url(&self.settings.base_url, path);
            match http::post_json(&self.client, &url, &body, None, "local", LOAD_TIMEOUT).await {
                Ok(resp) if resp.is_lifecycle_success() && !lifecycle_body_reports_error(&resp.body) => {
                    return Ok(instance_id_from(&resp.body));
                }
                Ok(resp) => {
                    tracing::debug!(%url, status = resp.status, body = %resp.body, "Load shape rejected");
                    last_failure = format!("HTTP {} from {path}", resp.status);
                }
                Err(e) => {
                    tracing::debug!(%url, error = %e, "Load shape failed");
                    last_failure = e.to_string();
                }
            }
        }
        Err(SwitchyardError::LoadFailed {
            model: model_id.to_string(),
            reason: last_failure,
        })
    }

    async fn request_unload(&self, model_id: &str, instance_id: &str) -> Result<()> {
        let bodies = [
            json!({ "instance_id": instance_id }),
            json!({ "model": model_id }),
        ];
        let mut last_failure = String::from("no endpoint answered");
        for (path, body) in UNLOAD_PATHS.into_iter().zip(bodies) {
            let url = http::join_url(&self.settings.base_url, path);
            match http::post_json(&self.client, &url, &body, None, "local", LOAD_TIMEOUT).await {
                Ok(resp) if resp.is_lifecycle_success() && !lifecycle_body_reports_error(&resp.body) => {
                    return Ok(());
                }
                Ok(resp) => {
                    tracing::debug!(%url, status = resp.status, body = %resp.body, "Unload shape rejected");
                    last_failure = format!("HTTP {} from {path}", resp.status);
                }
                Err(e) => last_failure = e.to_string(),
            }
        }
        Err(SwitchyardError::UnloadFailed {
            model: model_id.to_string(),
            reason: last_failure,
        })
    }

    // =========================================================================
    // Idle eviction
    // =========================================================================

    /// One maintenance pass. Returns the id unloaded for idleness, if any.
    ///
    /// # Errors
    ///
    /// Returns the unload error; the eviction loop logs it and keeps going.
    pub async fn run_maintenance_cycle(&self) -> Result<Option<String>> {
        let threshold = self.settings.idle_threshold;
        let is_idle = |info: &ActiveModelInfo| Duration::from_secs(info.idle_secs) >= threshold;
        if !self.active_model().is_some_and(|info| is_idle(&info)) {
            return Ok(None);
        }

        let _guard = self.lifecycle.lock().await;
        // Re-check under the lock; a request may have touched it meanwhile.
        let Some(info) = self.active_model().filter(|info| is_idle(info)) else {
            return Ok(None);
        };
        tracing::info!(model = %info.model_id, idle_secs = info.idle_secs, "Evicting idle model");
        self.unload_locked(&info.model_id).await?;
        Ok(Some(info.model_id))
    }

    /// Spawn the idle-eviction loop; it stops when `shutdown` fires or its
    /// sender is dropped.
    pub fn spawn_idle_eviction(self: &Arc<Self>, mut shutdown: oneshot::Receiver<()>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let period = manager.settings.maintenance_interval.max(Duration::from_millis(1));
            let mut ticker = interval(period);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match manager.run_maintenance_cycle().await {
                            Ok(Some(model)) => tracing::debug!(%model, "Idle eviction unloaded model"),
                            Ok(None) => {}
                            Err(e) => tracing::warn!(error = %e, "Maintenance cycle failed"),
                        }
                    }
                    _ = &mut shutdown => {
                        tracing::debug!("Idle eviction stopped");
                        break;
                    }
                }
            }
        })
    }
}

fn instance_id_from(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("instance_id")?
        .as_str()
        .map(ToString::to_string)
}
