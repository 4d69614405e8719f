//! Engine context.
//!
//! Wires configuration into the catalog, local manager, gateway, router and
//! orchestrator. Every command builds one `Engine`; nothing is global.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::catalog::{CloudSource, ModelCatalog};
use super::completion::CompletionClient;
use super::gateway::CloudTierGateway;
use super::health::{CloudEndpoint, HealthProbes, HealthReport};
use super::local::{ActiveModelInfo, LocalModelManager};
use super::memory::{self, MemoryProbe, SystemMemory};
use super::models::{CloudProvider, ModelDescriptor, Route, TierState};
use super::orchestrator::{CompletionOrchestrator, CompletionOutcome, CompletionRequest, OrchestratorSettings};
use super::router::{ModelRouter, RouteRequest};
use super::usage::{TracingLedger, UsageLedger};
use crate::error::Result;
use crate::storage::config::Config;
use crate::storage::paths::AppPaths;
use crate::storage::store::{FileWindowStore, MemoryWindowStore, WindowStore};

/// Pluggable collaborators.
#[derive(Clone)]
pub struct EngineOptions {
    pub memory: Arc<dyn MemoryProbe>,
    pub store: Arc<dyn WindowStore>,
    pub ledger: Arc<dyn UsageLedger>,
    /// Tier state snapshot file; `None` disables it.
    pub state_path: Option<PathBuf>,
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("state_path", &self.state_path)
            .finish_non_exhaustive()
    }
}

impl EngineOptions {
    /// System memory, tracing ledger, and a file store under `paths` when
    /// history persistence is enabled.
    #[must_use]
    pub fn for_paths(config: &Config, paths: &AppPaths) -> Self {
        let ttl = Duration::from_secs(config.history.ttl_secs);
        let store: Arc<dyn WindowStore> = if config.history.persist {
            Arc::new(FileWindowStore::new(paths.windows_dir(), ttl))
        } else {
            Arc::new(MemoryWindowStore::new(ttl))
        };
        Self {
            memory: Arc::new(SystemMemory),
            store,
            ledger: Arc::new(TracingLedger),
            state_path: Some(paths.tier_state_file()),
        }
    }

    /// Nothing touches the filesystem.
    #[must_use]
    pub fn in_memory(config: &Config) -> Self {
        Self {
            memory: Arc::new(SystemMemory),
            store: Arc::new(MemoryWindowStore::new(Duration::from_secs(config.history.ttl_secs))),
            ledger: Arc::new(TracingLedger),
            state_path: None,
        }
    }

    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryProbe>) -> Self {
        self.memory = memory;
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn UsageLedger>) -> Self {
        self.ledger = ledger;
        self
    }
}

/// Snapshot for the `status` command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub configured_model: Option<String>,
    pub active_model: Option<ActiveModelInfo>,
    pub tier: TierState,
    pub available_memory_gb: f64,
    pub total_memory_gb: Option<f64>,
    pub catalog_size: usize,
}

pub struct Engine {
    config: Config,
    memory: Arc<dyn MemoryProbe>,
    catalog: Arc<ModelCatalog>,
    local: Arc<LocalModelManager>,
    gateway: Arc<CloudTierGateway>,
    health: Arc<HealthProbes>,
    router: Arc<ModelRouter>,
    orchestrator: Arc<CompletionOrchestrator>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("catalog", &self.catalog)
            .field("local", &self.local)
            .field("gateway", &self.gateway)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine from resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns error if an HTTP client cannot be built.
    pub fn new(config: Config, options: EngineOptions) -> Result<Self> {
        let local_settings = config.local_settings();
        let catalog = Arc::new(ModelCatalog::new(local_settings.base_url.clone())?);
        let local = Arc::new(LocalModelManager::new(
            local_settings.clone(),
            Arc::clone(&catalog),
            Arc::clone(&options.memory),
        )?);
        let gateway = Arc::new(CloudTierGateway::new(config.gateway_settings(options.state_path))?);
        let health = Arc::new(HealthProbes::new(
            local_settings.base_url,
            cloud_endpoints(&config),
        )?);
        let configured = Some(config.routing.model.clone());
        let router = Arc::new(ModelRouter::new(
            Arc::clone(&catalog),
            Arc::clone(&local),
            Arc::clone(&gateway),
            Arc::clone(&health),
            configured,
        ));
        let client = CompletionClient::with_timeout(Duration::from_secs(config.general.timeout_seconds))?;
        let orchestrator = Arc::new(CompletionOrchestrator::new(
            Arc::clone(&router),
            Arc::clone(&local),
            Arc::clone(&gateway),
            client,
            config.semantic_table(),
            OrchestratorSettings {
                limits: config.window_limits(),
                system_prompt: config.history.system_prompt.clone(),
                force_cloud: config.routing.force_cloud,
                window_ttl: Duration::from_secs(config.history.ttl_secs),
            },
            options.store,
            options.ledger,
        ));

        Ok(Self {
            config,
            memory: options.memory,
            catalog,
            local,
            gateway,
            health,
            router,
            orchestrator,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    #[must_use]
    pub const fn local(&self) -> &Arc<LocalModelManager> {
        &self.local
    }

    #[must_use]
    pub const fn gateway(&self) -> &Arc<CloudTierGateway> {
        &self.gateway
    }

    #[must_use]
    pub const fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &Arc<CompletionOrchestrator> {
        &self.orchestrator
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Discover local and cloud models; cloud listings use the verified key.
    pub async fn discover(&self) -> Vec<ModelDescriptor> {
        let primary_key = self.gateway.resolve_configured_key().await;
        let mut sources = vec![CloudSource {
            provider: CloudProvider::Primary,
            base_url: self.gateway.settings().primary_base_url.clone(),
            key: primary_key,
        }];
        if let Some(endpoint) = self.gateway.endpoint(CloudProvider::Secondary) {
            sources.push(CloudSource {
                provider: CloudProvider::Secondary,
                base_url: endpoint.base_url,
                key: endpoint.key,
            });
        }
        self.catalog.discover(&sources).await
    }

    pub async fn health(&self) -> Vec<HealthReport> {
        self.health.probe_all().await
    }

    pub async fn route(&self, request: RouteRequest) -> Route {
        self.router.route(request).await
    }

    pub async fn complete(&self, request: CompletionRequest) -> CompletionOutcome {
        self.orchestrator.complete(request).await
    }

    pub async fn load(&self, model_id: &str) -> bool {
        self.local.load(model_id).await
    }

    pub async fn unload(&self, model_id: &str) -> bool {
        self.local.unload(model_id).await
    }

    pub async fn free_all(&self) -> usize {
        self.local.free_all().await
    }

    /// Start idle model eviction and expired window sweeps; send on the
    /// paired sender to stop both.
    pub fn spawn_maintenance(&self, mut shutdown: oneshot::Receiver<()>) -> JoinHandle<()> {
        let (stop_eviction, eviction_shutdown) = oneshot::channel();
        let eviction = self.local.spawn_idle_eviction(eviction_shutdown);
        let orchestrator = Arc::clone(&self.orchestrator);
        let period = self
            .config
            .local_settings()
            .maintenance_interval
            .max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        orchestrator.evict_expired_windows().await;
                    }
                    _ = &mut shutdown => break,
                }
            }
            let _ = stop_eviction.send(());
            if let Err(e) = eviction.await {
                tracing::warn!(error = %e, "Idle eviction task failed");
            }
            tracing::debug!("Maintenance stopped");
        })
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            configured_model: self.router.configured_model().map(ToString::to_string),
            active_model: self.local.active_model(),
            tier: self.gateway.tier_state(),
            available_memory_gb: memory::available_gb(&self.memory).await,
            total_memory_gb: self.memory.total_gb(),
            catalog_size: self.catalog.len(),
        }
    }
}

/// Cloud endpoints worth probing: primary always, secondary when configured.
fn cloud_endpoints(config: &Config) -> Vec<CloudEndpoint> {
    let mut endpoints = vec![CloudEndpoint {
        provider: CloudProvider::Primary,
        base_url: config.cloud.primary_base_url.clone(),
        key: config
            .cloud
            .free_key
            .clone()
            .or_else(|| config.cloud.paid_key.clone()),
    }];
    if let Some(base_url) = config.cloud.secondary_base_url.clone() {
        endpoints.push(CloudEndpoint {
            provider: CloudProvider::Secondary,
            base_url,
            key: config.cloud.secondary_key.clone(),
        });
    }
    endpoints
}
