//! Completion orchestrator.
//!
//! Routes a request, sends it, classifies the buffered answer and walks the
//! recovery ladder until an answer passes or the attempt budget is spent:
//!
//! 1. quota on the primary provider's free tier: switch to paid, retry
//! 2. auth, unsupported key or quota: retry on the secondary provider
//! 3. any of the above, timeout or unreachable cloud: fall back to local
//! 4. last resort: one direct call to the local server
//!
//! Each stage runs at most once and a request never makes more than
//! [`MAX_ATTEMPTS`] attempts. Successful exchanges are appended to the
//! conversation's sliding window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use super::completion::{CompletionClient, CompletionTarget, ImageAttachment, TokenUsage};
use super::gateway::CloudTierGateway;
use super::http;
use super::local::LocalModelManager;
use super::models::{Backend, CloudProvider, LOCAL_ALIAS, Message, Route};
use super::router::{ModelRouter, RouteRequest};
use super::semantic::{SemanticErrorKind, SemanticTable};
use super::usage::{UsageLedger, UsageRecord};
use super::window::{ConversationWindow, WindowLimits};
use crate::storage::store::{DEFAULT_WINDOW_TTL_SECS, WindowStore};

/// Upper bound on attempts (backend calls) per request.
pub const MAX_ATTEMPTS: usize = 4;

/// Which ladder stage produced an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    Initial,
    TierSwitch,
    SecondaryProvider,
    LocalFallback,
    LocalBypass,
}

impl RecoveryStage {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::TierSwitch => "switch_to_paid",
            Self::SecondaryProvider => "secondary_provider",
            Self::LocalFallback => "local_fallback",
            Self::LocalBypass => "local_bypass",
        }
    }
}

/// One try within a request. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAttempt {
    pub stage: RecoveryStage,
    pub model_id: String,
    pub backend: Backend,
    /// Raw backend text; kept for diagnostics, never shown to end users.
    #[serde(skip)]
    pub result_text: String,
    pub classified_error: Option<SemanticErrorKind>,
}

/// A user turn to complete.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub conversation_id: String,
    pub prompt: String,
    pub images: Vec<ImageAttachment>,
    pub force_cloud: bool,
}

impl CompletionRequest {
    #[must_use]
    pub fn new(conversation_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }

    #[must_use]
    pub const fn with_force_cloud(mut self, force_cloud: bool) -> Self {
        self.force_cloud = force_cloud;
        self
    }
}

/// Result of [`CompletionOrchestrator::complete`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    /// The answer, or a fixed user-facing message on failure.
    pub text: String,
    pub success: bool,
    /// Route of the last attempt.
    pub route: Option<Route>,
    pub error: Option<SemanticErrorKind>,
    pub usage: Option<TokenUsage>,
    pub attempts: Vec<RecoveryAttempt>,
}

#[derive(Debug, Default)]
struct Ladder {
    tier_switched: bool,
    provider_swapped: bool,
    local_tried: bool,
    bypass_tried: bool,
}

struct AttemptResult {
    model_id: String,
    text: String,
    usage: Option<TokenUsage>,
    error: Option<SemanticErrorKind>,
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub limits: WindowLimits,
    pub system_prompt: Option<String>,
    /// Applies to every request in addition to the per-request flag.
    pub force_cloud: bool,
    /// Windows untouched for longer than this are forgotten.
    pub window_ttl: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            limits: WindowLimits::default(),
            system_prompt: None,
            force_cloud: false,
            window_ttl: Duration::from_secs(DEFAULT_WINDOW_TTL_SECS),
        }
    }
}

/// In-memory window with its last use.
#[derive(Debug, Clone)]
struct CachedWindow {
    window: ConversationWindow,
    touched: Instant,
}

impl CachedWindow {
    fn new(window: ConversationWindow) -> Self {
        Self {
            window,
            touched: Instant::now(),
        }
    }
}

pub struct CompletionOrchestrator {
    router: Arc<ModelRouter>,
    local: Arc<LocalModelManager>,
    gateway: Arc<CloudTierGateway>,
    client: CompletionClient,
    table: SemanticTable,
    settings: OrchestratorSettings,
    store: Arc<dyn WindowStore>,
    ledger: Arc<dyn UsageLedger>,
    windows: Mutex<HashMap<String, CachedWindow>>,
}

impl std::fmt::Debug for CompletionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionOrchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CompletionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        router: Arc<ModelRouter>,
        local: Arc<LocalModelManager>,
        gateway: Arc<CloudTierGateway>,
        client: CompletionClient,
        table: SemanticTable,
        settings: OrchestratorSettings,
        store: Arc<dyn WindowStore>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        Self {
            router,
            local,
            gateway,
            client,
            table,
            settings,
            store,
            ledger,
            windows: Mutex::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Windows
    // =========================================================================

    fn fresh_window(&self) -> ConversationWindow {
        let mut window = ConversationWindow::new();
        if let Some(prompt) = self.settings.system_prompt.as_deref() {
            window.set_system(prompt);
        }
        window
    }

    /// Current window, restored from the store on first use.
    ///
    /// A window idle past the TTL is dropped and read from the store again,
    /// which yields a fresh window once the stored copy has expired too.
    #[must_use]
    pub fn window(&self, conversation_id: &str) -> ConversationWindow {
        {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            let fresh = windows
                .get(conversation_id)
                .map(|cached| cached.touched.elapsed() <= self.settings.window_ttl);
            match fresh {
                Some(true) => {
                    if let Some(cached) = windows.get_mut(conversation_id) {
                        cached.touched = Instant::now();
                        return cached.window.clone();
                    }
                }
                Some(false) => {
                    tracing::debug!(conversation = conversation_id, "Window expired");
                    windows.remove(conversation_id);
                }
                None => {}
            }
        }

        let window = match self.store.load(conversation_id) {
            Some(messages) => {
                tracing::debug!(conversation = conversation_id, messages = messages.len(), "Restored window");
                let mut window = ConversationWindow::from_messages(messages, self.settings.limits);
                if let Some(prompt) = self.settings.system_prompt.as_deref()
                    && window.messages().first().is_none_or(|m| m.role != super::models::Role::System)
                {
                    window.set_system(prompt);
                }
                window
            }
            None => self.fresh_window(),
        };
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(conversation_id.to_string())
            .or_insert_with(|| CachedWindow::new(window))
            .window
            .clone()
    }

    /// Forget windows idle past the TTL, in memory and in the store.
    ///
    /// Returns how many in-memory windows were dropped.
    pub async fn evict_expired_windows(&self) -> usize {
        let evicted = {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            let before = windows.len();
            windows.retain(|_, cached| cached.touched.elapsed() <= self.settings.window_ttl);
            before - windows.len()
        };
        let store = Arc::clone(&self.store);
        let purged = tokio::task::spawn_blocking(move || store.purge_expired())
            .await
            .unwrap_or_default();
        if evicted > 0 || purged > 0 {
            tracing::debug!(evicted, purged, "Expired windows dropped");
        }
        evicted
    }

    /// Number of windows held in memory.
    #[must_use]
    pub fn cached_windows(&self) -> usize {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Forget a conversation in memory and in the store.
    pub fn reset(&self, conversation_id: &str) {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id);
        if let Err(e) = self.store.remove(conversation_id) {
            tracing::warn!(conversation = conversation_id, error = %e, "Failed to remove stored window");
        }
    }

    async fn record_exchange(&self, conversation_id: &str, user: Message, assistant: Message) {
        let messages = {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            let cached = windows
                .entry(conversation_id.to_string())
                .or_insert_with(|| CachedWindow::new(self.fresh_window()));
            cached.touched = Instant::now();
            let window = &mut cached.window;
            window.push(user);
            window.push(assistant);
            let dropped = window.trim(self.settings.limits);
            if dropped > 0 {
                tracing::debug!(conversation = conversation_id, dropped, "Trimmed window");
            }
            window.messages().to_vec()
        };
        let store = Arc::clone(&self.store);
        let id = conversation_id.to_string();
        match tokio::task::spawn_blocking(move || store.save(&id, &messages)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(conversation = conversation_id, error = %e, "Failed to persist window");
            }
            Err(e) => {
                tracing::warn!(conversation = conversation_id, error = %e, "Window persistence task failed");
            }
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Complete one user turn.
    ///
    /// Never fails: exhaustion yields a fixed message with `success: false`.
    /// Dropping the returned future abandons the ladder at the next await.
    pub async fn complete(&self, request: CompletionRequest) -> CompletionOutcome {
        let force_cloud = request.force_cloud || self.settings.force_cloud;
        let pending = Message::user(request.prompt.clone());
        let messages = self.window(&request.conversation_id).with_pending(&pending);

        let route_request = RouteRequest {
            has_vision: !request.images.is_empty(),
            force_cloud,
        };
        let mut route = self.router.route(route_request).await;
        let mut stage = RecoveryStage::Initial;
        let mut ladder = Ladder::default();
        let mut attempts: Vec<RecoveryAttempt> = Vec::new();

        tracing::debug!(
            conversation = %request.conversation_id,
            model = %route.model_id,
            backend = %route.backend,
            force_cloud,
            "Routed request"
        );

        let last_error = loop {
            let result = self.attempt(&route, stage, &messages, &request.images).await;
            attempts.push(RecoveryAttempt {
                stage,
                model_id: result.model_id.clone(),
                backend: route.backend,
                result_text: result.text.clone(),
                classified_error: result.error,
            });

            let Some(kind) = result.error else {
                return self.succeed(&request, pending, route, result, attempts).await;
            };

            tracing::warn!(
                stage = stage.label(),
                model = %result.model_id,
                backend = %route.backend,
                error = kind.code(),
                raw = %truncate(&result.text, 300),
                "Attempt failed"
            );

            if attempts.len() >= MAX_ATTEMPTS {
                break kind;
            }
            match self.next_step(kind, &route, &mut ladder, force_cloud) {
                Some((next_route, next_stage)) => {
                    route = next_route;
                    stage = next_stage;
                }
                None => break kind,
            }
        };

        self.gateway
            .record_recovery("exhausted", last_error.code(), Some(last_error.code()));
        tracing::warn!(
            conversation = %request.conversation_id,
            attempts = attempts.len(),
            error = last_error.code(),
            "Recovery ladder exhausted"
        );
        CompletionOutcome {
            text: last_error.user_message().to_string(),
            success: false,
            route: Some(route),
            error: Some(last_error),
            usage: None,
            attempts,
        }
    }

    async fn succeed(
        &self,
        request: &CompletionRequest,
        pending: Message,
        mut route: Route,
        result: AttemptResult,
        attempts: Vec<RecoveryAttempt>,
    ) -> CompletionOutcome {
        route.model_id.clone_from(&result.model_id);
        self.record_exchange(&request.conversation_id, pending, Message::assistant(result.text.clone()))
            .await;

        if attempts.len() > 1 {
            let stage = attempts.last().map_or(RecoveryStage::Initial, |a| a.stage);
            self.gateway.record_recovery(stage.label(), "ok", None);
        }
        if route.backend.is_local() {
            self.local.touch();
        }

        self.ledger.record(&UsageRecord {
            conversation_id: request.conversation_id.clone(),
            model_id: route.model_id.clone(),
            backend: route.backend,
            attempts: u32::try_from(attempts.len()).unwrap_or(u32::MAX),
            usage: result.usage,
            recorded_at: Utc::now(),
        });

        CompletionOutcome {
            text: result.text,
            success: true,
            route: Some(route),
            error: None,
            usage: result.usage,
            attempts,
        }
    }

    /// Next ladder stage for a failed attempt, or `None` when exhausted.
    fn next_step(
        &self,
        kind: SemanticErrorKind,
        route: &Route,
        ladder: &mut Ladder,
        force_cloud: bool,
    ) -> Option<(Route, RecoveryStage)> {
        let on_primary = route.backend == Backend::Cloud(CloudProvider::Primary);

        if kind.triggers_tier_switch() && on_primary && !ladder.tier_switched {
            ladder.tier_switched = true;
            if self.gateway.switch_to_paid(kind.code()) {
                return Some((route.clone(), RecoveryStage::TierSwitch));
            }
        }

        if kind.triggers_provider_swap() && !route.backend.is_local() && !ladder.provider_swapped {
            ladder.provider_swapped = true;
            if let Some(target) = self.gateway.secondary_target().filter(|t| t != route) {
                self.gateway
                    .record_recovery(RecoveryStage::SecondaryProvider.label(), kind.code(), Some(kind.code()));
                return Some((target, RecoveryStage::SecondaryProvider));
            }
        }

        if force_cloud {
            return None;
        }

        if kind.triggers_local_fallback() && !route.backend.is_local() && !ladder.local_tried {
            ladder.local_tried = true;
            self.gateway
                .record_recovery(RecoveryStage::LocalFallback.label(), kind.code(), Some(kind.code()));
            return Some((Route::local(LOCAL_ALIAS), RecoveryStage::LocalFallback));
        }

        if !ladder.bypass_tried {
            ladder.bypass_tried = true;
            let model = self
                .local
                .active_model()
                .map(|info| info.model_id)
                .or_else(|| self.local.preferred_local_id())
                .unwrap_or_else(|| LOCAL_ALIAS.to_string());
            return Some((Route::local(model), RecoveryStage::LocalBypass));
        }

        None
    }

    async fn attempt(
        &self,
        route: &Route,
        stage: RecoveryStage,
        messages: &[Message],
        images: &[ImageAttachment],
    ) -> AttemptResult {
        let mut model_id = route.model_id.clone();

        let (url, key, provider) = match route.backend {
            Backend::Local => {
                if stage != RecoveryStage::LocalBypass {
                    if !self.local.ensure_loaded(&route.model_id).await {
                        return AttemptResult {
                            model_id,
                            text: String::new(),
                            usage: None,
                            error: Some(SemanticErrorKind::ModelNotLoaded),
                        };
                    }
                    if let Some(active) = self.local.active_model() {
                        model_id = active.model_id;
                    }
                }
                let url = http::join_url(&self.local.settings().base_url, "/v1/chat/completions");
                (url, None, "local")
            }
            Backend::Cloud(provider) => {
                let Some(endpoint) = self.gateway.endpoint(provider) else {
                    return AttemptResult {
                        model_id,
                        text: String::new(),
                        usage: None,
                        error: Some(SemanticErrorKind::BackendUnavailable),
                    };
                };
                if endpoint.key.is_none() {
                    return AttemptResult {
                        model_id,
                        text: String::new(),
                        usage: None,
                        error: Some(SemanticErrorKind::AuthInvalid),
                    };
                }
                let url = http::join_url(&endpoint.base_url, "/chat/completions");
                (url, endpoint.key, provider.name())
            }
        };

        let target = CompletionTarget {
            url: &url,
            key: key.as_deref(),
            provider,
        };
        match self.client.complete(target, &model_id, messages, images).await {
            Ok(response) => AttemptResult {
                error: self.table.classify(&response.text),
                model_id,
                text: response.text,
                usage: response.usage,
            },
            Err(e) => AttemptResult {
                error: Some(self.table.classify_error(&e)),
                model_id,
                text: e.to_string(),
                usage: None,
            },
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn stage_labels_are_stable() {
        assert_eq!(RecoveryStage::TierSwitch.label(), "switch_to_paid");
        assert_eq!(RecoveryStage::LocalBypass.label(), "local_bypass");
    }

    #[test]
    fn request_builder() {
        let request = CompletionRequest::new("c1", "hi").with_force_cloud(true);
        assert_eq!(request.conversation_id, "c1");
        assert!(request.force_cloud);
        assert!(request.images.is_empty());
    }
}
