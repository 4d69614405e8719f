//! Cloud tier gateway.
//!
//! Resolves a working credential for the primary provider (free tier first,
//! then paid), builds the ordered cloud model chain, and owns [`TierState`].
//! Tier switches are driven by the recovery ladder through
//! [`CloudTierGateway::switch_to_paid`].

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use reqwest::Client;
use serde_json::json;

use super::http::{self, VERIFY_TIMEOUT};
use super::models::{CloudProvider, Route, Tier, TierState, is_auto};
use crate::error::{Result, SwitchyardError};
use crate::storage::store::write_json;

/// Model used when nothing else is configured or verifiable.
pub const DEFAULT_CLOUD_MODEL: &str = "gemini-2.0-flash";

/// Secondary provider used when the primary rejects the credential.
#[derive(Debug, Clone)]
pub struct SecondaryProvider {
    pub base_url: String,
    pub key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub primary_base_url: String,
    pub free_key: Option<String>,
    pub paid_key: Option<String>,
    pub secondary: Option<SecondaryProvider>,
    /// Candidate models, cheapest first (see [`fallback_chain`]).
    pub chain: Vec<String>,
    /// Operator override; `auto` or `None` means walk the chain.
    pub configured_model: Option<String>,
    pub default_model: String,
    pub vision_model: Option<String>,
    /// Verify each chain candidate with a 1-token call before using it.
    pub verify_models: bool,
    /// Where to write tier state snapshots; `None` disables persistence.
    pub state_path: Option<PathBuf>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            primary_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            free_key: None,
            paid_key: None,
            secondary: None,
            chain: vec![DEFAULT_CLOUD_MODEL.to_string()],
            configured_model: None,
            default_model: DEFAULT_CLOUD_MODEL.to_string(),
            vision_model: None,
            verify_models: false,
            state_path: None,
        }
    }
}

/// Base URL and credential for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub key: Option<String>,
}

/// Concatenate tiers in preference order, dropping duplicates and blanks,
/// and append `default` if it is not already present.
#[must_use]
pub fn fallback_chain(tier1: &[String], tier2: &[String], tier3: &[String], default: &str) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    for id in tier1.iter().chain(tier2).chain(tier3).map(|s| s.trim()) {
        if !id.is_empty() && !chain.iter().any(|c| c == id) {
            chain.push(id.to_string());
        }
    }
    let default = default.trim();
    if !default.is_empty() && !chain.iter().any(|c| c == default) {
        chain.push(default.to_string());
    }
    chain
}

/// Pick a cloud model.
///
/// A configured non-`auto` model wins. Otherwise the first chain entry that
/// passes `verify` is returned (the first entry when no verifier is given),
/// falling back to `default`.
pub async fn best_cloud_model<F, Fut>(
    key: &str,
    chain: &[String],
    configured: Option<&str>,
    default: &str,
    verify: Option<F>,
) -> String
where
    F: Fn(String, String) -> Fut,
    Fut: Future<Output = bool>,
{
    if let Some(model) = configured.filter(|m| !is_auto(Some(m))) {
        return model.trim().to_string();
    }
    match verify {
        None => chain.first().cloned().unwrap_or_else(|| default.to_string()),
        Some(verify) => {
            for candidate in chain {
                if verify(candidate.clone(), key.to_string()).await {
                    return candidate.clone();
                }
                tracing::debug!(model = %candidate, "Chain candidate failed verification");
            }
            default.to_string()
        }
    }
}

pub struct CloudTierGateway {
    settings: GatewaySettings,
    client: Client,
    state: RwLock<TierState>,
    resolved_key: RwLock<Option<String>>,
    model_memo: RwLock<HashMap<Tier, String>>,
}

impl std::fmt::Debug for CloudTierGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudTierGateway")
            .field("primary_base_url", &self.settings.primary_base_url)
            .field("state", &self.tier_state())
            .finish_non_exhaustive()
    }
}

impl CloudTierGateway {
    /// Create a gateway. The initial tier is Free when a free key is
    /// configured, Paid otherwise; no network call is made.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(settings: GatewaySettings) -> Result<Self> {
        let tier = if non_empty(settings.free_key.as_deref()).is_some() {
            Tier::Free
        } else {
            Tier::Paid
        };
        Ok(Self {
            client: http::build_client(VERIFY_TIMEOUT)?,
            settings,
            state: RwLock::new(TierState::new(tier)),
            resolved_key: RwLock::new(None),
            model_memo: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    #[must_use]
    pub fn tier_state(&self) -> TierState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn active_tier(&self) -> Tier {
        self.state.read().unwrap_or_else(PoisonError::into_inner).active_tier
    }

    /// Whether any cloud credential is configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        non_empty(self.settings.free_key.as_deref()).is_some()
            || non_empty(self.settings.paid_key.as_deref()).is_some()
            || self.secondary_endpoint().is_some_and(|e| e.key.is_some())
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    /// Minimal generation call against the primary provider.
    ///
    /// Never fails: the classification is logged and a bool returned.
    pub async fn verify_access(&self, model_id: &str, key: &str) -> bool {
        let provider = CloudProvider::Primary.name();
        let url = http::join_url(&self.settings.primary_base_url, "/chat/completions");
        let body = json!({
            "model": model_id,
            "messages": [{"role": "user", "content": "ping"}],
            "max_tokens": 1,
        });
        let fingerprint = http::key_fingerprint(key);

        let failure = match http::post_json(&self.client, &url, &body, Some(key), provider, VERIFY_TIMEOUT).await {
            Ok(resp) if (200..300).contains(&resp.status) => {
                tracing::debug!(model = model_id, key = %fingerprint, "Access verified");
                return true;
            }
            Ok(resp) => SwitchyardError::from_status(provider, resp.status, &resp.body, VERIFY_TIMEOUT),
            Err(e) => e,
        };
        tracing::warn!(
            model = model_id,
            key = %fingerprint,
            code = failure.error_code(),
            category = failure.category().description(),
            "Access verification failed"
        );
        false
    }

    /// First of `free`, `paid` that passes verification, memoized until
    /// [`reset_cache`](Self::reset_cache).
    pub async fn resolve_working_key(&self, free: Option<&str>, paid: Option<&str>) -> Option<String> {
        if let Some(key) = self.resolved_key.read().unwrap_or_else(PoisonError::into_inner).clone() {
            return Some(key);
        }

        let probe_model = self.probe_model();
        for (tier, key) in [(Tier::Free, free), (Tier::Paid, paid)] {
            let Some(key) = non_empty(key) else { continue };
            if self.verify_access(&probe_model, key).await {
                tracing::info!(tier = tier.label(), key = %http::key_fingerprint(key), "Resolved working key");
                *self.resolved_key.write().unwrap_or_else(PoisonError::into_inner) = Some(key.to_string());
                let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                if state.active_tier != tier {
                    state.active_tier = tier;
                    state.last_recovery_action = "key_resolution".to_string();
                }
                return Some(key.to_string());
            }
        }
        tracing::warn!("No working cloud key");
        None
    }

    /// [`resolve_working_key`](Self::resolve_working_key) with the configured keys.
    pub async fn resolve_configured_key(&self) -> Option<String> {
        self.resolve_working_key(self.settings.free_key.as_deref(), self.settings.paid_key.as_deref())
            .await
    }

    /// Forget the memoized key and cloud models.
    pub fn reset_cache(&self) {
        *self.resolved_key.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.model_memo.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Key for the active tier, without verification.
    #[must_use]
    pub fn active_key(&self) -> Option<String> {
        let free = non_empty(self.settings.free_key.as_deref());
        let paid = non_empty(self.settings.paid_key.as_deref());
        match self.active_tier() {
            Tier::Free => free.or(paid),
            Tier::Paid => paid.or(free),
        }
        .map(ToString::to_string)
    }

    fn probe_model(&self) -> String {
        self.settings
            .configured_model
            .as_deref()
            .filter(|m| !is_auto(Some(m)))
            .or_else(|| self.settings.chain.first().map(String::as_str))
            .unwrap_or(&self.settings.default_model)
            .to_string()
    }

    // =========================================================================
    // Endpoints and model selection
    // =========================================================================

    /// Endpoint and credential for `provider`; `None` if not configured.
    #[must_use]
    pub fn endpoint(&self, provider: CloudProvider) -> Option<ProviderEndpoint> {
        match provider {
            CloudProvider::Primary => Some(ProviderEndpoint {
                base_url: self.settings.primary_base_url.clone(),
                key: self.active_key(),
            }),
            CloudProvider::Secondary => self.secondary_endpoint(),
        }
    }

    fn secondary_endpoint(&self) -> Option<ProviderEndpoint> {
        self.settings.secondary.as_ref().map(|s| ProviderEndpoint {
            base_url: s.base_url.clone(),
            key: non_empty(s.key.as_deref()).map(ToString::to_string),
        })
    }

    /// Route to the secondary provider's model, if one is configured with a key.
    #[must_use]
    pub fn secondary_target(&self) -> Option<Route> {
        self.settings
            .secondary
            .as_ref()
            .filter(|s| non_empty(s.key.as_deref()).is_some() && !s.model.trim().is_empty())
            .map(|s| Route::cloud(s.model.trim(), CloudProvider::Secondary))
    }

    /// Cloud route for a request.
    ///
    /// Vision requests use the vision hint. Text requests use the configured
    /// model or the chain, memoized per tier. With no primary key at all the
    /// secondary provider is used if configured.
    pub async fn select_cloud_model(&self, vision: bool) -> Route {
        let Some(key) = self.active_key() else {
            if let Some(route) = self.secondary_target() {
                return route;
            }
            return Route::cloud(self.probe_model(), CloudProvider::Primary);
        };

        if vision {
            let model = self
                .settings
                .vision_model
                .as_deref()
                .and_then(|m| non_empty(Some(m)))
                .map_or_else(|| self.probe_model(), ToString::to_string);
            return Route::cloud(model, CloudProvider::Primary);
        }

        let tier = self.active_tier();
        if let Some(model) = self.model_memo.read().unwrap_or_else(PoisonError::into_inner).get(&tier) {
            return Route::cloud(model.clone(), CloudProvider::Primary);
        }

        let model = if self.settings.verify_models {
            let verify = |model: String, key: String| async move { self.verify_access(&model, &key).await };
            best_cloud_model(
                &key,
                &self.settings.chain,
                self.settings.configured_model.as_deref(),
                &self.settings.default_model,
                Some(verify),
            )
            .await
        } else {
            best_cloud_model(
                &key,
                &self.settings.chain,
                self.settings.configured_model.as_deref(),
                &self.settings.default_model,
                None::<fn(String, String) -> std::future::Ready<bool>>,
            )
            .await
        };

        self.model_memo
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tier, model.clone());
        Route::cloud(model, CloudProvider::Primary)
    }

    // =========================================================================
    // Ladder support
    // =========================================================================

    /// Whether a Free → Paid switch is possible.
    #[must_use]
    pub fn can_switch_to_paid(&self) -> bool {
        self.active_tier() == Tier::Free && non_empty(self.settings.paid_key.as_deref()).is_some()
    }

    /// Switch the primary provider to the paid tier.
    ///
    /// Returns false if already on Paid or no paid key is configured.
    pub fn switch_to_paid(&self, error_code: &str) -> bool {
        if !self.can_switch_to_paid() {
            return false;
        }
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.active_tier = Tier::Paid;
            state.switch_count += 1;
            state.last_switch_at = Some(Utc::now());
            state.last_error_code = Some(error_code.to_string());
            state.last_recovery_action = "switch_to_paid".to_string();
            state.last_provider_status = "quota_exceeded".to_string();
        }
        if let Some(paid) = non_empty(self.settings.paid_key.as_deref()) {
            *self.resolved_key.write().unwrap_or_else(PoisonError::into_inner) = Some(paid.to_string());
        }
        tracing::info!(error_code, "Switched cloud tier to paid");
        self.persist_state();
        true
    }

    /// Record a ladder action and the provider status that prompted it.
    pub fn record_recovery(&self, action: &str, provider_status: &str, error_code: Option<&str>) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.last_recovery_action = action.to_string();
            state.last_provider_status = provider_status.to_string();
            if let Some(code) = error_code {
                state.last_error_code = Some(code.to_string());
            }
        }
        self.persist_state();
    }

    fn persist_state(&self) {
        let Some(path) = self.settings.state_path.as_deref() else {
            return;
        };
        if let Err(e) = write_json(path, &self.tier_state()) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to persist tier state");
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn gateway(free: Option<&str>, paid: Option<&str>) -> CloudTierGateway {
        CloudTierGateway::new(GatewaySettings {
            primary_base_url: "http://127.0.0.1:9".to_string(),
            free_key: free.map(ToString::to_string),
            paid_key: paid.map(ToString::to_string),
            ..GatewaySettings::default()
        })
        .unwrap()
    }

    #[test]
    fn chain_dedupes_and_appends_default() {
        let chain = fallback_chain(
            &ids(&["flash-lite", "flash"]),
            &ids(&["flash", "pro"]),
            &ids(&["", "ultra"]),
            "flash",
        );
        assert_eq!(chain, ids(&["flash-lite", "flash", "pro", "ultra"]));

        let chain = fallback_chain(&[], &[], &[], "fallback");
        assert_eq!(chain, ids(&["fallback"]));
    }

    #[tokio::test]
    async fn configured_model_wins_without_verification() {
        let calls = AtomicUsize::new(0);
        let verify = |_: String, _: String| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { true }
        };
        let model = best_cloud_model("k", &ids(&["a", "b"]), Some("pinned"), "d", Some(verify)).await;
        assert_eq!(model, "pinned");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn walks_chain_until_verified() {
        let verify = |model: String, _: String| async move { model == "b" };
        let model = best_cloud_model("k", &ids(&["a", "b", "c"]), Some("auto"), "d", Some(verify)).await;
        assert_eq!(model, "b");

        let never = |_: String, _: String| async { false };
        let model = best_cloud_model("k", &ids(&["a"]), None, "d", Some(never)).await;
        assert_eq!(model, "d");
    }

    #[tokio::test]
    async fn no_verifier_takes_first_entry() {
        let model = best_cloud_model(
            "k",
            &ids(&["a", "b"]),
            None,
            "d",
            None::<fn(String, String) -> std::future::Ready<bool>>,
        )
        .await;
        assert_eq!(model, "a");
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_verification_logs_fingerprint_not_key() {
        let gw = gateway(Some("secret-free-key"), None);
        assert!(!gw.verify_access("flash", "secret-free-key").await);

        assert!(logs_contain("Access verification failed"));
        assert!(logs_contain(&http::key_fingerprint("secret-free-key")));
        assert!(!logs_contain("secret-free-key"));
    }

    #[test]
    fn initial_tier_follows_configured_keys() {
        assert_eq!(gateway(Some("free"), Some("paid")).active_tier(), Tier::Free);
        assert_eq!(gateway(None, Some("paid")).active_tier(), Tier::Paid);
        assert_eq!(gateway(Some("  "), Some("paid")).active_tier(), Tier::Paid);
    }

    #[test]
    fn switch_to_paid_happens_once() {
        let gw = gateway(Some("free"), Some("paid"));
        assert_eq!(gw.active_key().as_deref(), Some("free"));
        assert!(gw.switch_to_paid("quota_exceeded"));
        assert!(!gw.switch_to_paid("quota_exceeded"));

        let state = gw.tier_state();
        assert_eq!(state.active_tier, Tier::Paid);
        assert_eq!(state.switch_count, 1);
        assert!(state.last_switch_at.is_some());
        assert_eq!(state.last_error_code.as_deref(), Some("quota_exceeded"));
        assert_eq!(gw.active_key().as_deref(), Some("paid"));
    }

    #[test]
    fn no_switch_without_paid_key() {
        let gw = gateway(Some("free"), None);
        assert!(!gw.can_switch_to_paid());
        assert!(!gw.switch_to_paid("quota_exceeded"));
        assert_eq!(gw.tier_state().switch_count, 0);
    }

    #[test]
    fn switch_persists_state_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tier-state.json");
        let gw = CloudTierGateway::new(GatewaySettings {
            free_key: Some("free".into()),
            paid_key: Some("paid".into()),
            state_path: Some(path.clone()),
            ..GatewaySettings::default()
        })
        .unwrap();
        gw.switch_to_paid("quota_exceeded");

        let saved: TierState = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved.active_tier, Tier::Paid);
        assert_eq!(saved.switch_count, 1);
    }

    #[tokio::test]
    async fn memoized_model_is_reset() {
        let gw = CloudTierGateway::new(GatewaySettings {
            free_key: Some("free".into()),
            chain: ids(&["first", "second"]),
            ..GatewaySettings::default()
        })
        .unwrap();
        assert_eq!(gw.select_cloud_model(false).await.model_id, "first");
        gw.model_memo
            .write()
            .unwrap()
            .insert(Tier::Free, "stale".to_string());
        assert_eq!(gw.select_cloud_model(false).await.model_id, "stale");
        gw.reset_cache();
        assert_eq!(gw.select_cloud_model(false).await.model_id, "first");
    }

    #[test]
    fn secondary_requires_key_and_model() {
        let mut settings = GatewaySettings {
            secondary: Some(SecondaryProvider {
                base_url: "http://alt".into(),
                key: None,
                model: "alt-model".into(),
            }),
            ..GatewaySettings::default()
        };
        assert!(CloudTierGateway::new(settings.clone()).unwrap().secondary_target().is_none());

        if let Some(secondary) = settings.secondary.as_mut() {
            secondary.key = Some("alt-key".into());
        }
        let route = CloudTierGateway::new(settings).unwrap().secondary_target().unwrap();
        assert_eq!(route, Route::cloud("alt-model", CloudProvider::Secondary));
    }
}
