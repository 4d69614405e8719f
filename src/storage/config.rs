//! Configuration file loading and management.
//!
//! Loads configuration from `config.toml` in the platform config directory
//! (see [`AppPaths`]), or the path in `SWITCHYARD_CONFIG`.
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `SWITCHYARD_CONFIG`: Override config file path
//! - `SWITCHYARD_LOCAL_URL`: Local inference server base URL
//! - `SWITCHYARD_PREFERRED_MODEL`: Preferred local model (id or substring)
//! - `SWITCHYARD_RAM_BUDGET_GB`: Largest local model allowed, 0 for no limit
//! - `SWITCHYARD_FREE_KEY` / `SWITCHYARD_PAID_KEY`: Primary provider keys
//! - `SWITCHYARD_SECONDARY_KEY`: Secondary provider key
//! - `SWITCHYARD_MODEL`: Model override (`auto` lets the router decide)
//! - `SWITCHYARD_FORCE_CLOUD`: Never route to the local server (1, true, yes)
//! - `SWITCHYARD_IDLE_THRESHOLD_SECS`, `SWITCHYARD_MAINTENANCE_INTERVAL_SECS`
//! - `SWITCHYARD_HISTORY_MAX_MESSAGES`, `SWITCHYARD_HISTORY_MAX_CHARS`
//! - `SWITCHYARD_TIMEOUT`: Default timeout in seconds

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::core::gateway::{DEFAULT_CLOUD_MODEL, GatewaySettings, SecondaryProvider, fallback_chain};
use crate::core::local::LocalSettings;
use crate::core::semantic::{SemanticPattern, SemanticTable};
use crate::core::window::{DEFAULT_MAX_CHARS, DEFAULT_MAX_MESSAGES, WindowLimits};
use crate::error::{Result, SwitchyardError};
use crate::storage::store::DEFAULT_WINDOW_TTL_SECS;

// =============================================================================
// Environment Variable Names
// =============================================================================

pub const ENV_CONFIG: &str = "SWITCHYARD_CONFIG";
pub const ENV_LOCAL_URL: &str = "SWITCHYARD_LOCAL_URL";
pub const ENV_PREFERRED_MODEL: &str = "SWITCHYARD_PREFERRED_MODEL";
pub const ENV_RAM_BUDGET: &str = "SWITCHYARD_RAM_BUDGET_GB";
pub const ENV_FREE_KEY: &str = "SWITCHYARD_FREE_KEY";
pub const ENV_PAID_KEY: &str = "SWITCHYARD_PAID_KEY";
pub const ENV_SECONDARY_KEY: &str = "SWITCHYARD_SECONDARY_KEY";
pub const ENV_MODEL: &str = "SWITCHYARD_MODEL";
pub const ENV_FORCE_CLOUD: &str = "SWITCHYARD_FORCE_CLOUD";
pub const ENV_IDLE_THRESHOLD: &str = "SWITCHYARD_IDLE_THRESHOLD_SECS";
pub const ENV_MAINTENANCE_INTERVAL: &str = "SWITCHYARD_MAINTENANCE_INTERVAL_SECS";
pub const ENV_HISTORY_MAX_MESSAGES: &str = "SWITCHYARD_HISTORY_MAX_MESSAGES";
pub const ENV_HISTORY_MAX_CHARS: &str = "SWITCHYARD_HISTORY_MAX_CHARS";
pub const ENV_TIMEOUT: &str = "SWITCHYARD_TIMEOUT";

/// Check if an environment variable is set to a truthy value.
#[must_use]
pub fn is_env_truthy(var: &str) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_string(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(var: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    env_string(var)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| SwitchyardError::ConfigInvalid {
                key: var.to_string(),
                value: raw.clone(),
                message: e.to_string(),
            })
        })
        .transpose()
}

// =============================================================================
// Config File
// =============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub local: LocalConfig,
    pub cloud: CloudConfig,
    pub routing: RoutingConfig,
    pub history: HistoryConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Completion request timeout in seconds.
    pub timeout_seconds: u64,
    /// Default log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
}

/// Local inference server and resource manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub base_url: String,
    pub preferred_model: Option<String>,
    /// Largest model allowed to load; 0 disables the ceiling.
    pub ram_budget_gb: f64,
    pub safety_buffer_gb: f64,
    pub default_model_size_gb: f64,
    pub idle_threshold_secs: u64,
    pub maintenance_interval_secs: u64,
    pub unload_cooldown_ms: u64,
    pub eviction_cooldown_ms: u64,
    pub load_ttl_secs: u64,
}

/// Cloud providers and model chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub primary_base_url: String,
    pub free_key: Option<String>,
    pub paid_key: Option<String>,
    pub secondary_base_url: Option<String>,
    pub secondary_key: Option<String>,
    pub secondary_model: Option<String>,
    /// Cheapest/fastest models first.
    pub tier1: Vec<String>,
    pub tier2: Vec<String>,
    pub tier3: Vec<String>,
    pub default_model: String,
    pub vision_model: Option<String>,
    /// Verify chain candidates with a 1-token call before use.
    pub verify_models: bool,
}

/// Routing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Model override; `auto` lets the router decide.
    pub model: String,
    pub force_cloud: bool,
    /// Extra semantic error patterns, checked after the built-in table.
    pub semantic_patterns: Vec<SemanticPattern>,
}

/// Conversation history bounds and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_messages: usize,
    pub max_chars: usize,
    pub ttl_secs: u64,
    /// Mirror windows to disk so they survive restarts.
    pub persist: bool,
    pub system_prompt: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            log_level: None,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        let defaults = LocalSettings::default();
        Self {
            base_url: defaults.base_url,
            preferred_model: None,
            ram_budget_gb: defaults.ram_budget_gb,
            safety_buffer_gb: defaults.safety_buffer_gb,
            default_model_size_gb: defaults.default_model_size_gb,
            idle_threshold_secs: defaults.idle_threshold.as_secs(),
            maintenance_interval_secs: defaults.maintenance_interval.as_secs(),
            unload_cooldown_ms: duration_ms(defaults.unload_cooldown),
            eviction_cooldown_ms: duration_ms(defaults.eviction_cooldown),
            load_ttl_secs: defaults.load_ttl_secs,
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            primary_base_url: GatewaySettings::default().primary_base_url,
            free_key: None,
            paid_key: None,
            secondary_base_url: None,
            secondary_key: None,
            secondary_model: None,
            tier1: Vec::new(),
            tier2: Vec::new(),
            tier3: Vec::new(),
            default_model: DEFAULT_CLOUD_MODEL.to_string(),
            vision_model: None,
            verify_models: false,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            model: "auto".to_string(),
            force_cloud: false,
            semantic_patterns: Vec::new(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_chars: DEFAULT_MAX_CHARS,
            ttl_secs: DEFAULT_WINDOW_TTL_SECS,
            persist: true,
            system_prompt: None,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Load configuration from the default config file path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error only if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error only if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SwitchyardError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load the file (honoring `SWITCHYARD_CONFIG`), apply env overrides, validate.
    ///
    /// # Errors
    ///
    /// Returns error if the file is invalid, an env value does not parse, or
    /// validation fails.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with(None)
    }

    /// Like [`Config::resolve`], with an explicit file path that beats
    /// `SWITCHYARD_CONFIG`.
    ///
    /// # Errors
    ///
    /// Same as [`Config::resolve`].
    pub fn resolve_with(path: Option<&Path>) -> Result<Self> {
        let mut config = match (path, env_string(ENV_CONFIG)) {
            (Some(path), _) => Self::load_from(path)?,
            (None, Some(path)) => Self::load_from(Path::new(&path))?,
            (None, None) => Self::load()?,
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `SWITCHYARD_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` when a numeric variable does not parse.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_string(ENV_LOCAL_URL) {
            self.local.base_url = url;
        }
        if let Some(model) = env_string(ENV_PREFERRED_MODEL) {
            self.local.preferred_model = Some(model);
        }
        if let Some(budget) = env_parse(ENV_RAM_BUDGET)? {
            self.local.ram_budget_gb = budget;
        }
        if let Some(secs) = env_parse(ENV_IDLE_THRESHOLD)? {
            self.local.idle_threshold_secs = secs;
        }
        if let Some(secs) = env_parse(ENV_MAINTENANCE_INTERVAL)? {
            self.local.maintenance_interval_secs = secs;
        }
        if let Some(key) = env_string(ENV_FREE_KEY) {
            self.cloud.free_key = Some(key);
        }
        if let Some(key) = env_string(ENV_PAID_KEY) {
            self.cloud.paid_key = Some(key);
        }
        if let Some(key) = env_string(ENV_SECONDARY_KEY) {
            self.cloud.secondary_key = Some(key);
        }
        if let Some(model) = env_string(ENV_MODEL) {
            self.routing.model = model;
        }
        if is_env_truthy(ENV_FORCE_CLOUD) {
            self.routing.force_cloud = true;
        }
        if let Some(max) = env_parse(ENV_HISTORY_MAX_MESSAGES)? {
            self.history.max_messages = max;
        }
        if let Some(max) = env_parse(ENV_HISTORY_MAX_CHARS)? {
            self.history.max_chars = max;
        }
        if let Some(secs) = env_parse(ENV_TIMEOUT)? {
            self.general.timeout_seconds = secs;
        }
        Ok(())
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SwitchyardError::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)?;
        tracing::debug!(?path, "Config file saved");
        Ok(())
    }

    /// Get the config file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        AppPaths::new().config_file()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, value: impl ToString, message: &str) -> SwitchyardError {
            SwitchyardError::ConfigInvalid {
                key: key.to_string(),
                value: value.to_string(),
                message: message.to_string(),
            }
        }

        if self.general.timeout_seconds == 0 || self.general.timeout_seconds > 300 {
            return Err(invalid(
                "general.timeout_seconds",
                self.general.timeout_seconds,
                "must be between 1 and 300 seconds",
            ));
        }
        for (key, url) in [
            ("local.base_url", Some(&self.local.base_url)),
            ("cloud.primary_base_url", Some(&self.cloud.primary_base_url)),
            ("cloud.secondary_base_url", self.cloud.secondary_base_url.as_ref()),
        ] {
            if let Some(url) = url
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                return Err(invalid(key, url, "must be an http(s) URL"));
            }
        }
        if self.local.ram_budget_gb.is_nan() || self.local.ram_budget_gb < 0.0 {
            return Err(invalid("local.ram_budget_gb", self.local.ram_budget_gb, "must be >= 0"));
        }
        if self.local.safety_buffer_gb.is_nan() || self.local.safety_buffer_gb < 0.0 {
            return Err(invalid("local.safety_buffer_gb", self.local.safety_buffer_gb, "must be >= 0"));
        }
        if self.local.default_model_size_gb.is_nan() || self.local.default_model_size_gb <= 0.0 {
            return Err(invalid(
                "local.default_model_size_gb",
                self.local.default_model_size_gb,
                "must be > 0",
            ));
        }
        if self.local.maintenance_interval_secs == 0 {
            return Err(invalid("local.maintenance_interval_secs", 0, "must be > 0"));
        }
        if self.history.max_messages < 2 {
            return Err(invalid(
                "history.max_messages",
                self.history.max_messages,
                "must keep at least one exchange",
            ));
        }
        if self.history.max_chars == 0 {
            return Err(invalid("history.max_chars", 0, "must be > 0"));
        }
        if self.cloud.secondary_key.is_some()
            && (self.cloud.secondary_base_url.is_none() || self.cloud.secondary_model.is_none())
        {
            return Err(invalid(
                "cloud.secondary_key",
                "<set>",
                "secondary_base_url and secondary_model are required with a secondary key",
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Component settings
    // =========================================================================

    #[must_use]
    pub fn local_settings(&self) -> LocalSettings {
        LocalSettings {
            base_url: self.local.base_url.clone(),
            preferred_model: self.local.preferred_model.clone(),
            ram_budget_gb: self.local.ram_budget_gb,
            safety_buffer_gb: self.local.safety_buffer_gb,
            default_model_size_gb: self.local.default_model_size_gb,
            idle_threshold: Duration::from_secs(self.local.idle_threshold_secs),
            maintenance_interval: Duration::from_secs(self.local.maintenance_interval_secs),
            unload_cooldown: Duration::from_millis(self.local.unload_cooldown_ms),
            eviction_cooldown: Duration::from_millis(self.local.eviction_cooldown_ms),
            load_ttl_secs: self.local.load_ttl_secs,
        }
    }

    #[must_use]
    pub fn gateway_settings(&self, state_path: Option<PathBuf>) -> GatewaySettings {
        let secondary = match (&self.cloud.secondary_base_url, &self.cloud.secondary_model) {
            (Some(base_url), Some(model)) => Some(SecondaryProvider {
                base_url: base_url.clone(),
                key: self.cloud.secondary_key.clone(),
                model: model.clone(),
            }),
            _ => None,
        };
        GatewaySettings {
            primary_base_url: self.cloud.primary_base_url.clone(),
            free_key: self.cloud.free_key.clone(),
            paid_key: self.cloud.paid_key.clone(),
            secondary,
            chain: fallback_chain(
                &self.cloud.tier1,
                &self.cloud.tier2,
                &self.cloud.tier3,
                &self.cloud.default_model,
            ),
            configured_model: Some(self.routing.model.clone()),
            default_model: self.cloud.default_model.clone(),
            vision_model: self.cloud.vision_model.clone(),
            verify_models: self.cloud.verify_models,
            state_path,
        }
    }

    #[must_use]
    pub const fn window_limits(&self) -> WindowLimits {
        WindowLimits {
            max_messages: self.history.max_messages,
            max_chars: self.history.max_chars,
        }
    }

    /// Built-in patterns followed by configured extras.
    #[must_use]
    pub fn semantic_table(&self) -> SemanticTable {
        let mut table = SemanticTable::default();
        for pattern in &self.routing.semantic_patterns {
            table.push(SemanticPattern::new(&pattern.needle, pattern.kind));
        }
        table
    }
}
