//! Test utilities for switchyard.
//!
//! Factories for descriptors, wire payloads and configs, a fixed memory probe,
//! temporary directories, and assertion macros shared by unit and
//! integration tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use switchyard::test_utils::*;
//!
//! let config = make_test_config("http://127.0.0.1:1234", "http://127.0.0.1:5678");
//! let engine = make_test_engine(config, 64.0);
//! ```

use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};

use crate::core::engine::{Engine, EngineOptions};
use crate::core::memory::MemoryProbe;
use crate::core::models::{ModelDescriptor, ModelKind};
use crate::core::usage::MemoryLedger;
use crate::storage::config::Config;
use crate::storage::store::{MemoryWindowStore, WindowStore};

// =============================================================================
// Memory Probe
// =============================================================================

/// Memory probe with a settable reading.
#[derive(Debug)]
pub struct FixedMemory {
    /// Available GB, stored as bits of an `f64`.
    available_bits: AtomicU64,
    total_gb: Option<f64>,
}

impl FixedMemory {
    #[must_use]
    pub const fn new(available_gb: f64) -> Self {
        Self {
            available_bits: AtomicU64::new(available_gb.to_bits()),
            total_gb: None,
        }
    }

    #[must_use]
    pub fn with_total(mut self, total_gb: f64) -> Self {
        self.total_gb = Some(total_gb);
        self
    }

    pub fn set_available(&self, available_gb: f64) {
        self.available_bits.store(available_gb.to_bits(), Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemory {
    fn available_gb(&self) -> f64 {
        f64::from_bits(self.available_bits.load(Ordering::SeqCst))
    }

    fn total_gb(&self) -> Option<f64> {
        self.total_gb
    }
}

// =============================================================================
// Test Data Factories
// =============================================================================

/// Local text model with the given size.
#[must_use]
pub fn make_test_local_model(id: &str, size_gb: f64) -> ModelDescriptor {
    ModelDescriptor::new(id, ModelKind::LocalText).with_size_gb(size_gb)
}

/// Local vision model with the given size.
#[must_use]
pub fn make_test_vision_model(id: &str, size_gb: f64) -> ModelDescriptor {
    ModelDescriptor::new(id, ModelKind::LocalVision)
        .with_size_gb(size_gb)
        .with_vision(true)
}

#[must_use]
pub fn make_test_cloud_model(id: &str) -> ModelDescriptor {
    ModelDescriptor::new(id, ModelKind::CloudPrimary)
}

/// Native local listing (`/api/v1/models`). `loaded` ids report one
/// instance each, named `<id>:1`.
#[must_use]
pub fn make_test_native_listing(models: &[(&str, u64)], loaded: &[&str]) -> Value {
    let entries: Vec<Value> = models
        .iter()
        .map(|(id, size_bytes)| {
            let instances: Vec<Value> = if loaded.contains(id) {
                vec![json!({"id": format!("{id}:1")})]
            } else {
                Vec::new()
            };
            json!({
                "type": "llm",
                "key": id,
                "display_name": id,
                "size_bytes": size_bytes,
                "max_context_length": 8192,
                "loaded_instances": instances,
            })
        })
        .collect();
    json!({ "models": entries })
}

/// Legacy OpenAI-style listing (`/v1/models`).
#[must_use]
pub fn make_test_legacy_listing(ids: &[&str]) -> Value {
    let data: Vec<Value> = ids.iter().map(|id| json!({"id": id, "object": "model"})).collect();
    json!({ "object": "list", "data": data })
}

/// Cloud listing with the `models/` prefix the primary provider uses.
#[must_use]
pub fn make_test_cloud_listing(ids: &[&str]) -> Value {
    let data: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": format!("models/{id}"), "object": "model"}))
        .collect();
    json!({ "object": "list", "data": data })
}

/// Non-streaming chat completion body.
#[must_use]
pub fn make_test_chat_response(text: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15},
    })
}

/// Streaming chat completion body, one delta per word.
#[must_use]
pub fn make_test_sse_body(text: &str) -> String {
    let mut body = String::new();
    let words: Vec<&str> = text.split_inclusive(' ').collect();
    for word in words {
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": word}}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Config pointed at mock servers: no cooldowns, explicit cloud model,
/// both primary keys set, no persistence.
#[must_use]
pub fn make_test_config(local_url: &str, cloud_url: &str) -> Config {
    let mut config = Config::default();
    config.local.base_url = local_url.to_string();
    config.local.unload_cooldown_ms = 0;
    config.local.eviction_cooldown_ms = 0;
    config.local.safety_buffer_gb = 1.0;
    config.cloud.primary_base_url = cloud_url.to_string();
    config.cloud.free_key = Some("free-key".to_string());
    config.cloud.paid_key = Some("paid-key".to_string());
    config.cloud.default_model = "cloud-model".to_string();
    config.history.persist = false;
    config
}

/// Engine over in-memory storage with a fixed memory reading.
///
/// # Panics
///
/// Panics if the engine cannot be built.
#[must_use]
pub fn make_test_engine(config: Config, available_gb: f64) -> Engine {
    make_test_engine_with(config, Arc::new(FixedMemory::new(available_gb)), None).0
}

/// Engine with explicit memory and store; returns the ledger for assertions.
///
/// # Panics
///
/// Panics if the engine cannot be built.
#[must_use]
pub fn make_test_engine_with(
    config: Config,
    memory: Arc<dyn MemoryProbe>,
    store: Option<Arc<dyn WindowStore>>,
) -> (Engine, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let store: Arc<dyn WindowStore> = match store {
        Some(store) => store,
        None => Arc::new(MemoryWindowStore::new(std::time::Duration::from_secs(
            config.history.ttl_secs,
        ))),
    };
    let options = EngineOptions::in_memory(&config)
        .with_memory(memory)
        .with_store(store)
        .with_ledger(ledger.clone());
    let engine = Engine::new(config, options).expect("Failed to build test engine");
    (engine, ledger)
}

/// Sample config file content.
#[must_use]
pub fn make_test_config_toml() -> String {
    r#"[general]
timeout_seconds = 60
log_level = "info"

[local]
base_url = "http://localhost:1234"
preferred_model = "qwen"
ram_budget_gb = 24.0

[cloud]
free_key = "free-key"
tier1 = ["gemini-2.0-flash-lite"]
tier2 = ["gemini-2.0-flash"]

[routing]
model = "auto"

[history]
max_messages = 10
"#
    .to_string()
}

// =============================================================================
// Temporary Directories
// =============================================================================

/// A temporary directory removed on drop.
///
/// ```rust,ignore
/// use switchyard::test_utils::TestDir;
///
/// let dir = TestDir::new();
/// dir.create_file("config.toml", "[general]\ntimeout_seconds = 30");
/// assert!(dir.file_exists("config.toml"));
/// ```
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file, creating parent directories as needed.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.inner.path().join(name))
    }

    #[must_use]
    pub fn file_exists(&self, name: &str) -> bool {
        self.inner.path().join(name).exists()
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertions
// =============================================================================

/// Assert that a string contains a substring.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        assert!(
            $haystack.contains($needle),
            "Expected string to contain {:?}\nActual: {:?}",
            $needle,
            $haystack
        );
    };
}

/// Assert that a string does not contain a substring.
#[macro_export]
macro_rules! assert_not_contains {
    ($haystack:expr, $needle:expr) => {
        assert!(
            !$haystack.contains($needle),
            "Expected string NOT to contain {:?}\nActual: {:?}",
            $needle,
            $haystack
        );
    };
}

/// Check if a string contains ANSI escape sequences.
#[must_use]
pub fn has_ansi_codes(text: &str) -> bool {
    text.contains('\x1b')
}

/// Strip ANSI escape codes from a string.
#[must_use]
pub fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                while let Some(&next) = chars.peek() {
                    chars.next();
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else {
            result.push(c);
        }
    }

    result
}
