//! Mock local and cloud servers for integration tests.

use serde_json::{Value, json};
use switchyard::storage::config::Config;
use switchyard::test_utils::{make_test_chat_response, make_test_config, make_test_native_listing, make_test_sse_body};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const FREE_KEY: &str = "free-key";
pub const PAID_KEY: &str = "paid-key";
pub const SECONDARY_KEY: &str = "secondary-key";
pub const SECONDARY_MODEL: &str = "secondary-model";

/// One mock server per backend.
pub struct MockBackends {
    pub local: MockServer,
    pub cloud: MockServer,
    pub secondary: MockServer,
}

impl MockBackends {
    pub async fn start() -> Self {
        Self {
            local: MockServer::start().await,
            cloud: MockServer::start().await,
            secondary: MockServer::start().await,
        }
    }

    /// Config pointed at the local and primary mocks; no secondary provider.
    pub fn config(&self) -> Config {
        make_test_config(&self.local.uri(), &self.cloud.uri())
    }

    /// [`config`](Self::config) plus the secondary provider.
    pub fn config_with_secondary(&self) -> Config {
        let mut config = self.config();
        config.cloud.secondary_base_url = Some(self.secondary.uri());
        config.cloud.secondary_key = Some(SECONDARY_KEY.to_string());
        config.cloud.secondary_model = Some(SECONDARY_MODEL.to_string());
        config
    }

    // =========================================================================
    // Local server
    // =========================================================================

    /// Native listing of `(id, size_bytes)` models, `loaded` ids resident.
    pub async fn mount_local_listing(&self, models: &[(&str, u64)], loaded: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(make_test_native_listing(models, loaded)))
            .mount(&self.local)
            .await;
    }

    /// Native listing route answered the way older servers do: 200 with an
    /// `error` body.
    pub async fn mount_native_listing_unsupported(&self) {
        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"error": "Unexpected endpoint or method. (GET /api/v1/models)"}),
            ))
            .mount(&self.local)
            .await;
    }

    /// OpenAI-style `/v1/models` listing of `ids`.
    pub async fn mount_legacy_listing(&self, ids: &[&str]) {
        let data: Vec<Value> = ids.iter().map(|id| json!({"id": id, "object": "model"})).collect();
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "list", "data": data})))
            .mount(&self.local)
            .await;
    }

    pub async fn mount_load_ok(&self) {
        Mock::given(method("POST"))
            .and(path("/api/v1/models/load"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "loaded"})))
            .mount(&self.local)
            .await;
    }

    /// Load endpoints that answer 200 but report an error in the body.
    pub async fn mount_load_false_success(&self) {
        for load_path in ["/api/v1/models/load", "/v1/models/load"] {
            Mock::given(method("POST"))
                .and(path(load_path))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "model not found"})))
                .mount(&self.local)
                .await;
        }
    }

    pub async fn mount_unload_ok(&self) {
        Mock::given(method("POST"))
            .and(path("/api/v1/models/unload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "unloaded"})))
            .mount(&self.local)
            .await;
    }

    /// Unload endpoints that answer 200 but report an error in the body.
    pub async fn mount_unload_false_success(&self) {
        for unload_path in ["/api/v1/models/unload", "/v1/models/unload"] {
            Mock::given(method("POST"))
                .and(path(unload_path))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "instance not found"})))
                .mount(&self.local)
                .await;
        }
    }

    /// Listing, load and unload, all succeeding.
    pub async fn mount_local_ready(&self, models: &[(&str, u64)]) {
        self.mount_local_listing(models, &[]).await;
        self.mount_load_ok().await;
        self.mount_unload_ok().await;
    }

    pub async fn mount_local_chat(&self, text: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(make_test_chat_response(text)))
            .mount(&self.local)
            .await;
    }

    /// Local chat answering `text` for the first `times` requests only.
    pub async fn mount_local_chat_times(&self, text: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(make_test_chat_response(text)))
            .up_to_n_times(times)
            .mount(&self.local)
            .await;
    }

    // =========================================================================
    // Cloud servers
    // =========================================================================

    /// Primary chat for requests authenticated with `key`, streamed as SSE.
    pub async fn mount_cloud_chat(&self, key: &str, text: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", format!("Bearer {key}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw(make_test_sse_body(text), "text/event-stream"))
            .mount(&self.cloud)
            .await;
    }

    /// Primary chat for `key` failing with `status`.
    pub async fn mount_cloud_status(&self, key: &str, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", format!("Bearer {key}").as_str()))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.cloud)
            .await;
    }

    pub async fn mount_secondary_chat(&self, text: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(make_test_chat_response(text)))
            .mount(&self.secondary)
            .await;
    }
}

// =============================================================================
// Request inspection
// =============================================================================

/// Requests `server` received matching `verb` and `route`.
pub async fn requests_to(server: &MockServer, verb: &str, route: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == verb && r.url.path() == route)
        .collect()
}

pub async fn count_requests(server: &MockServer, verb: &str, route: &str) -> usize {
    requests_to(server, verb, route).await.len()
}

pub async fn total_requests(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

/// JSON bodies of the requests `server` received on `route`.
pub async fn bodies_to(server: &MockServer, route: &str) -> Vec<Value> {
    requests_to(server, "POST", route)
        .await
        .iter()
        .filter_map(|r| serde_json::from_slice(&r.body).ok())
        .collect()
}

/// Sizes used across tests.
pub const GB: u64 = 1_073_741_824;
