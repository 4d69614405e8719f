//! HTTP client utilities.
//!
//! Provides client construction, JSON helpers, and timeouts shared by every
//! component that talks to an inference backend.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::error::{Result, SwitchyardError};

/// Default timeout for generic HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for catalog discovery.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for model load requests (large models take minutes).
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Timeout for credential/model verification calls.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for a streamed completion.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for health probes; kept short so interactive commands never stall.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Status codes the local server uses for a successful lifecycle call.
pub const LIFECYCLE_SUCCESS: [u16; 4] = [200, 201, 202, 204];

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("switchyard/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SwitchyardError::Network {
            provider: "http".to_string(),
            message: e.to_string(),
        })
}

/// Get a client with the default timeout.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn default_client() -> Result<Client> {
    build_client(DEFAULT_TIMEOUT)
}

/// Join a base URL and a path without doubling slashes.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Attach a bearer credential when one is given.
fn with_key(builder: RequestBuilder, key: Option<&str>) -> RequestBuilder {
    match key {
        Some(key) if !key.is_empty() => builder.bearer_auth(key),
        _ => builder,
    }
}

/// Raw status + body of a response, for callers that inspect both.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    /// Whether the status is one of the lifecycle success codes.
    #[must_use]
    pub fn is_lifecycle_success(&self) -> bool {
        LIFECYCLE_SUCCESS.contains(&self.status)
    }
}

/// Fetch JSON from a URL.
///
/// # Errors
///
/// Returns a typed error on transport failure, non-success status, or JSON
/// parse failure.
pub async fn fetch_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    key: Option<&str>,
    provider: &str,
    timeout: Duration,
) -> Result<T> {
    let response = with_key(client.get(url).timeout(timeout), key)
        .send()
        .await
        .map_err(|e| SwitchyardError::from_transport(provider, &e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SwitchyardError::from_status(
            provider,
            status.as_u16(),
            &body,
            timeout,
        ));
    }

    response
        .json()
        .await
        .map_err(|e| SwitchyardError::ParseResponse(e.to_string()))
}

/// GET a URL and return status + body without judging either.
///
/// # Errors
///
/// Returns error only on transport failure.
pub async fn get_raw(
    client: &Client,
    url: &str,
    key: Option<&str>,
    provider: &str,
    timeout: Duration,
) -> Result<RawResponse> {
    let response = with_key(client.get(url).timeout(timeout), key)
        .send()
        .await
        .map_err(|e| SwitchyardError::from_transport(provider, &e, timeout))?;

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Ok(RawResponse { status, body })
}

/// POST a JSON body and return status + body without judging either.
///
/// # Errors
///
/// Returns error only on transport failure.
pub async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &B,
    key: Option<&str>,
    provider: &str,
    timeout: Duration,
) -> Result<RawResponse> {
    let response = with_key(client.post(url).timeout(timeout).json(body), key)
        .send()
        .await
        .map_err(|e| SwitchyardError::from_transport(provider, &e, timeout))?;

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Ok(RawResponse { status, body })
}

/// Short, non-reversible fingerprint of an API key for logs.
#[must_use]
pub fn key_fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let hex = hex::encode(digest);
    format!("sha256:{}", &hex[..12])
}
