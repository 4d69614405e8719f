//! Backend reachability probes.
//!
//! Cheap GETs against each backend's listing endpoint with a short timeout so
//! interactive commands never stall on a dead backend.

use std::time::Instant;

use reqwest::Client;
use serde::Serialize;

use super::catalog::LOCAL_LIST_PATHS;
use super::http::{self, HEALTH_TIMEOUT};
use super::models::{Backend, CloudProvider};
use crate::error::Result;

/// Outcome of one probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub backend: Backend,
    pub reachable: bool,
    pub latency_ms: u64,
    /// HTTP status or transport error summary.
    pub detail: String,
}

/// A cloud endpoint to probe.
#[derive(Debug, Clone)]
pub struct CloudEndpoint {
    pub provider: CloudProvider,
    pub base_url: String,
    pub key: Option<String>,
}

/// Probes for the local server and each configured cloud provider.
#[derive(Debug, Clone)]
pub struct HealthProbes {
    client: Client,
    local_base_url: String,
    cloud: Vec<CloudEndpoint>,
}

impl HealthProbes {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(local_base_url: impl Into<String>, cloud: Vec<CloudEndpoint>) -> Result<Self> {
        Ok(Self {
            client: http::build_client(HEALTH_TIMEOUT)?,
            local_base_url: local_base_url.into(),
            cloud,
        })
    }

    /// Whether the local server answers any listing shape with a 2xx.
    pub async fn local_reachable(&self) -> bool {
        self.probe_local().await.reachable
    }

    pub async fn probe_local(&self) -> HealthReport {
        let started = Instant::now();
        let mut detail = String::from("no response");
        for path in LOCAL_LIST_PATHS {
            let url = http::join_url(&self.local_base_url, path);
            match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return report(Backend::Local, true, started, format!("HTTP {}", resp.status().as_u16()));
                }
                Ok(resp) => detail = format!("HTTP {}", resp.status().as_u16()),
                Err(e) => detail = transport_detail(&e),
            }
        }
        tracing::debug!(base_url = %self.local_base_url, %detail, "Local server unreachable");
        report(Backend::Local, false, started, detail)
    }

    /// Probe one cloud endpoint.
    ///
    /// Any HTTP answer below 500 counts as reachable; credential problems are
    /// the gateway's concern.
    pub async fn probe_cloud(&self, endpoint: &CloudEndpoint) -> HealthReport {
        let backend = Backend::Cloud(endpoint.provider);
        let started = Instant::now();
        let url = http::join_url(&endpoint.base_url, "/models");
        let mut request = self.client.get(&url).timeout(HEALTH_TIMEOUT);
        if let Some(key) = endpoint.key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                report(backend, status < 500, started, format!("HTTP {status}"))
            }
            Err(e) => report(backend, false, started, transport_detail(&e)),
        }
    }

    /// Probe every backend concurrently, local first in the result.
    pub async fn probe_all(&self) -> Vec<HealthReport> {
        let cloud = futures::future::join_all(self.cloud.iter().map(|e| self.probe_cloud(e)));
        let (local, cloud) = tokio::join!(self.probe_local(), cloud);
        let mut reports = vec![local];
        reports.extend(cloud);
        reports
    }
}

fn transport_detail(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "timeout".to_string()
    } else if err.is_connect() {
        "connection refused".to_string()
    } else {
        "network error".to_string()
    }
}

fn report(backend: Backend, reachable: bool, started: Instant, detail: String) -> HealthReport {
    HealthReport {
        backend,
        reachable,
        latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        detail,
    }
}
