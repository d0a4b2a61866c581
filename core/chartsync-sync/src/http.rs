//! HTTP implementation of [`RemoteTransport`].
//!
//! Talks to a small REST surface:
//!
//! | Operation | Request |
//! |---|---|
//! | pull | `GET {base}/tables/{table}/records` |
//! | push batch | `POST {base}/tables/{table}/records/batch` with `{"records": [...]}` |
//! | upsert one | `PUT {base}/tables/{table}/records/{id}` |
//! | health | `GET {base}/health` |
//!
//! Response bodies follow the transport contract (`{success, data?, error?}`
//! and `{healthy, provider?}`).

use crate::error::{SyncError, SyncResult};
use crate::transport::{HealthStatus, PullResponse, PushResponse, RemoteTransport, WireRecord};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the remote API (e.g. `https://records.example.org/api`).
    pub base_url: String,
    /// Bearer token sent with every request.
    pub api_token: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            api_token: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Serialize)]
struct BatchBody<'a> {
    records: &'a [WireRecord],
}

/// Remote transport over HTTP.
pub struct HttpTransport {
    config: RemoteConfig,
    base: Url,
    client: Client,
}

impl HttpTransport {
    /// Creates a transport. Fails if the base URL cannot be parsed or the
    /// HTTP client cannot be built.
    pub fn new(config: RemoteConfig) -> SyncResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| SyncError::Config(format!("invalid base_url {}: {e}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "base_url cannot be a base: {}",
                config.base_url
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            base,
            client,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Reads an error message out of a non-2xx response.
    async fn failure_message(response: Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        if detail.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {detail}")
        }
    }

    async fn send_write(&self, request: RequestBuilder, what: &str) -> PushResponse {
        let response = match self.authorize(request).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("{} failed: {}", what, e);
                return PushResponse::failed(e.to_string());
            }
        };
        if !response.status().is_success() {
            return PushResponse::failed(Self::failure_message(response).await);
        }
        match response.json::<PushResponse>().await {
            Ok(body) => body,
            Err(e) => PushResponse::failed(format!("invalid response body: {e}")),
        }
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn pull(&self, table: &str) -> PullResponse {
        let url = self.url(&["tables", table, "records"]);
        debug!("GET {}", url);
        let response = match self.authorize(self.client.get(url)).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Pull of {} failed: {}", table, e);
                return PullResponse::failed(e.to_string());
            }
        };
        if !response.status().is_success() {
            return PullResponse::failed(Self::failure_message(response).await);
        }
        match response.json::<PullResponse>().await {
            Ok(body) => body,
            Err(e) => PullResponse::failed(format!("invalid response body: {e}")),
        }
    }

    async fn push_batch(&self, table: &str, records: &[WireRecord]) -> PushResponse {
        let url = self.url(&["tables", table, "records", "batch"]);
        debug!("POST {} ({} records)", url, records.len());
        let request = self.client.post(url).json(&BatchBody { records });
        self.send_write(request, &format!("Batch push to {table}")).await
    }

    async fn upsert_one(&self, table: &str, record: &WireRecord) -> PushResponse {
        let Some(id) = record.get("id").and_then(|v| v.as_str()) else {
            return PushResponse::failed("record has no string id");
        };
        let url = self.url(&["tables", table, "records", id]);
        debug!("PUT {}", url);
        let request = self.client.put(url).json(record);
        self.send_write(request, &format!("Upsert to {table}")).await
    }

    async fn health_check(&self) -> HealthStatus {
        let url = self.url(&["health"]);
        let response = match self.authorize(self.client.get(url)).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("Health check returned {}", r.status());
                return HealthStatus::default();
            }
            Err(e) => {
                debug!("Health check failed: {}", e);
                return HealthStatus::default();
            }
        };
        response.json::<HealthStatus>().await.unwrap_or_default()
    }
}
