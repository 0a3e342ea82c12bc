use super::{Connectivity, Delivery, DeliveryError, DeliverySnapshot, DeliveryStats, UploadReceipt};
use crate::domain::Event;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

/// Longest error body echoed into a `DeliveryError` message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub connection_timeout: Duration,
    pub probe_timeout: Duration,
    pub health_path: String,
    pub extra_headers: BTreeMap<String, String>,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9700".to_string(),
            request_timeout: Duration::from_millis(10_000),
            connection_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
            health_path: "health".to_string(),
            extra_headers: BTreeMap::new(),
            max_connections: 4,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("event-relay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CollectorResponse {
    #[serde(default)]
    message: Option<String>,
}

/// `reqwest` transport posting JSON arrays of events to `{base_url}/{endpoint}`.
#[derive(Debug, Clone)]
pub struct HttpDelivery {
    client: Client,
    config: DeliveryConfig,
    base_url: Url,
    stats: Arc<DeliveryStats>,
}

impl HttpDelivery {
    pub fn new(config: DeliveryConfig) -> Result<Self, DeliveryError> {
        let mut base_url: Url = config.base_url.parse().map_err(|e| {
            DeliveryError::InvalidConfiguration(format!("Invalid base URL '{}': {}", config.base_url, e))
        })?;

        // Url::join replaces the last path segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = ClientBuilder::new()
            .default_headers(Self::build_default_headers(&config)?)
            .timeout(config.request_timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .build()
            .map_err(|e| {
                DeliveryError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            base_url,
            stats: Arc::new(DeliveryStats::new()),
        })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, DeliveryError> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| DeliveryError::InvalidConfiguration(format!("Invalid endpoint '{endpoint}': {e}")))
    }

    fn build_default_headers(config: &DeliveryConfig) -> Result<HeaderMap, DeliveryError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(|e| {
                DeliveryError::InvalidConfiguration(format!("Invalid user agent: {e}"))
            })?,
        );
        headers.insert(
            HeaderName::from_static("x-relay-version"),
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );

        for (name, value) in &config.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                DeliveryError::InvalidConfiguration(format!("Invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                DeliveryError::InvalidConfiguration(format!("Invalid value for header '{name}': {e}"))
            })?;
            headers.insert(name, value);
        }

        Ok(headers)
    }

    fn batch_headers(events: &[Event]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(HeaderName::from_static("x-batch-size"), HeaderValue::from(events.len()));

        // Lets the collector de-duplicate redelivered batches
        if let (Some(first), Some(last)) = (events.first(), events.last())
            && let Ok(value) = HeaderValue::from_str(&format!("{}-{}", first.sequence(), last.sequence()))
        {
            headers.insert(HeaderName::from_static("x-batch-sequence"), value);
        }

        headers
    }

    async fn exchange(&self, url: Url, body: Vec<u8>, headers: HeaderMap) -> Result<(StatusCode, String), reqwest::Error> {
        let response = self.client.post(url).headers(headers).body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }

    fn classify(status: StatusCode, body: &str) -> Result<Option<String>, DeliveryError> {
        let message = serde_json::from_str::<CollectorResponse>(body)
            .ok()
            .and_then(|response| response.message);

        if status.is_success() {
            return Ok(message);
        }

        let message = message.unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("no response body").to_string()
            } else {
                trimmed.chars().take(MAX_ERROR_BODY).collect()
            }
        });

        if status.is_client_error() {
            Err(DeliveryError::Client {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(DeliveryError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }

    fn classify_transport(&self, error: &reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::Timeout(self.config.request_timeout)
        } else {
            DeliveryError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl Delivery for HttpDelivery {
    async fn upload(&self, endpoint: &str, events: &[Event]) -> Result<UploadReceipt, DeliveryError> {
        let start = Instant::now();
        let url = self.endpoint_url(endpoint)?;
        let body = serde_json::to_vec(events)?;
        let bytes_sent = body.len();

        debug!("Uploading {} events ({} bytes) to {}", events.len(), bytes_sent, url);

        let outcome = match timeout(
            self.config.request_timeout,
            self.exchange(url, body, Self::batch_headers(events)),
        )
        .await
        {
            Err(_) => Err(DeliveryError::Timeout(self.config.request_timeout)),
            Ok(Err(e)) => Err(self.classify_transport(&e)),
            Ok(Ok((status, text))) => Self::classify(status, &text).map(|message| UploadReceipt {
                success: true,
                status_code: status.as_u16(),
                message,
                bytes_sent,
                latency: start.elapsed(),
            }),
        };

        match &outcome {
            Ok(receipt) => {
                self.stats.record_success(bytes_sent, receipt.latency);
                info!(
                    "Delivered {} events ({} bytes) in {:?}",
                    events.len(),
                    bytes_sent,
                    receipt.latency
                );
            }
            Err(e) => {
                self.stats.record_failure(e, start.elapsed());
                warn!("Upload of {} events failed: {}", events.len(), e);
            }
        }

        outcome
    }

    async fn check_connectivity(&self) -> Connectivity {
        let Ok(url) = self.endpoint_url(&self.config.health_path) else {
            return Connectivity::unknown();
        };

        match timeout(self.config.probe_timeout, self.client.get(url).send()).await {
            Ok(Ok(_)) => Connectivity::online(),
            Ok(Err(e)) if e.is_connect() => {
                debug!("Collector unreachable: {}", e);
                Connectivity::offline()
            }
            Ok(Err(e)) => {
                debug!("Connectivity probe failed: {}", e);
                Connectivity::unknown()
            }
            Err(_) => Connectivity::unknown(),
        }
    }

    fn stats(&self) -> DeliverySnapshot {
        self.stats.snapshot()
    }
}
