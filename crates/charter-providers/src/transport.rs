//! Outbound HTTP transport to partner APIs
//!
//! One transport serves every partner: the target base URL and bearer token
//! are looked up per request from the loaded configuration. Timeouts and
//! 5xx/429 responses are treated as transient and retried with exponential
//! backoff; any other 4xx is a permanent rejection and is surfaced
//! immediately.

use crate::config::ProvidersConfig;
use charter_core::{CoreError, OutboundRequest, ProviderAck, ProviderTransport};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff schedule for transient submission failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Backoff multiplier per retry
    pub multiplier: f64,
    /// Ceiling on any single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, completed_attempts: u32) -> Duration {
        let factor = self.multiplier.powi(completed_attempts.saturating_sub(1) as i32);
        let delay = (self.initial_backoff_ms as f64 * factor) as u64;
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// HTTPS transport over the configured partners
pub struct HttpTransport {
    client: reqwest::Client,
    config: ProvidersConfig,
    retry: RetryPolicy,
}

impl HttpTransport {
    /// Build the transport with the default retry policy
    pub fn new(config: ProvidersConfig) -> Result<Self, CoreError> {
        Self::with_retry(config, RetryPolicy::default())
    }

    /// Build the transport with an explicit retry policy
    pub fn with_retry(config: ProvidersConfig, retry: RetryPolicy) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    async fn post_once(&self, request: &OutboundRequest) -> Result<ProviderAck, CoreError> {
        let partner = self.config.require(&request.provider_id.0)?;
        let url = format!("{}/{}", partner.base_url, request.resource);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&partner.api_key)
            .json(&request.payload)
            .send()
            .await
            .map_err(|e| {
                CoreError::provider_transient(format!(
                    "POST {} failed: {}",
                    request.resource, e
                ))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            CoreError::provider_transient(format!("Failed reading response body: {}", e))
        })?;

        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CoreError::provider_transient(format!(
                "{} returned {}: {}",
                request.provider_id, status, body
            )));
        }
        if !status.is_success() {
            return Err(CoreError::provider_permanent(format!(
                "{} returned {}: {}",
                request.provider_id, status, body
            )));
        }

        let raw_response: serde_json::Value = serde_json::from_str(&body)?;
        let external_request_id = ["request_id", "account_id", "id"]
            .iter()
            .find_map(|key| raw_response.get(*key).and_then(|v| v.as_str()))
            .ok_or_else(|| {
                CoreError::Serialization(format!(
                    "{} acknowledgement carries no request id",
                    request.provider_id
                ))
            })?
            .to_string();

        Ok(ProviderAck {
            external_request_id,
            raw_response,
        })
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn submit(&self, request: &OutboundRequest) -> Result<ProviderAck, CoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(request).await {
                Ok(ack) => {
                    debug!(
                        provider = %request.provider_id,
                        resource = %request.resource,
                        external_request_id = %ack.external_request_id,
                        "Partner accepted request"
                    );
                    return Ok(ack);
                }
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        provider = %request.provider_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient submission failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
