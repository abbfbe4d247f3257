//! HTTP implementation of the seed inventory client

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::types::{AuthState, CreateSeedRequest, Node, Scan, Seed};
use super::{ApiError, SeedInventory};

const API_KEY_HEADER: &str = "X-API-Key";

/// Backoff applied to retryable inventory failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based), doubling up to the cap
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Rate limiting and server errors are retried, except 501 Not Implemented
    pub fn is_retryable_status(status: u16) -> bool {
        status == 429 || (status >= 500 && status != 501)
    }
}

/// Client for the attack surface inventory REST API
pub struct AsmClient {
    http: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl AsmClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cloud-seed-connector/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retry,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    /// Send a request, retrying per the policy, and return the success body
    async fn send<F>(&self, build: F) -> Result<Vec<u8>, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 0;

        loop {
            let sent = build(&self.http)
                .header(API_KEY_HEADER, &self.api_key)
                .send()
                .await;

            let reason = match sent {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .bytes()
                            .await
                            .map(|b| b.to_vec())
                            .map_err(|e| ApiError::Transport(e.to_string()));
                    }

                    let code = status.as_u16();
                    let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
                    if !RetryPolicy::is_retryable_status(code) || attempt >= self.retry.retries {
                        return Err(ApiError::Status { status: code, body });
                    }
                    format!("status {code}")
                }
                Err(e) => {
                    if attempt >= self.retry.retries {
                        return Err(ApiError::Transport(e.to_string()));
                    }
                    e.to_string()
                }
            };

            let delay = self.retry.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Retrying inventory request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send_json<T, F>(&self, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let body = self.send(build).await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SeedInventory for AsmClient {
    async fn get_state(&self) -> Result<AuthState, ApiError> {
        let url = self.endpoint(&["auth", "state"]);
        self.send_json(|http| http.get(&url)).await
    }

    async fn get_scan(&self, scan_id: &str) -> Result<Scan, ApiError> {
        let url = self.endpoint(&["scans", scan_id]);
        self.send_json(|http| http.get(&url)).await
    }

    async fn get_scan_seeds(&self, scan_id: &str) -> Result<Vec<Seed>, ApiError> {
        let url = self.endpoint(&["scans", scan_id, "seeds"]);
        let seeds: Vec<Seed> = self
            .send_json(|http| http.get(&url).query(&[("expand", "tags")]))
            .await?;
        debug!(scan_id = %scan_id, count = seeds.len(), "Fetched scan seeds");
        Ok(seeds)
    }

    async fn add_scan_seed(
        &self,
        scan_id: &str,
        request: &CreateSeedRequest,
    ) -> Result<Node, ApiError> {
        let url = self.endpoint(&["scans", scan_id, "seeds"]);
        let body = self.send(|http| http.post(&url).json(request)).await?;
        if body.is_empty() {
            return Ok(Node::default());
        }
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn remove_scan_seed(&self, scan_id: &str, seed_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["scans", scan_id, "seeds", seed_id]);
        self.send(|http| http.delete(&url)).await.map(|_| ())
    }
}
