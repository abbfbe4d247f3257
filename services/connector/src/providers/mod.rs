//! Cloud Provider Adapters
//!
//! Trait-based discovery of internet-facing resources across AWS, Azure,
//! and GCP. Each adapter returns raw resource strings; canonicalization is
//! left to the connector.

pub mod aws;
pub mod azure;
pub mod command;
pub mod gcp;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, info_span, Instrument};

use crate::config::Config;
use command::{CommandRunner, SystemCommandRunner};

/// Cloud provider identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudProvider::Aws => write!(f, "aws"),
            CloudProvider::Azure => write!(f, "azure"),
            CloudProvider::Gcp => write!(f, "gcp"),
        }
    }
}

/// Trait for cloud resource discovery
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudProviderAdapter: Send + Sync {
    /// Get the provider type
    fn provider(&self) -> CloudProvider;

    /// Check the ambient credentials work
    async fn authenticate(&self) -> Result<()>;

    /// Discover raw resource strings from every enabled service
    async fn get_resources(&self) -> Result<Vec<String>>;

    /// Inventory API key held by the provider, if it manages one
    async fn get_api_key(&self) -> Result<Option<String>>;
}

/// Aggregates all enabled cloud providers
pub struct MultiCloudProviders {
    providers: Vec<Box<dyn CloudProviderAdapter>>,
}

impl MultiCloudProviders {
    pub fn new(providers: Vec<Box<dyn CloudProviderAdapter>>) -> Self {
        Self { providers }
    }

    /// Build an adapter for every provider enabled in the config
    pub fn from_config(config: &Config) -> Result<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        let mut providers: Vec<Box<dyn CloudProviderAdapter>> = Vec::new();

        if let Some(aws) = config.aws.as_ref().filter(|c| c.enabled) {
            providers.push(Box::new(aws::AwsProvider::new(aws.clone(), runner.clone())));
        }

        if let Some(azure) = config.azure.as_ref().filter(|c| c.enabled) {
            providers.push(Box::new(
                azure::AzureProvider::new(azure.clone(), runner.clone(), config.http.timeout())
                    .context("Failed to create Azure provider")?,
            ));
        }

        if let Some(gcp) = config.gcp.as_ref().filter(|c| c.enabled) {
            providers.push(Box::new(
                gcp::GcpProvider::new(gcp.clone(), runner, config.http.timeout())
                    .context("Failed to create GCP provider")?,
            ));
        }

        if providers.is_empty() {
            bail!("no cloud provider enabled");
        }

        Ok(Self::new(providers))
    }

    pub fn providers(&self) -> Vec<CloudProvider> {
        self.providers.iter().map(|p| p.provider()).collect()
    }

    /// Authenticate every provider; the first failure is fatal
    pub async fn authenticate_all(&self) -> Result<()> {
        for provider in &self.providers {
            let name = provider.provider();
            provider
                .authenticate()
                .instrument(info_span!("provider", cloud_provider = %name))
                .await
                .with_context(|| format!("Could not authenticate with cloud provider {}", name))?;
            debug!(cloud_provider = %name, "Cloud provider authentication successful");
        }
        Ok(())
    }

    /// Discover resources from all providers, in provider order
    pub async fn discover_all_resources(&self) -> Result<Vec<String>> {
        let mut resources = Vec::new();

        for provider in &self.providers {
            let name = provider.provider();
            let found = provider
                .get_resources()
                .instrument(info_span!("provider", cloud_provider = %name))
                .await
                .with_context(|| format!("Could not get resources of cloud provider {}", name))?;

            info!(cloud_provider = %name, count = found.len(), "Discovered resources");
            resources.extend(found);
        }

        Ok(resources)
    }

    /// First API key any provider supplies
    pub async fn api_key(&self) -> Result<Option<String>> {
        for provider in &self.providers {
            let name = provider.provider();
            let key = provider
                .get_api_key()
                .await
                .with_context(|| format!("Failed to get API key from {}", name))?;

            if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
                debug!(cloud_provider = %name, "Using API key from cloud provider");
                return Ok(Some(key));
            }
        }
        Ok(None)
    }
}

/// Non-empty string at a JSON pointer
pub(crate) fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Items of the array at a JSON pointer, empty when absent
pub(crate) fn items_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}
