//! GCP Provider
//!
//! Discovers public endpoints from Cloud Asset Inventory, plus Certificate
//! Manager certificates which the asset API does not expose.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::command::CommandRunner;
use super::{items_at, str_at, CloudProvider, CloudProviderAdapter};
use crate::config::{GcpConfig, GcpServices};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const ASSET_API: &str = "https://cloudasset.googleapis.com/v1";
const CERTIFICATE_API: &str = "https://certificatemanager.googleapis.com/v1";
const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";

/// A Cloud Asset Inventory asset type the provider understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    ResourceRecordSet,
    ManagedZone,
    Instance,
    Address,
    Bucket,
    Function,
    RunService,
    DomainMapping,
    ApiGateway,
    SqlInstance,
    ForwardingRule,
    GlobalForwardingRule,
    UrlMap,
    AppEngineService,
    Cluster,
}

impl AssetKind {
    pub const ALL: [AssetKind; 15] = [
        AssetKind::ResourceRecordSet,
        AssetKind::ManagedZone,
        AssetKind::Instance,
        AssetKind::Address,
        AssetKind::Bucket,
        AssetKind::Function,
        AssetKind::RunService,
        AssetKind::DomainMapping,
        AssetKind::ApiGateway,
        AssetKind::SqlInstance,
        AssetKind::ForwardingRule,
        AssetKind::GlobalForwardingRule,
        AssetKind::UrlMap,
        AssetKind::AppEngineService,
        AssetKind::Cluster,
    ];

    pub fn asset_type(&self) -> &'static str {
        match self {
            AssetKind::ResourceRecordSet => "dns.googleapis.com/ResourceRecordSet",
            AssetKind::ManagedZone => "dns.googleapis.com/ManagedZone",
            AssetKind::Instance => "compute.googleapis.com/Instance",
            AssetKind::Address => "compute.googleapis.com/Address",
            AssetKind::Bucket => "storage.googleapis.com/Bucket",
            AssetKind::Function => "cloudfunctions.googleapis.com/Function",
            AssetKind::RunService => "run.googleapis.com/Service",
            AssetKind::DomainMapping => "run.googleapis.com/DomainMapping",
            AssetKind::ApiGateway => "apigateway.googleapis.com/Gateway",
            AssetKind::SqlInstance => "sqladmin.googleapis.com/Instance",
            AssetKind::ForwardingRule => "compute.googleapis.com/ForwardingRule",
            AssetKind::GlobalForwardingRule => "compute.googleapis.com/GlobalForwardingRule",
            AssetKind::UrlMap => "compute.googleapis.com/UrlMap",
            AssetKind::AppEngineService => "appengine.googleapis.com/Service",
            AssetKind::Cluster => "container.googleapis.com/Cluster",
        }
    }

    pub fn from_asset_type(asset_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.asset_type() == asset_type)
    }

    pub fn enabled(&self, services: &GcpServices) -> bool {
        match self {
            AssetKind::ResourceRecordSet => services.check_dns_resource_record_set,
            AssetKind::ManagedZone => services.check_dns_managed_zone,
            AssetKind::Instance => services.check_compute_instance,
            AssetKind::Address => services.check_compute_address,
            AssetKind::Bucket => services.check_storage_bucket,
            AssetKind::Function => services.check_cloud_function,
            AssetKind::RunService => services.check_run_service,
            AssetKind::DomainMapping => services.check_run_domain_mapping,
            AssetKind::ApiGateway => services.check_api_gateway,
            AssetKind::SqlInstance => services.check_sql_instance,
            AssetKind::ForwardingRule => services.check_compute_forwarding_rule,
            AssetKind::GlobalForwardingRule => services.check_compute_global_forwarding_rule,
            AssetKind::UrlMap => services.check_compute_url_map,
            AssetKind::AppEngineService => services.check_app_engine_service,
            AssetKind::Cluster => services.check_gke_cluster,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("gcp: failed to decode {asset_type} data: {source}")]
pub struct AssetDecodeError {
    asset_type: &'static str,
    #[source]
    source: serde_json::Error,
}

// Minimal shapes of the asset `resource.data` documents

#[derive(Deserialize)]
struct ResourceRecordSet {
    name: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    #[serde(default)]
    rrdatas: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Deserialize)]
struct AccessConfig {
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

#[derive(Deserialize)]
struct Address {
    address: Option<String>,
    #[serde(rename = "addressType", alias = "type")]
    address_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Function {
    https_trigger: Option<UrlHolder>,
}

#[derive(Deserialize)]
struct RunService {
    status: Option<UrlHolder>,
}

#[derive(Deserialize)]
struct UrlHolder {
    url: Option<String>,
}

#[derive(Deserialize)]
struct DomainMapping {
    metadata: Option<Metadata>,
}

#[derive(Deserialize)]
struct Metadata {
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlInstance {
    #[serde(default)]
    ip_addresses: Vec<SqlIpAddress>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlIpAddress {
    ip_address: Option<String>,
    #[serde(rename = "type")]
    ip_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForwardingRule {
    #[serde(rename = "IPAddress")]
    ip_address: Option<String>,
    load_balancing_scheme: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UrlMap {
    #[serde(default)]
    host_rules: Vec<HostRule>,
}

#[derive(Deserialize)]
struct HostRule {
    #[serde(default)]
    hosts: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cluster {
    endpoint: Option<String>,
    private_cluster_config: Option<PrivateClusterConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivateClusterConfig {
    enable_private_endpoint: Option<bool>,
}

fn decode<T: DeserializeOwned>(kind: AssetKind, data: &Value) -> Result<T, AssetDecodeError> {
    serde_json::from_value(data.clone()).map_err(|source| AssetDecodeError {
        asset_type: kind.asset_type(),
        source,
    })
}

/// Raw resources held by one asset. Buckets are handled separately since
/// they need a visibility check.
pub fn extract_asset(kind: AssetKind, asset: &Value) -> Result<Vec<String>, AssetDecodeError> {
    let data = asset.pointer("/resource/data").unwrap_or(&Value::Null);
    let one = |value: Option<String>| -> Vec<String> {
        value.filter(|v| !v.is_empty()).into_iter().collect()
    };

    let resources = match kind {
        AssetKind::ResourceRecordSet => {
            let record: ResourceRecordSet = decode(kind, data)?;
            let mut resources = Vec::new();
            // Only A/AAAA/CNAME names point somewhere reachable
            if let (Some(name), Some(record_type)) = (&record.name, &record.record_type) {
                if !name.is_empty()
                    && matches!(record_type.to_ascii_uppercase().as_str(), "A" | "AAAA" | "CNAME")
                {
                    resources.push(name.clone());
                }
            }
            resources.extend(
                record
                    .rrdatas
                    .into_iter()
                    .filter(|v| v.parse::<std::net::IpAddr>().is_ok()),
            );
            resources
        }
        AssetKind::ManagedZone => str_at(data, "/dnsName")
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        AssetKind::Instance => {
            let instance: Instance = decode(kind, data)?;
            instance
                .network_interfaces
                .into_iter()
                .flat_map(|n| n.access_configs)
                .filter_map(|ac| ac.nat_ip)
                .collect()
        }
        AssetKind::Address => {
            let address: Address = decode(kind, data)?;
            match address.address_type.as_deref() {
                Some("EXTERNAL") => one(address.address),
                _ => Vec::new(),
            }
        }
        AssetKind::Bucket => Vec::new(),
        AssetKind::Function => {
            let function: Function = decode(kind, data)?;
            one(function.https_trigger.and_then(|t| t.url))
        }
        AssetKind::RunService => {
            let service: RunService = decode(kind, data)?;
            one(service.status.and_then(|s| s.url))
        }
        AssetKind::DomainMapping => {
            let mapping: DomainMapping = decode(kind, data)?;
            one(mapping.metadata.and_then(|m| m.name))
        }
        AssetKind::ApiGateway => str_at(data, "/defaultHostname")
            .map(|h| vec![format!("https://{}", h)])
            .unwrap_or_default(),
        AssetKind::SqlInstance => {
            let instance: SqlInstance = decode(kind, data)?;
            instance
                .ip_addresses
                .into_iter()
                .filter(|ip| ip.ip_type.as_deref() == Some("PRIMARY"))
                .filter_map(|ip| ip.ip_address)
                .collect()
        }
        AssetKind::ForwardingRule | AssetKind::GlobalForwardingRule => {
            let rule: ForwardingRule = decode(kind, data)?;
            let external = rule
                .load_balancing_scheme
                .as_deref()
                .is_some_and(|s| s.starts_with("EXTERNAL"));
            if external {
                one(rule.ip_address)
            } else {
                Vec::new()
            }
        }
        AssetKind::UrlMap => {
            let url_map: UrlMap = decode(kind, data)?;
            url_map
                .host_rules
                .into_iter()
                .flat_map(|r| r.hosts)
                .filter(|h| !h.is_empty())
                .collect()
        }
        AssetKind::AppEngineService => app_engine_host(asset, data).into_iter().collect(),
        AssetKind::Cluster => {
            let cluster: Cluster = decode(kind, data)?;
            let private = cluster
                .private_cluster_config
                .and_then(|c| c.enable_private_endpoint)
                .unwrap_or(false);
            if private {
                Vec::new()
            } else {
                one(cluster.endpoint)
            }
        }
    };

    Ok(resources)
}

/// `<project>.appspot.com` for the default service, `<service>-dot-<project>.appspot.com` otherwise
fn app_engine_host(asset: &Value, data: &Value) -> Option<String> {
    let service_id = str_at(data, "/id")?;

    // data.name is `apps/<project-id>/services/<service>`
    let project = str_at(data, "/name")
        .and_then(|name| name.strip_prefix("apps/"))
        .and_then(|rest| rest.split('/').next())
        .filter(|p| !p.is_empty())
        .or_else(|| {
            str_at(asset, "/resource/parent")
                .and_then(|parent| parent.rsplit('/').next())
                .filter(|p| !p.is_empty())
        })?;

    Some(if service_id == "default" {
        format!("{}.appspot.com", project)
    } else {
        format!("{}-dot-{}.appspot.com", service_id, project)
    })
}

/// SAN DNS names of Certificate Manager certificates, without trailing dots
pub fn extract_certificate_domains(page: &Value) -> Vec<String> {
    items_at(page, "/certificates")
        .iter()
        .flat_map(|cert| items_at(cert, "/sanDnsnames"))
        .filter_map(Value::as_str)
        .map(|san| san.strip_suffix('.').unwrap_or(san).to_string())
        .collect()
}

fn grants_public_access(member: &str) -> bool {
    member == "allUsers" || member == "allAuthenticatedUsers"
}

/// Whether an IAM policy binds a role to everyone
pub fn policy_is_public(policy: &Value) -> bool {
    items_at(policy, "/bindings")
        .iter()
        .flat_map(|b| items_at(b, "/members"))
        .filter_map(Value::as_str)
        .any(grants_public_access)
}

/// Whether bucket or default object ACLs grant access to everyone
pub fn acl_is_public(bucket: &Value) -> bool {
    ["/acl", "/defaultObjectAcl"]
        .iter()
        .flat_map(|p| items_at(bucket, p))
        .filter_map(|entry| str_at(entry, "/entity"))
        .any(grants_public_access)
}

fn is_service_disabled(body: &str) -> bool {
    body.contains("SERVICE_DISABLED")
}

/// GCP Provider - discovers endpoints via Cloud Asset Inventory
pub struct GcpProvider {
    config: GcpConfig,
    http: Client,
    runner: Arc<dyn CommandRunner>,
}

impl GcpProvider {
    pub fn new(
        config: GcpConfig,
        runner: Arc<dyn CommandRunner>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http,
            runner,
        })
    }

    /// Access token from the metadata server, falling back to gcloud
    async fn access_token(&self) -> Result<String> {
        let metadata = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(2))
            .send()
            .await;

        if let Ok(resp) = metadata {
            if resp.status().is_success() {
                let token: Value = resp.json().await?;
                if let Some(token) = str_at(&token, "/access_token") {
                    return Ok(token.to_string());
                }
            }
        }

        // Fall back to gcloud CLI for local development
        let out = self
            .runner
            .run_json(
                "gcloud",
                vec![
                    "auth".to_string(),
                    "print-access-token".to_string(),
                    "--format=json(token)".to_string(),
                ],
                vec![],
            )
            .await
            .context("gcp: failed to get access token")?;

        str_at(&out, "/token")
            .map(str::to_string)
            .context("gcp: gcloud returned no access token")
    }

    /// GET a JSON document; `Ok(None)` when the API is disabled for the project
    async fn get_json(
        &self,
        token: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<Value>> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_service_disabled(&body) {
                return Ok(None);
            }
            bail!("{} returned {}: {}", url, status, body);
        }

        Ok(Some(response.json().await?))
    }

    async fn list_assets(
        &self,
        token: &str,
        project: &str,
        kinds: &[AssetKind],
    ) -> Result<Vec<Value>> {
        let url = format!("{}/{}/assets", ASSET_API, project);
        let mut assets = Vec::new();
        let mut page_token = String::new();

        loop {
            let mut query = vec![("contentType", "RESOURCE"), ("pageSize", "1000")];
            query.extend(kinds.iter().map(|k| ("assetTypes", k.asset_type())));
            if !page_token.is_empty() {
                query.push(("pageToken", page_token.as_str()));
            }

            let Some(page) = self.get_json(token, &url, &query).await? else {
                warn!(project = %project, "Assets API disabled, skipping asset discovery");
                break;
            };

            assets.extend(items_at(&page, "/assets").iter().cloned());

            match str_at(&page, "/nextPageToken") {
                Some(next) => page_token = next.to_string(),
                None => break,
            }
        }

        Ok(assets)
    }

    async fn certificates(&self, token: &str, project: &str) -> Result<Vec<String>> {
        // "-" means all locations
        let url = format!("{}/{}/locations/-/certificates", CERTIFICATE_API, project);
        let mut domains = Vec::new();
        let mut page_token = String::new();

        loop {
            let mut query = Vec::new();
            if !page_token.is_empty() {
                query.push(("pageToken", page_token.as_str()));
            }

            let Some(page) = self
                .get_json(token, &url, &query)
                .await
                .context("gcp: failed to list certificates")?
            else {
                warn!(
                    project = %project,
                    "Certificate Manager API disabled, skipping certificate discovery"
                );
                break;
            };

            domains.extend(extract_certificate_domains(&page));

            match str_at(&page, "/nextPageToken") {
                Some(next) => page_token = next.to_string(),
                None => break,
            }
        }

        Ok(domains)
    }

    /// Public bucket endpoint, checking IAM policy first and ACLs second
    async fn public_bucket(&self, token: &str, asset: &Value) -> Option<String> {
        let full_name = str_at(asset, "/resource/data/name").or_else(|| str_at(asset, "/name"))?;
        let bucket = full_name.rsplit('/').next().filter(|b| !b.is_empty())?;
        let encoded = urlencoding::encode(bucket);

        let policy_url = format!("{}/b/{}/iam", STORAGE_API, encoded);
        match self.get_json(token, &policy_url, &[]).await {
            Ok(Some(policy)) if policy_is_public(&policy) => {
                return Some(format!("https://{}.storage.googleapis.com/", bucket));
            }
            Ok(_) => {}
            Err(e) => warn!(
                bucket = %bucket,
                error = %e,
                "Failed to check IAM policy, trying bucket ACL"
            ),
        }

        let bucket_url = format!("{}/b/{}", STORAGE_API, encoded);
        match self.get_json(token, &bucket_url, &[("projection", "full")]).await {
            Ok(Some(attrs)) if acl_is_public(&attrs) => {
                Some(format!("https://{}.storage.googleapis.com/", bucket))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(
                    bucket = %bucket,
                    error = %e,
                    "Failed to check ACL, assuming bucket is not public"
                );
                None
            }
        }
    }
}

#[async_trait]
impl CloudProviderAdapter for GcpProvider {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Gcp
    }

    async fn authenticate(&self) -> Result<()> {
        self.access_token().await?;
        debug!("GCP authentication successful");
        Ok(())
    }

    async fn get_resources(&self) -> Result<Vec<String>> {
        let services = self.config.services.clone().unwrap_or_default();
        let kinds: Vec<AssetKind> = AssetKind::ALL
            .into_iter()
            .filter(|k| k.enabled(&services))
            .collect();
        debug!(
            asset_types = ?kinds.iter().map(|k| k.asset_type()).collect::<Vec<_>>(),
            "Enabled asset types"
        );

        let token = self.access_token().await?;
        let mut resources = Vec::new();

        for project in &self.config.projects {
            if !kinds.is_empty() {
                let assets = self
                    .list_assets(&token, project, &kinds)
                    .await
                    .with_context(|| format!("gcp: failed to list assets of {}", project))?;

                for asset in &assets {
                    let asset_type = str_at(asset, "/assetType").unwrap_or_default();
                    trace!(asset_type = %asset_type, "Processing asset");

                    let Some(kind) = AssetKind::from_asset_type(asset_type) else {
                        warn!(asset_type = %asset_type, "Missing code to handle asset type");
                        continue;
                    };

                    if kind == AssetKind::Bucket {
                        resources.extend(self.public_bucket(&token, asset).await);
                        continue;
                    }

                    match extract_asset(kind, asset) {
                        Ok(found) => resources.extend(found),
                        Err(e) => warn!(
                            asset_type = %asset_type,
                            error = %e,
                            "Failed to decode asset, skipping"
                        ),
                    }
                }
            }

            if services.check_certificates {
                resources.extend(self.certificates(&token, project).await?);
            }
        }

        info!(resource_count = resources.len(), "Resource discovery complete");
        Ok(resources)
    }

    async fn get_api_key(&self) -> Result<Option<String>> {
        Ok(None)
    }
}
