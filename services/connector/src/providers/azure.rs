//! Azure Provider
//!
//! Every service is a Resource Graph query projecting a single `resource`
//! column. Queries run across all subscriptions the credentials can see.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use x509_parser::extensions::GeneralName;

use super::command::{args, CommandRunner};
use super::{str_at, CloudProvider, CloudProviderAdapter};
use crate::config::{AzureConfig, AzureServices};

const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";
const RESOURCE_GRAPH_URL: &str = "https://management.azure.com/providers/\
    Microsoft.ResourceGraph/resources?api-version=2021-03-01";

/// An Azure resource family with its Resource Graph query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AzureService {
    PublicIps,
    PublicIpDns,
    ApplicationGateways,
    ApplicationGatewayCertificates,
    FrontDoorClassic,
    FrontDoorAfd,
    TrafficManager,
    DnsZones,
    DnsRecords,
    StorageWeb,
    CdnEndpoints,
    AppServices,
    SqlServers,
    CosmosDb,
    Redis,
}

impl AzureService {
    pub const ALL: [AzureService; 15] = [
        AzureService::PublicIps,
        AzureService::PublicIpDns,
        AzureService::ApplicationGateways,
        AzureService::ApplicationGatewayCertificates,
        AzureService::FrontDoorClassic,
        AzureService::FrontDoorAfd,
        AzureService::TrafficManager,
        AzureService::DnsZones,
        AzureService::DnsRecords,
        AzureService::StorageWeb,
        AzureService::CdnEndpoints,
        AzureService::AppServices,
        AzureService::SqlServers,
        AzureService::CosmosDb,
        AzureService::Redis,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AzureService::PublicIps => "Public IPs",
            AzureService::PublicIpDns => "Public IP DNS",
            AzureService::ApplicationGateways => "Application Gateways",
            AzureService::ApplicationGatewayCertificates => "Application Gateway Certificates",
            AzureService::FrontDoorClassic => "Front Door (Classic)",
            AzureService::FrontDoorAfd => "Front Door (AFD)",
            AzureService::TrafficManager => "Traffic Manager",
            AzureService::DnsZones => "DNS Zones",
            AzureService::DnsRecords => "DNS Records",
            AzureService::StorageWeb => "Storage (Web)",
            AzureService::CdnEndpoints => "CDN Endpoints",
            AzureService::AppServices => "App Services",
            AzureService::SqlServers => "Azure SQL",
            AzureService::CosmosDb => "Cosmos DB",
            AzureService::Redis => "Redis",
        }
    }

    pub fn enabled(&self, services: &AzureServices) -> bool {
        match self {
            AzureService::PublicIps | AzureService::PublicIpDns => {
                services.check_public_ip_addresses
            }
            AzureService::ApplicationGateways => services.check_application_gateways,
            AzureService::ApplicationGatewayCertificates => {
                services.check_application_gateway_certificates
            }
            AzureService::FrontDoorClassic => services.check_front_door_classic,
            AzureService::FrontDoorAfd => services.check_front_door_afd,
            AzureService::TrafficManager => services.check_traffic_manager,
            AzureService::DnsZones => services.check_dns_zones,
            AzureService::DnsRecords => services.check_dns_records,
            AzureService::StorageWeb => services.check_storage_static_websites,
            AzureService::CdnEndpoints => services.check_cdn_endpoints,
            AzureService::AppServices => services.check_app_services,
            AzureService::SqlServers => services.check_sql_servers,
            AzureService::CosmosDb => services.check_cosmos_db,
            AzureService::Redis => services.check_redis_cache,
        }
    }

    /// Resource type filter and the projection yielding `resource`
    fn filter_and_projection(&self) -> (&'static str, &'static str) {
        match self {
            AzureService::PublicIps => (
                "type =~ 'microsoft.network/publicipaddresses'",
                "extend resource = tostring(properties.ipAddress)",
            ),
            AzureService::PublicIpDns => (
                "type =~ 'microsoft.network/publicipaddresses'",
                "extend resource = tostring(properties.dnsSettings.fqdn)",
            ),
            AzureService::ApplicationGateways => (
                "type =~ 'microsoft.network/applicationgateways'",
                "mv-expand l = properties.httpListeners \
                 | extend resource = tostring(l.properties.hostName)",
            ),
            AzureService::ApplicationGatewayCertificates => (
                "type =~ 'microsoft.network/applicationgateways'",
                "mv-expand c = properties.sslCertificates \
                 | extend resource = tostring(c.properties.publicCertData)",
            ),
            AzureService::FrontDoorClassic => (
                "type =~ 'microsoft.network/frontdoors'",
                "mv-expand fe = properties.frontendEndpoints \
                 | extend resource = tostring(fe.properties.hostName)",
            ),
            AzureService::FrontDoorAfd => (
                "type =~ 'microsoft.cdn/profiles/afdendpoints'",
                "extend resource = tostring(properties.hostName)",
            ),
            AzureService::TrafficManager => (
                "type =~ 'microsoft.network/trafficmanagerprofiles'",
                "extend resource = tostring(properties.dnsConfig.fqdn)",
            ),
            AzureService::DnsZones => (
                "type =~ 'microsoft.network/dnszones'",
                "extend resource = tostring(name)",
            ),
            AzureService::DnsRecords => (
                "type =~ 'microsoft.network/dnszones/A' \
                 or type =~ 'microsoft.network/dnszones/CNAME'",
                "extend resource = tostring(properties.fqdn)",
            ),
            AzureService::StorageWeb => (
                "type =~ 'microsoft.storage/storageaccounts'",
                "extend resource = tostring(properties.primaryEndpoints.web)",
            ),
            AzureService::CdnEndpoints => (
                "type =~ 'microsoft.cdn/profiles/endpoints'",
                "extend resource = tostring(properties.hostName)",
            ),
            AzureService::AppServices => (
                "type =~ 'microsoft.web/sites'",
                "mv-expand h = properties.hostNames | extend resource = tostring(h)",
            ),
            AzureService::SqlServers => (
                "type =~ 'microsoft.sql/servers'",
                "extend resource = tostring(properties.fullyQualifiedDomainName)",
            ),
            AzureService::CosmosDb => (
                "type =~ 'microsoft.documentdb/databaseaccounts'",
                "extend resource = tostring(properties.documentEndpoint)",
            ),
            AzureService::Redis => (
                "type =~ 'microsoft.cache/redis'",
                "extend resource = tostring(properties.hostName)",
            ),
        }
    }

    pub fn query(&self) -> String {
        let (filter, projection) = self.filter_and_projection();
        format!(
            "Resources | where {} | {} | where isnotempty(resource) | distinct resource",
            filter, projection
        )
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    options: QueryOptions,
}

#[derive(Debug, Serialize)]
struct QueryOptions {
    #[serde(rename = "resultFormat")]
    result_format: &'static str,
    #[serde(rename = "$skipToken", skip_serializing_if = "Option::is_none")]
    skip_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    data: Vec<Row>,
    #[serde(rename = "$skipToken")]
    skip_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    resource: Option<String>,
}

impl QueryResponse {
    /// Non-empty `resource` values of the page
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.data
            .iter()
            .filter_map(|row| row.resource.as_deref())
            .filter(|r| !r.is_empty())
    }

    pub fn next_page(&self) -> Option<&str> {
        self.skip_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Azure Provider - discovers endpoints via Resource Graph
pub struct AzureProvider {
    config: AzureConfig,
    http: Client,
    runner: Arc<dyn CommandRunner>,
}

impl AzureProvider {
    pub fn new(
        config: AzureConfig,
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

    /// ARM access token from the `az` CLI login
    async fn access_token(&self) -> Result<String> {
        let out = self
            .runner
            .run_json(
                "az",
                args([
                    "account",
                    "get-access-token",
                    "--resource",
                    MANAGEMENT_RESOURCE,
                    "--output",
                    "json",
                ]),
                vec![],
            )
            .await
            .context("azure: failed to get token")?;

        str_at(&out, "/accessToken")
            .map(str::to_string)
            .context("azure: az returned no access token")
    }

    async fn query(&self, token: &str, service: AzureService) -> Result<Vec<String>> {
        let query = service.query();
        let mut resources = Vec::new();
        let mut skip_token = None;

        loop {
            let request = QueryRequest {
                query: &query,
                options: QueryOptions {
                    result_format: "objectArray",
                    skip_token: skip_token.take(),
                },
            };

            let response = self
                .http
                .post(RESOURCE_GRAPH_URL)
                .bearer_auth(token)
                .json(&request)
                .send()
                .await
                .context("azure: resource graph query failed")?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("azure: resource graph returned {}: {}", status, body);
            }

            let page: QueryResponse = response
                .json()
                .await
                .context("azure: failed to decode response")?;

            resources.extend(page.resources().map(str::to_string));

            match page.next_page() {
                Some(next) => skip_token = Some(next.to_string()),
                None => break,
            }
        }

        Ok(resources)
    }

    /// Query results, with gateway certificates expanded to their names
    async fn discover(&self, token: &str, service: AzureService) -> Result<Vec<String>> {
        let found = self.query(token, service).await?;
        if service != AzureService::ApplicationGatewayCertificates {
            return Ok(found);
        }

        let mut seen = HashSet::new();
        let mut domains = Vec::new();
        for data in &found {
            for domain in certificate_domains(data)? {
                if seen.insert(domain.clone()) {
                    domains.push(domain);
                }
            }
        }
        Ok(domains)
    }
}

/// DNS names on a gateway certificate: its SANs, then the subject CN when
/// not already listed. Accepts PEM or bare base64 DER.
pub fn certificate_domains(data: &str) -> Result<Vec<String>> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let der = if trimmed.contains("BEGIN CERTIFICATE") {
        pem::parse(trimmed)
            .context("azure: failed to decode PEM certificate data")?
            .contents()
            .to_vec()
    } else {
        STANDARD
            .decode(trimmed)
            .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
            .context("azure: failed to decode base64 certificate data")?
    };

    let (_, cert) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| anyhow!("azure: failed to parse certificate data: {}", e))?;

    let mut domains: Vec<String> = Vec::new();
    let sans = cert
        .subject_alternative_name()
        .map_err(|e| anyhow!("azure: invalid subject alternative names: {}", e))?;
    if let Some(sans) = sans {
        for name in &sans.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                if !domains.iter().any(|d| d == dns) {
                    domains.push(dns.to_string());
                }
            }
        }
    }

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::trim)
        .filter(|cn| !cn.is_empty());
    if let Some(cn) = common_name {
        if !domains.iter().any(|d| d == cn) {
            domains.push(cn.to_string());
        }
    }

    Ok(domains)
}

#[async_trait]
impl CloudProviderAdapter for AzureProvider {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Azure
    }

    async fn authenticate(&self) -> Result<()> {
        self.access_token().await?;
        debug!("Azure authentication successful");
        Ok(())
    }

    async fn get_resources(&self) -> Result<Vec<String>> {
        let services = self.config.services.clone().unwrap_or_default();
        let token = self.access_token().await?;
        let mut resources = Vec::new();

        for service in AzureService::ALL {
            if !service.enabled(&services) {
                trace!(service = service.name(), "Skipping discovery; check disabled");
                continue;
            }

            match self.discover(&token, service).await {
                Ok(found) => resources.extend(found),
                Err(e) => warn!(service = service.name(), error = %e, "Failed to get resources"),
            }
        }

        info!(resource_count = resources.len(), "Resource discovery complete");
        Ok(resources)
    }

    async fn get_api_key(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::command::MockCommandRunner;
    use serde_json::json;

    #[test]
    fn test_query_shape() {
        let q = AzureService::AppServices.query();
        assert!(q.starts_with("Resources | where type =~ 'microsoft.web/sites'"));
        assert!(q.contains("mv-expand h = properties.hostNames"));
        assert!(q.ends_with("| where isnotempty(resource) | distinct resource"));
    }

    #[test]
    fn test_public_ip_flag_covers_addresses_and_dns() {
        let services = AzureServices {
            check_public_ip_addresses: true,
            ..Default::default()
        };
        let enabled: Vec<_> = AzureService::ALL
            .into_iter()
            .filter(|s| s.enabled(&services))
            .collect();
        assert_eq!(enabled, vec![AzureService::PublicIps, AzureService::PublicIpDns]);
    }

    #[test]
    fn test_request_serialization() {
        let request = QueryRequest {
            query: "Resources",
            options: QueryOptions {
                result_format: "objectArray",
                skip_token: None,
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"query": "Resources", "options": {"resultFormat": "objectArray"}})
        );

        let paged = QueryRequest {
            query: "Resources",
            options: QueryOptions {
                result_format: "objectArray",
                skip_token: Some("abc".into()),
            },
        };
        assert_eq!(serde_json::to_value(&paged).unwrap()["options"]["$skipToken"], "abc");
    }

    #[test]
    fn test_response_parsing() {
        let page: QueryResponse = serde_json::from_value(json!({
            "totalRecords": 3,
            "count": 3,
            "data": [{"resource": "20.1.2.3"}, {"resource": ""}, {"other": 1}],
            "$skipToken": "next"
        }))
        .unwrap();
        assert_eq!(page.resources().collect::<Vec<_>>(), vec!["20.1.2.3"]);
        assert_eq!(page.next_page(), Some("next"));

        let last: QueryResponse = serde_json::from_value(json!({"data": []})).unwrap();
        assert_eq!(last.next_page(), None);
    }

    #[test]
    fn test_certificate_query_reads_public_cert_data() {
        let q = AzureService::ApplicationGatewayCertificates.query();
        assert!(q.contains("mv-expand c = properties.sslCertificates"));
        assert!(q.contains("tostring(c.properties.publicCertData)"));
    }

    #[test]
    fn test_certificate_domains_from_pem() {
        let domains = certificate_domains(include_str!("../../testdata/gateway.pem")).unwrap();
        assert_eq!(domains, vec!["www.example.com", "api.example.com", "example.com"]);
    }

    #[test]
    fn test_certificate_domains_from_base64() {
        let encoded = include_str!("../../testdata/gateway.b64");
        let domains = certificate_domains(encoded).unwrap();
        assert_eq!(domains, vec!["example.com", "alt.example.com"]);

        let unpadded = encoded.trim().trim_end_matches('=');
        assert_eq!(certificate_domains(unpadded).unwrap(), domains);
    }

    #[test]
    fn test_certificate_domains_empty_and_invalid() {
        assert!(certificate_domains("  ").unwrap().is_empty());
        assert!(certificate_domains("not-base64").is_err());

        let garbage = STANDARD.encode(b"definitely not DER");
        let err = certificate_domains(&garbage).unwrap_err();
        assert!(err.to_string().contains("failed to parse certificate"));

        let broken_pem = "-----BEGIN CERTIFICATE-----\n!!!\n-----END CERTIFICATE-----";
        assert!(certificate_domains(broken_pem).is_err());
    }

    #[tokio::test]
    async fn test_authenticate_uses_az_token() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run_json()
            .withf(|program, args, _| {
                program == "az" && args.contains(&MANAGEMENT_RESOURCE.to_string())
            })
            .times(1)
            .returning(|_, _, _| Ok(json!({"accessToken": "tok", "tokenType": "Bearer"})));

        let provider = AzureProvider::new(
            AzureConfig::default(),
            Arc::new(runner),
            Duration::from_secs(5),
        )
        .unwrap();
        provider.authenticate().await.unwrap();
    }

    #[tokio::test]
    async fn test_authenticate_fails_without_token() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run_json()
            .returning(|_, _, _| Err(anyhow::anyhow!("Please run 'az login'")));

        let provider = AzureProvider::new(
            AzureConfig::default(),
            Arc::new(runner),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = provider.authenticate().await.unwrap_err();
        assert!(err.to_string().contains("azure"));
    }
}
