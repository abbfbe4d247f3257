//! AWS Provider
//!
//! Discovers public endpoints through the `aws` CLI, optionally fanning out
//! over organization accounts by assuming a role in each.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::command::{args, CommandRunner};
use super::{items_at, str_at, CloudProvider, CloudProviderAdapter};
use crate::config::{AwsConfig, AwsServices};

const SESSION_NAME: &str = "cloud-seed-connector";

/// An AWS service the provider can enumerate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwsService {
    Ec2,
    Eip,
    Elb,
    Acm,
    ApiGateway,
    ApiGatewayV2,
    Eks,
    Rds,
    OpenSearch,
    Lambda,
    S3,
    Route53,
    CloudFront,
}

impl AwsService {
    /// Services queried once per enabled region
    pub const REGIONAL: [AwsService; 11] = [
        AwsService::Ec2,
        AwsService::Eip,
        AwsService::Elb,
        AwsService::Acm,
        AwsService::ApiGateway,
        AwsService::ApiGatewayV2,
        AwsService::Eks,
        AwsService::Rds,
        AwsService::OpenSearch,
        AwsService::Lambda,
        AwsService::S3,
    ];

    /// Services with a single global endpoint
    pub const GLOBAL: [AwsService; 2] = [AwsService::Route53, AwsService::CloudFront];

    pub fn name(&self) -> &'static str {
        match self {
            AwsService::Ec2 => "EC2",
            AwsService::Eip => "EIP",
            AwsService::Elb => "ELB",
            AwsService::Acm => "ACM",
            AwsService::ApiGateway => "APIGateway",
            AwsService::ApiGatewayV2 => "APIGatewayV2",
            AwsService::Eks => "EKS",
            AwsService::Rds => "RDS",
            AwsService::OpenSearch => "OpenSearch",
            AwsService::Lambda => "Lambda",
            AwsService::S3 => "S3",
            AwsService::Route53 => "Route53",
            AwsService::CloudFront => "CloudFront",
        }
    }

    pub fn enabled(&self, services: &AwsServices) -> bool {
        match self {
            AwsService::Ec2 => services.check_ec2,
            AwsService::Eip => services.check_eip,
            AwsService::Elb => services.check_elb,
            AwsService::Acm => services.check_acm,
            AwsService::ApiGateway => services.check_api_gateway,
            AwsService::ApiGatewayV2 => services.check_api_gateway_v2,
            AwsService::Eks => services.check_eks,
            AwsService::Rds => services.check_rds,
            AwsService::OpenSearch => services.check_opensearch,
            AwsService::Lambda => services.check_lambda,
            AwsService::S3 => services.check_s3,
            AwsService::Route53 => services.check_route53,
            AwsService::CloudFront => services.check_cloudfront,
        }
    }
}

/// Temporary credentials from `sts assume-role`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
}

impl Credentials {
    fn from_assume_role(output: &Value) -> Option<Self> {
        Some(Self {
            access_key_id: str_at(output, "/Credentials/AccessKeyId")?.to_string(),
            secret_access_key: str_at(output, "/Credentials/SecretAccessKey")?.to_string(),
            session_token: str_at(output, "/Credentials/SessionToken")?.to_string(),
        })
    }
}

/// Where commands run: the ambient identity, or an assumed role in an account
#[derive(Debug, Clone, Default)]
struct Scope {
    account: Option<String>,
    credentials: Option<Credentials>,
}

impl Scope {
    fn envs(&self) -> Vec<(String, String)> {
        match &self.credentials {
            Some(c) => vec![
                ("AWS_ACCESS_KEY_ID".to_string(), c.access_key_id.clone()),
                ("AWS_SECRET_ACCESS_KEY".to_string(), c.secret_access_key.clone()),
                ("AWS_SESSION_TOKEN".to_string(), c.session_token.clone()),
            ],
            None => Vec::new(),
        }
    }
}

/// AWS Provider - discovers endpoints via the AWS CLI
pub struct AwsProvider {
    config: AwsConfig,
    runner: Arc<dyn CommandRunner>,
}

impl AwsProvider {
    pub fn new(config: AwsConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    async fn aws(&self, scope: &Scope, region: &str, command: &[&str]) -> Result<Value> {
        let mut full = args(command.iter().copied());
        full.extend(args(["--region", region, "--output", "json"]));
        self.runner.run_json("aws", full, scope.envs()).await
    }

    async fn accounts(&self) -> Result<Vec<String>> {
        if !self.config.list_all_accounts {
            return Ok(self.config.accounts.clone());
        }

        let output = self
            .aws(
                &Scope::default(),
                &self.config.default_region,
                &["organizations", "list-accounts"],
            )
            .await
            .context("aws: getting list accounts")?;

        Ok(extract_active_accounts(&output))
    }

    /// Identities to enumerate: the ambient one, or an assumed role per account
    async fn scopes(&self) -> Result<Vec<Scope>> {
        if !self.config.list_all_accounts && self.config.accounts.is_empty() {
            return Ok(vec![Scope::default()]);
        }

        let role_name = self.config.assume_role.as_deref().unwrap_or_default();
        let mut scopes = Vec::new();

        for account in self.accounts().await? {
            let role_arn = format!("arn:aws:iam::{}:role/{}", account, role_name);
            trace!(account = %account, role = %role_arn, "Assuming role");

            let assumed = self
                .aws(
                    &Scope::default(),
                    &self.config.default_region,
                    &[
                        "sts",
                        "assume-role",
                        "--role-arn",
                        role_arn.as_str(),
                        "--role-session-name",
                        SESSION_NAME,
                    ],
                )
                .await;

            match assumed.map(|v| Credentials::from_assume_role(&v)) {
                Ok(Some(credentials)) => scopes.push(Scope {
                    account: Some(account),
                    credentials: Some(credentials),
                }),
                Ok(None) => warn!(
                    account = %account,
                    role = %role_arn,
                    "Assume role returned no credentials, skipping account"
                ),
                Err(e) => warn!(
                    account = %account,
                    role = %role_arn,
                    error = %e,
                    "Unable to assume role, skipping account"
                ),
            }
        }

        Ok(scopes)
    }

    async fn regions(&self, scope: &Scope) -> Result<Vec<String>> {
        let output = self
            .aws(scope, &self.config.default_region, &["ec2", "describe-regions"])
            .await
            .context("could not determine active regions")?;

        Ok(items_at(&output, "/Regions")
            .iter()
            .filter_map(|r| str_at(r, "/RegionName"))
            .map(str::to_string)
            .collect())
    }

    async fn discover_scope(&self, scope: &Scope, services: &AwsServices) -> Result<Vec<String>> {
        let regions = self.regions(scope).await?;
        let mut resources = Vec::new();

        for service in AwsService::REGIONAL {
            if !service.enabled(services) {
                trace!(service = service.name(), "Skipping discovery; check disabled");
                continue;
            }

            for region in &regions {
                match self.discover_service(scope, region, service).await {
                    Ok(found) => resources.extend(found),
                    Err(e) => warn!(
                        service = service.name(),
                        region = %region,
                        account = ?scope.account,
                        error = %e,
                        "Failed to get resources"
                    ),
                }
            }
        }

        for service in AwsService::GLOBAL {
            if !service.enabled(services) {
                trace!(service = service.name(), "Skipping discovery; check disabled");
                continue;
            }

            let region = self.config.default_region.clone();
            match self.discover_service(scope, &region, service).await {
                Ok(found) => resources.extend(found),
                Err(e) => warn!(
                    service = service.name(),
                    account = ?scope.account,
                    error = %e,
                    "Failed to get resources"
                ),
            }
        }

        Ok(resources)
    }

    async fn discover_service(
        &self,
        scope: &Scope,
        region: &str,
        service: AwsService,
    ) -> Result<Vec<String>> {
        trace!(service = service.name(), region = %region, "Checking service");

        let found = match service {
            AwsService::Ec2 => {
                let out = self
                    .aws(
                        scope,
                        region,
                        &[
                            "ec2",
                            "describe-instances",
                            "--filters",
                            "Name=instance-state-name,Values=running",
                        ],
                    )
                    .await?;
                extract_ec2(&out)
            }
            AwsService::Eip => {
                extract_eip(&self.aws(scope, region, &["ec2", "describe-addresses"]).await?)
            }
            AwsService::Elb => {
                extract_elb(&self.aws(scope, region, &["elbv2", "describe-load-balancers"]).await?)
            }
            AwsService::Acm => self.acm(scope, region).await?,
            AwsService::ApiGateway => {
                let apis = self.aws(scope, region, &["apigateway", "get-rest-apis"]).await?;
                let domains = self.aws(scope, region, &["apigateway", "get-domain-names"]).await?;
                extract_api_gateway(&apis, &domains, region)
            }
            AwsService::ApiGatewayV2 => {
                let apis = self.aws(scope, region, &["apigatewayv2", "get-apis"]).await?;
                extract_api_gateway_v2(&apis)
            }
            AwsService::Eks => self.eks(scope, region).await?,
            AwsService::Rds => {
                let instances = self.aws(scope, region, &["rds", "describe-db-instances"]).await?;
                let clusters = self.aws(scope, region, &["rds", "describe-db-clusters"]).await?;
                extract_rds(&instances, &clusters)
            }
            AwsService::OpenSearch => {
                let apps = self.aws(scope, region, &["opensearch", "list-applications"]).await?;
                extract_opensearch(&apps)
            }
            AwsService::Lambda => self.lambda(scope, region).await?,
            AwsService::S3 => self.s3(scope, region).await?,
            AwsService::Route53 => self.route53(scope, region).await?,
            AwsService::CloudFront => {
                let distributions = self
                    .aws(scope, region, &["cloudfront", "list-distributions"])
                    .await?;
                extract_cloudfront(&distributions)
            }
        };

        debug!(
            service = service.name(),
            region = %region,
            count = found.len(),
            "Service resources"
        );
        Ok(found)
    }

    async fn acm(&self, scope: &Scope, region: &str) -> Result<Vec<String>> {
        let out = self.aws(scope, region, &["acm", "list-certificates"]).await?;
        let mut resources = Vec::new();

        for summary in items_at(&out, "/CertificateSummaryList") {
            resources.extend(str_at(summary, "/DomainName").map(str::to_string));

            let truncated = summary
                .get("HasAdditionalSubjectAlternativeNames")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            if !truncated {
                resources.extend(strings(items_at(summary, "/SubjectAlternativeNameSummaries")));
                continue;
            }

            let Some(arn) = str_at(summary, "/CertificateArn") else {
                continue;
            };
            match self
                .aws(scope, region, &["acm", "describe-certificate", "--certificate-arn", arn])
                .await
            {
                Ok(detail) => resources.extend(strings(items_at(
                    &detail,
                    "/Certificate/SubjectAlternativeNames",
                ))),
                Err(e) => warn!(
                    certificate = %arn,
                    error = %e,
                    "Failed to get certificate detail, unable to add subject alternative names"
                ),
            }
        }

        Ok(resources)
    }

    async fn eks(&self, scope: &Scope, region: &str) -> Result<Vec<String>> {
        let out = self.aws(scope, region, &["eks", "list-clusters"]).await?;
        let mut resources = Vec::new();

        for name in strings(items_at(&out, "/clusters")) {
            let detail = self
                .aws(scope, region, &["eks", "describe-cluster", "--name", name.as_str()])
                .await
                .with_context(|| format!("aws: describing EKS cluster {}", name))?;
            resources.extend(str_at(&detail, "/cluster/endpoint").map(str::to_string));
        }

        Ok(resources)
    }

    async fn lambda(&self, scope: &Scope, region: &str) -> Result<Vec<String>> {
        let out = self.aws(scope, region, &["lambda", "list-functions"]).await?;
        let mut resources = Vec::new();

        for function in items_at(&out, "/Functions") {
            let Some(name) = str_at(function, "/FunctionName") else {
                continue;
            };

            match self
                .aws(scope, region, &["lambda", "get-function-url-config", "--function-name", name])
                .await
            {
                Ok(config) => resources.extend(str_at(&config, "/FunctionUrl").map(str::to_string)),
                // Most functions have no URL config
                Err(e) if e.to_string().contains("ResourceNotFoundException") => {}
                Err(e) => warn!(
                    function = %name,
                    error = %e,
                    "Failed to get function url config, unable to tell if it is public"
                ),
            }
        }

        Ok(resources)
    }

    /// Public buckets in a region, as website or REST endpoints
    async fn s3(&self, scope: &Scope, region: &str) -> Result<Vec<String>> {
        let out = self
            .aws(scope, region, &["s3api", "list-buckets", "--bucket-region", region])
            .await?;
        let mut resources = Vec::new();

        for bucket in items_at(&out, "/Buckets").iter().filter_map(|b| str_at(b, "/Name")) {
            let public = match self.bucket_is_public(scope, region, bucket).await {
                Ok(public) => public,
                Err(e) => {
                    warn!(
                        bucket = %bucket,
                        error = %e,
                        "Failed to determine if bucket is public, assuming it is"
                    );
                    true
                }
            };

            if !public {
                trace!(bucket = %bucket, "Skipping private bucket");
                continue;
            }

            let website = match self
                .aws(scope, region, &["s3api", "get-bucket-website", "--bucket", bucket])
                .await
            {
                Ok(_) => true,
                Err(e) if e.to_string().contains("NoSuchWebsiteConfiguration") => false,
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "Failed to get bucket website config");
                    false
                }
            };

            resources.push(bucket_endpoint(bucket, region, website));
        }

        Ok(resources)
    }

    /// Public when the access block is not fully on and either the ACL or
    /// the bucket policy grants access to everyone
    async fn bucket_is_public(&self, scope: &Scope, region: &str, bucket: &str) -> Result<bool> {
        match self
            .aws(scope, region, &["s3api", "get-public-access-block", "--bucket", bucket])
            .await
        {
            Ok(block) if access_block_is_complete(&block) => return Ok(false),
            Ok(_) => {}
            Err(e) if e.to_string().contains("NoSuchPublicAccessBlockConfiguration") => {}
            Err(e) => return Err(e.context("aws: getting public access block")),
        }

        let acl = self
            .aws(scope, region, &["s3api", "get-bucket-acl", "--bucket", bucket])
            .await
            .context("aws: getting bucket acl")?;
        if acl_grants_everyone(&acl) {
            return Ok(true);
        }

        match self
            .aws(scope, region, &["s3api", "get-bucket-policy-status", "--bucket", bucket])
            .await
        {
            Ok(status) => Ok(status
                .pointer("/PolicyStatus/IsPublic")
                .and_then(Value::as_bool)
                .unwrap_or(false)),
            Err(e) if e.to_string().contains("NoSuchBucketPolicy") => Ok(false),
            Err(e) => Err(e.context("aws: getting bucket policy status")),
        }
    }

    async fn route53(&self, scope: &Scope, region: &str) -> Result<Vec<String>> {
        let zones = self.aws(scope, region, &["route53", "list-hosted-zones"]).await?;
        let mut resources = Vec::new();

        for zone in items_at(&zones, "/HostedZones") {
            resources.extend(str_at(zone, "/Name").map(str::to_string));

            let Some(zone_id) = str_at(zone, "/Id") else {
                continue;
            };
            let records = self
                .aws(
                    scope,
                    region,
                    &["route53", "list-resource-record-sets", "--hosted-zone-id", zone_id],
                )
                .await
                .with_context(|| format!("aws: listing records of zone {}", zone_id))?;
            resources.extend(extract_route53_records(&records));
        }

        Ok(resources)
    }
}

#[async_trait]
impl CloudProviderAdapter for AwsProvider {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    async fn authenticate(&self) -> Result<()> {
        let identity = self
            .aws(&Scope::default(), &self.config.default_region, &["sts", "get-caller-identity"])
            .await
            .context("aws: get-caller-identity failed")?;

        let account = str_at(&identity, "/Account").context("aws: account not set")?;
        debug!(account = %account, "AWS authentication successful");
        Ok(())
    }

    async fn get_resources(&self) -> Result<Vec<String>> {
        let services = self.config.services.clone().unwrap_or_default();
        let mut resources = Vec::new();

        for scope in self.scopes().await? {
            let found = self
                .discover_scope(&scope, &services)
                .await
                .with_context(|| match &scope.account {
                    Some(account) => format!("failed to get resources for account {}", account),
                    None => "failed to get resources".to_string(),
                })?;
            resources.extend(found);
        }

        info!(resource_count = resources.len(), "Resource discovery complete");
        Ok(resources)
    }

    async fn get_api_key(&self) -> Result<Option<String>> {
        let Some(secret) = self.config.api_key_secret.as_deref() else {
            return Ok(None);
        };

        let out = self
            .aws(
                &Scope::default(),
                &self.config.default_region,
                &["secretsmanager", "get-secret-value", "--secret-id", secret],
            )
            .await
            .context("aws: getting secret")?;

        let key = str_at(&out, "/SecretString")
            .context("aws: secret string not set or secret is not formatted correctly")?;
        Ok(Some(key.trim().to_string()))
    }
}

fn strings(items: &[Value]) -> impl Iterator<Item = String> + '_ {
    items
        .iter()
        .filter_map(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn extract_active_accounts(output: &Value) -> Vec<String> {
    items_at(output, "/Accounts")
        .iter()
        .filter(|a| str_at(a, "/Status") != Some("SUSPENDED"))
        .filter_map(|a| str_at(a, "/Id"))
        .map(str::to_string)
        .collect()
}

fn extract_ec2(output: &Value) -> Vec<String> {
    items_at(output, "/Reservations")
        .iter()
        .flat_map(|r| items_at(r, "/Instances"))
        .flat_map(|i| [str_at(i, "/PublicDnsName"), str_at(i, "/PublicIpAddress")])
        .flatten()
        .map(str::to_string)
        .collect()
}

fn extract_eip(output: &Value) -> Vec<String> {
    items_at(output, "/Addresses")
        .iter()
        .filter_map(|a| str_at(a, "/PublicIp"))
        .map(str::to_string)
        .collect()
}

fn extract_elb(output: &Value) -> Vec<String> {
    items_at(output, "/LoadBalancers")
        .iter()
        .filter_map(|lb| str_at(lb, "/DNSName"))
        .map(str::to_string)
        .collect()
}

fn extract_api_gateway(apis: &Value, domains: &Value, region: &str) -> Vec<String> {
    let managed = items_at(apis, "/items")
        .iter()
        .filter_map(|api| str_at(api, "/id"))
        .map(|id| format!("{}.execute-api.{}.amazonaws.com", id, region));

    let custom = items_at(domains, "/items")
        .iter()
        .filter_map(|d| str_at(d, "/domainName"))
        .map(str::to_string);

    managed.chain(custom).collect()
}

fn extract_api_gateway_v2(output: &Value) -> Vec<String> {
    items_at(output, "/Items")
        .iter()
        .filter_map(|api| str_at(api, "/ApiEndpoint"))
        .map(str::to_string)
        .collect()
}

fn extract_rds(instances: &Value, clusters: &Value) -> Vec<String> {
    let instance_endpoints = items_at(instances, "/DBInstances")
        .iter()
        .filter_map(|db| str_at(db, "/Endpoint/Address"));

    let cluster_endpoints = items_at(clusters, "/DBClusters")
        .iter()
        .flat_map(|db| [str_at(db, "/Endpoint"), str_at(db, "/ReaderEndpoint")])
        .flatten();

    instance_endpoints
        .chain(cluster_endpoints)
        .map(str::to_string)
        .collect()
}

fn extract_opensearch(output: &Value) -> Vec<String> {
    items_at(output, "/ApplicationSummaries")
        .iter()
        .filter_map(|app| str_at(app, "/endpoint"))
        .map(str::to_string)
        .collect()
}

fn extract_route53_records(output: &Value) -> Vec<String> {
    items_at(output, "/ResourceRecordSets")
        .iter()
        .filter_map(|r| str_at(r, "/Name"))
        .map(str::to_string)
        .collect()
}

const ACCESS_BLOCK_FLAGS: [&str; 4] = [
    "BlockPublicAcls",
    "IgnorePublicAcls",
    "BlockPublicPolicy",
    "RestrictPublicBuckets",
];

fn access_block_is_complete(output: &Value) -> bool {
    let Some(block) = output.get("PublicAccessBlockConfiguration") else {
        return false;
    };
    ACCESS_BLOCK_FLAGS
        .iter()
        .all(|flag| block.get(flag).and_then(Value::as_bool).unwrap_or(false))
}

fn acl_grants_everyone(output: &Value) -> bool {
    items_at(output, "/Grants")
        .iter()
        .filter_map(|g| str_at(g, "/Grantee/URI"))
        .any(|uri| uri.ends_with("/global/AllUsers") || uri.ends_with("/global/AuthenticatedUsers"))
}

fn bucket_endpoint(bucket: &str, region: &str, website: bool) -> String {
    if website {
        format!("{}.s3-website-{}.amazonaws.com", bucket, region)
    } else {
        format!("{}.s3.{}.amazonaws.com", bucket, region)
    }
}

fn extract_cloudfront(output: &Value) -> Vec<String> {
    items_at(output, "/DistributionList/Items")
        .iter()
        .flat_map(|d| {
            str_at(d, "/DomainName").into_iter().chain(
                items_at(d, "/Origins/Items")
                    .iter()
                    .filter_map(|o| str_at(o, "/DomainName")),
            )
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::command::MockCommandRunner;
    use serde_json::json;

    #[test]
    fn test_extract_ec2() {
        let out = json!({"Reservations": [{"Instances": [
            {
                "PublicDnsName": "ec2-3-8-1-1.eu-west-2.compute.amazonaws.com",
                "PublicIpAddress": "3.8.1.1"
            },
            {"PublicDnsName": "", "PrivateIpAddress": "10.0.0.4"}
        ]}]});
        assert_eq!(
            extract_ec2(&out),
            vec!["ec2-3-8-1-1.eu-west-2.compute.amazonaws.com", "3.8.1.1"]
        );
    }

    #[test]
    fn test_extract_accounts_skips_suspended() {
        let out = json!({"Accounts": [
            {"Id": "111111111111", "Status": "ACTIVE"},
            {"Id": "222222222222", "Status": "SUSPENDED"},
            {"Id": "333333333333", "Status": "PENDING_CLOSURE"}
        ]});
        assert_eq!(extract_active_accounts(&out), vec!["111111111111", "333333333333"]);
    }

    #[test]
    fn test_extract_api_gateway() {
        let apis = json!({"items": [{"id": "a1b2c3"}]});
        let domains = json!({"items": [{"domainName": "api.example.com"}]});
        assert_eq!(
            extract_api_gateway(&apis, &domains, "eu-west-1"),
            vec!["a1b2c3.execute-api.eu-west-1.amazonaws.com", "api.example.com"]
        );
    }

    #[test]
    fn test_extract_rds() {
        let instances = json!({"DBInstances": [{
            "Endpoint": {"Address": "db1.abc.eu-west-1.rds.amazonaws.com", "Port": 5432}
        }]});
        let clusters = json!({"DBClusters": [{
            "Endpoint": "cl.cluster-abc.eu-west-1.rds.amazonaws.com",
            "ReaderEndpoint": "cl.cluster-ro-abc.eu-west-1.rds.amazonaws.com"
        }]});
        assert_eq!(extract_rds(&instances, &clusters).len(), 3);
    }

    #[test]
    fn test_extract_cloudfront_includes_origins() {
        let out = json!({"DistributionList": {"Items": [{
            "DomainName": "d111111abcdef8.cloudfront.net",
            "Origins": {"Items": [
                {"DomainName": "assets.s3.amazonaws.com"},
                {"DomainName": "origin.example.com"}
            ]}
        }]}});
        assert_eq!(
            extract_cloudfront(&out),
            vec![
                "d111111abcdef8.cloudfront.net",
                "assets.s3.amazonaws.com",
                "origin.example.com"
            ]
        );
        assert!(extract_cloudfront(&json!({"DistributionList": {"Quantity": 0}})).is_empty());
    }

    #[test]
    fn test_extract_simple_listings() {
        assert_eq!(
            extract_eip(&json!({"Addresses": [{"PublicIp": "52.1.1.1"}]})),
            vec!["52.1.1.1"]
        );
        assert_eq!(
            extract_elb(&json!({"LoadBalancers": [{"DNSName": "web-1.elb.amazonaws.com"}]})),
            vec!["web-1.elb.amazonaws.com"]
        );
        let v2 = json!({"Items": [
            {"ApiEndpoint": "https://x.execute-api.us-east-1.amazonaws.com"}
        ]});
        assert_eq!(
            extract_api_gateway_v2(&v2),
            vec!["https://x.execute-api.us-east-1.amazonaws.com"]
        );
        let search = json!({"ApplicationSummaries": [{"endpoint": "search.example.com"}]});
        assert_eq!(extract_opensearch(&search), vec!["search.example.com"]);
        assert_eq!(
            extract_route53_records(&json!({"ResourceRecordSets": [{"Name": "www.example.com."}]})),
            vec!["www.example.com."]
        );
    }

    fn provider(config: AwsConfig, runner: MockCommandRunner) -> AwsProvider {
        AwsProvider::new(config, Arc::new(runner))
    }

    fn config(services: AwsServices) -> AwsConfig {
        AwsConfig {
            enabled: true,
            services: Some(services),
            default_region: "us-east-1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_service_failure_does_not_stop_discovery() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run_json().returning(|_, args, _| {
            let region = args
                .iter()
                .position(|a| a == "--region")
                .map(|i| args[i + 1].clone())
                .unwrap_or_default();
            match (args[0].as_str(), args[1].as_str()) {
                ("ec2", "describe-regions") => Ok(json!({"Regions": [
                    {"RegionName": "us-east-1"}, {"RegionName": "eu-west-2"}
                ]})),
                ("ec2", "describe-addresses") if region == "eu-west-2" => {
                    Err(anyhow::anyhow!("UnauthorizedOperation"))
                }
                ("ec2", "describe-addresses") => {
                    Ok(json!({"Addresses": [{"PublicIp": "52.1.1.1"}]}))
                }
                ("route53", "list-hosted-zones") => Ok(json!({"HostedZones": [
                    {"Id": "/hostedzone/Z1", "Name": "example.com."}
                ]})),
                ("route53", "list-resource-record-sets") => Ok(json!({"ResourceRecordSets": [
                    {"Name": "www.example.com."}
                ]})),
                other => panic!("unexpected command {other:?}"),
            }
        });

        let aws = provider(
            config(AwsServices {
                check_eip: true,
                check_route53: true,
                ..Default::default()
            }),
            runner,
        );

        let resources = aws.get_resources().await.unwrap();
        assert_eq!(resources, vec!["52.1.1.1", "example.com.", "www.example.com."]);
    }

    #[tokio::test]
    async fn test_assumes_role_per_account() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run_json().returning(|_, args, envs| {
            match (args[0].as_str(), args[1].as_str()) {
                ("sts", "assume-role") => {
                    let arn = &args[3];
                    if arn.contains("222222222222") {
                        return Err(anyhow::anyhow!("AccessDenied"));
                    }
                    assert_eq!(arn, "arn:aws:iam::111111111111:role/SeedConnector");
                    Ok(json!({"Credentials": {
                        "AccessKeyId": "AKIA", "SecretAccessKey": "secret", "SessionToken": "token"
                    }}))
                }
                ("ec2", "describe-regions") => {
                    assert!(envs.contains(&("AWS_SESSION_TOKEN".to_string(), "token".to_string())));
                    Ok(json!({"Regions": [{"RegionName": "us-east-1"}]}))
                }
                ("elbv2", "describe-load-balancers") => {
                    Ok(json!({"LoadBalancers": [{"DNSName": "lb.elb.amazonaws.com"}]}))
                }
                other => panic!("unexpected command {other:?}"),
            }
        });

        let mut cfg = config(AwsServices {
            check_elb: true,
            ..Default::default()
        });
        cfg.accounts = vec!["111111111111".to_string(), "222222222222".to_string()];
        cfg.assume_role = Some("SeedConnector".to_string());

        let resources = provider(cfg, runner).get_resources().await.unwrap();
        assert_eq!(resources, vec!["lb.elb.amazonaws.com"]);
    }

    #[tokio::test]
    async fn test_region_listing_failure_is_fatal() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run_json()
            .returning(|_, _, _| Err(anyhow::anyhow!("ExpiredToken")));

        let aws = provider(config(AwsServices::default()), runner);
        assert!(aws.get_resources().await.is_err());
    }

    #[test]
    fn test_access_block_and_acl() {
        let full = json!({"PublicAccessBlockConfiguration": {
            "BlockPublicAcls": true,
            "IgnorePublicAcls": true,
            "BlockPublicPolicy": true,
            "RestrictPublicBuckets": true
        }});
        assert!(access_block_is_complete(&full));

        let partial = json!({"PublicAccessBlockConfiguration": {
            "BlockPublicAcls": true,
            "IgnorePublicAcls": true,
            "BlockPublicPolicy": false,
            "RestrictPublicBuckets": true
        }});
        assert!(!access_block_is_complete(&partial));
        assert!(!access_block_is_complete(&json!({})));

        let public = json!({"Grants": [
            {"Grantee": {"Type": "CanonicalUser", "ID": "abc"}, "Permission": "FULL_CONTROL"},
            {"Grantee": {"Type": "Group", "URI": "http://acs.amazonaws.com/groups/global/AllUsers"},
             "Permission": "READ"}
        ]});
        assert!(acl_grants_everyone(&public));

        let logging = json!({"Grants": [
            {"Grantee": {"Type": "Group", "URI": "http://acs.amazonaws.com/groups/s3/LogDelivery"}}
        ]});
        assert!(!acl_grants_everyone(&logging));
    }

    #[test]
    fn test_bucket_endpoint() {
        assert_eq!(
            bucket_endpoint("site", "eu-west-1", true),
            "site.s3-website-eu-west-1.amazonaws.com"
        );
        assert_eq!(bucket_endpoint("data", "us-east-1", false), "data.s3.us-east-1.amazonaws.com");
    }

    #[tokio::test]
    async fn test_s3_reports_public_buckets_only() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run_json().returning(|_, args, _| {
            let bucket = args
                .iter()
                .position(|a| a == "--bucket")
                .map(|i| args[i + 1].clone())
                .unwrap_or_default();
            match (args[1].as_str(), bucket.as_str()) {
                ("describe-regions", _) => Ok(json!({"Regions": [{"RegionName": "eu-west-1"}]})),
                ("list-buckets", _) => {
                    assert_eq!(args[3], "eu-west-1");
                    Ok(json!({"Buckets": [
                        {"Name": "site"}, {"Name": "locked"}, {"Name": "shared"},
                        {"Name": "internal"}, {"Name": "unknown"}
                    ]}))
                }
                ("get-public-access-block", "locked") => Ok(json!({
                    "PublicAccessBlockConfiguration": {
                        "BlockPublicAcls": true,
                        "IgnorePublicAcls": true,
                        "BlockPublicPolicy": true,
                        "RestrictPublicBuckets": true
                    }
                })),
                ("get-public-access-block", "unknown") => Err(anyhow::anyhow!("AccessDenied")),
                ("get-public-access-block", _) => Err(anyhow::anyhow!(
                    "An error occurred (NoSuchPublicAccessBlockConfiguration)"
                )),
                ("get-bucket-acl", "site") => Ok(json!({"Grants": [{"Grantee": {
                    "Type": "Group",
                    "URI": "http://acs.amazonaws.com/groups/global/AllUsers"
                }}]})),
                ("get-bucket-acl", _) => Ok(json!({"Grants": []})),
                ("get-bucket-policy-status", "shared") => {
                    Ok(json!({"PolicyStatus": {"IsPublic": true}}))
                }
                ("get-bucket-policy-status", _) => {
                    Err(anyhow::anyhow!("An error occurred (NoSuchBucketPolicy)"))
                }
                ("get-bucket-website", "site") => {
                    Ok(json!({"IndexDocument": {"Suffix": "index.html"}}))
                }
                ("get-bucket-website", _) => {
                    Err(anyhow::anyhow!("An error occurred (NoSuchWebsiteConfiguration)"))
                }
                other => panic!("unexpected command {other:?}"),
            }
        });

        let aws = provider(
            config(AwsServices {
                check_s3: true,
                ..Default::default()
            }),
            runner,
        );

        let resources = aws.get_resources().await.unwrap();
        assert_eq!(
            resources,
            vec![
                "site.s3-website-eu-west-1.amazonaws.com",
                "shared.s3.eu-west-1.amazonaws.com",
                "unknown.s3.eu-west-1.amazonaws.com",
            ]
        );
    }

    #[tokio::test]
    async fn test_api_key_from_secret() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run_json()
            .withf(|program, args, _| {
                let expected = ["secretsmanager", "get-secret-value", "--secret-id", "asm/api-key"];
                program == "aws" && args[..4] == expected
            })
            .times(1)
            .returning(|_, _, _| Ok(json!({"SecretString": "key-123\n"})));

        let mut cfg = config(AwsServices::default());
        cfg.api_key_secret = Some("asm/api-key".to_string());

        let key = provider(cfg, runner).get_api_key().await.unwrap();
        assert_eq!(key.as_deref(), Some("key-123"));
    }

    #[tokio::test]
    async fn test_no_secret_means_no_api_key() {
        let aws = provider(config(AwsServices::default()), MockCommandRunner::new());
        assert!(aws.get_api_key().await.unwrap().is_none());
    }
}
