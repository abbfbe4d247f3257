//! Connector Configuration
//!
//! YAML configuration, read from the `CONNECTOR_CONFIG` env var or a file,
//! with env overrides for the scan scope.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::inventory::RetryPolicy;

pub const CONFIG_ENV: &str = "CONNECTOR_CONFIG";
pub const DEFAULT_SEED_TAG: &str = "cloud-connector";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config: CONNECTOR_CONFIG is set but empty")]
    EmptyEnv,

    #[error("config: no configuration found: CONNECTOR_CONFIG not set and file {0} not found")]
    NotFound(String),

    #[error("config: failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config: failed to parse {origin} as YAML: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config: invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("config: validation failed for {origin}: {reason}")]
    Invalid { origin: String, reason: String },
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan_id: String,
    #[serde(default)]
    pub seed_tag: String,
    #[serde(default)]
    pub delete_stale_seeds: bool,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub aws: Option<AwsConfig>,
    pub azure: Option<AzureConfig>,
    pub gcp: Option<GcpConfig>,
}

/// Inventory API endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: String,
}

/// HTTP client behaviour; zero values are replaced by defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_base_delay_ms: u64,
    #[serde(default)]
    pub retry_max_delay_ms: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry_count,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub list_all_accounts: bool,
    #[serde(default)]
    pub accounts: Vec<String>,
    pub assume_role: Option<String>,
    pub services: Option<AwsServices>,
    /// Secrets Manager secret holding the inventory API key
    pub api_key_secret: Option<String>,
    #[serde(default)]
    pub default_region: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AwsServices {
    pub check_ec2: bool,
    pub check_eip: bool,
    pub check_elb: bool,
    pub check_s3: bool,
    pub check_acm: bool,
    pub check_route53: bool,
    pub check_cloudfront: bool,
    pub check_api_gateway: bool,
    pub check_api_gateway_v2: bool,
    pub check_eks: bool,
    pub check_rds: bool,
    pub check_opensearch: bool,
    pub check_lambda: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AzureConfig {
    #[serde(default)]
    pub enabled: bool,
    pub services: Option<AzureServices>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AzureServices {
    pub check_public_ip_addresses: bool,
    pub check_application_gateways: bool,
    pub check_application_gateway_certificates: bool,
    pub check_front_door_classic: bool,
    pub check_front_door_afd: bool,
    pub check_traffic_manager: bool,
    pub check_dns_zones: bool,
    pub check_dns_records: bool,
    pub check_storage_static_websites: bool,
    pub check_cdn_endpoints: bool,
    pub check_app_services: bool,
    pub check_sql_servers: bool,
    pub check_cosmos_db: bool,
    pub check_redis_cache: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GcpConfig {
    #[serde(default)]
    pub enabled: bool,
    pub services: Option<GcpServices>,
    /// Projects to inventory, as `projects/<number>`
    #[serde(default)]
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GcpServices {
    pub check_dns_resource_record_set: bool,
    pub check_dns_managed_zone: bool,
    pub check_compute_instance: bool,
    pub check_compute_address: bool,
    pub check_storage_bucket: bool,
    pub check_cloud_function: bool,
    pub check_run_service: bool,
    pub check_run_domain_mapping: bool,
    pub check_api_gateway: bool,
    pub check_sql_instance: bool,
    pub check_compute_forwarding_rule: bool,
    pub check_compute_global_forwarding_rule: bool,
    pub check_compute_url_map: bool,
    pub check_app_engine_service: bool,
    pub check_gke_cluster: bool,
    pub check_certificates: bool,
}

impl Config {
    /// Load from `CONNECTOR_CONFIG` if set, else from `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| env::var(key).ok())
    }

    /// Load using `lookup` for environment variables
    pub fn load_with<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (raw, origin) = match lookup(CONFIG_ENV) {
            Some(raw) => {
                info!("Loading config from {} env var", CONFIG_ENV);
                if raw.trim().is_empty() {
                    return Err(ConfigError::EmptyEnv);
                }
                (raw, CONFIG_ENV.to_string())
            }
            None => {
                let shown = path.display().to_string();
                info!(path = %shown, "Loading config from file");
                let raw = std::fs::read_to_string(path).map_err(|source| {
                    if source.kind() == std::io::ErrorKind::NotFound {
                        ConfigError::NotFound(shown.clone())
                    } else {
                        ConfigError::Read {
                            path: shown.clone(),
                            source,
                        }
                    }
                })?;
                (raw, shown)
            }
        };

        let mut config: Config =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                origin: origin.clone(),
                source,
            })?;

        config.apply_env(&lookup)?;
        config.apply_defaults();
        config
            .validate()
            .map_err(|reason| ConfigError::Invalid { origin, reason })?;

        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(scan_id) = lookup("SCAN_ID") {
            self.scan_id = scan_id;
        }
        if let Some(seed_tag) = lookup("SEED_TAG") {
            self.seed_tag = seed_tag;
        }
        if let Some(flag) = lookup("DELETE_STALE_SEEDS") {
            self.delete_stale_seeds = parse_bool(&flag).ok_or(ConfigError::InvalidEnv {
                var: "DELETE_STALE_SEEDS",
                value: flag,
            })?;
        }
        if let Some(base_url) = lookup("ASM_API_URL") {
            self.api.base_url = base_url;
        }
        Ok(())
    }

    fn apply_defaults(&mut self) {
        if self.seed_tag.is_empty() {
            self.seed_tag = DEFAULT_SEED_TAG.to_string();
        }
        if self.http.timeout_secs == 0 {
            self.http.timeout_secs = 30;
        }
        if self.http.retry_count == 0 {
            self.http.retry_count = 4;
        }
        if self.http.retry_base_delay_ms == 0 {
            self.http.retry_base_delay_ms = 1_000;
        }
        if self.http.retry_max_delay_ms == 0 {
            self.http.retry_max_delay_ms = 5_000;
        }
        if let Some(aws) = self.aws.as_mut() {
            if aws.default_region.is_empty() {
                aws.default_region = "us-east-1".to_string();
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.scan_id.trim().is_empty() {
            return Err("scan_id is required".to_string());
        }
        if self.api.base_url.trim().is_empty() {
            return Err("api.base_url is required".to_string());
        }
        url::Url::parse(&self.api.base_url)
            .map_err(|e| format!("api.base_url is not a valid url: {e}"))?;

        if self.aws.is_none() && self.azure.is_none() && self.gcp.is_none() {
            return Err("one of aws, azure or gcp must be configured".to_string());
        }

        if self.http.retry_max_delay_ms < self.http.retry_base_delay_ms {
            return Err("http.retry_max_delay_ms must not be below retry_base_delay_ms".to_string());
        }

        if let Some(aws) = &self.aws {
            if (aws.list_all_accounts || !aws.accounts.is_empty())
                && aws.assume_role.as_deref().map_or(true, str::is_empty)
            {
                return Err(
                    "aws.assume_role is required with accounts or list_all_accounts".to_string(),
                );
            }
            if aws.enabled && aws.services.is_none() {
                return Err("aws.services is required when aws is enabled".to_string());
            }
        }

        if let Some(azure) = &self.azure {
            if azure.enabled && azure.services.is_none() {
                return Err("azure.services is required when azure is enabled".to_string());
            }
        }

        if let Some(gcp) = &self.gcp {
            if gcp.enabled {
                if gcp.services.is_none() {
                    return Err("gcp.services is required when gcp is enabled".to_string());
                }
                if gcp.projects.is_empty() {
                    return Err(
                        "gcp.projects needs at least one project when gcp is enabled".to_string(),
                    );
                }
            }
            if let Some(bad) = gcp.projects.iter().find(|p| !is_gcp_project(p)) {
                return Err(format!("gcp project {bad} must look like projects/<number>"));
            }
        }

        Ok(())
    }
}

fn is_gcp_project(value: &str) -> bool {
    value
        .strip_prefix("projects/")
        .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Some(true),
        "0" | "f" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const MINIMAL: &str = r#"
scan_id: scan-123
api:
  base_url: https://inventory.example.com/api
gcp:
  enabled: true
  projects: ["projects/641674919469"]
  services:
    check_compute_instance: true
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn from_env_yaml(yaml: &str) -> Result<Config, ConfigError> {
        Config::load_with(Path::new("/nonexistent/config.yml"), env(&[(CONFIG_ENV, yaml)]))
    }

    #[test]
    fn test_defaults_applied() {
        let config = from_env_yaml(MINIMAL).unwrap();
        assert_eq!(config.seed_tag, DEFAULT_SEED_TAG);
        assert!(!config.delete_stale_seeds);
        assert_eq!(config.http.retry_count, 4);
        assert_eq!(config.http.retry_policy().base_delay, Duration::from_secs(1));
        assert_eq!(config.http.retry_policy().max_delay, Duration::from_secs(5));
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert!(config.gcp.unwrap().services.unwrap().check_compute_instance);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load_with(file.path(), env(&[])).unwrap();
        assert_eq!(config.scan_id, "scan-123");
    }

    #[test]
    fn test_missing_file_names_both_sources() {
        let err = Config::load_with(Path::new("/nonexistent/config.yml"), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        let msg = err.to_string();
        assert!(msg.contains(CONFIG_ENV));
        assert!(msg.contains("/nonexistent/config.yml"));
    }

    #[test]
    fn test_empty_env_config_rejected() {
        assert!(matches!(from_env_yaml("   "), Err(ConfigError::EmptyEnv)));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::load_with(
            Path::new("unused"),
            env(&[
                (CONFIG_ENV, MINIMAL),
                ("SCAN_ID", "scan-override"),
                ("SEED_TAG", "team-a"),
                ("DELETE_STALE_SEEDS", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.scan_id, "scan-override");
        assert_eq!(config.seed_tag, "team-a");
        assert!(config.delete_stale_seeds);
    }

    #[test]
    fn test_api_url_required_and_overridable() {
        let without = MINIMAL.replace("api:\n  base_url: https://inventory.example.com/api\n", "");
        let err = from_env_yaml(&without).unwrap_err();
        assert!(err.to_string().contains("api.base_url is required"));

        let config = Config::load_with(
            Path::new("unused"),
            env(&[
                (CONFIG_ENV, without.as_str()),
                ("ASM_API_URL", "https://eu.inventory.example.com"),
            ]),
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://eu.inventory.example.com");

        let bad = MINIMAL.replace("https://inventory.example.com/api", "not a url");
        let err = from_env_yaml(&bad).unwrap_err();
        assert!(err.to_string().contains("not a valid url"));
    }

    #[test]
    fn test_bad_bool_override() {
        let err = Config::load_with(
            Path::new("unused"),
            env(&[(CONFIG_ENV, MINIMAL), ("DELETE_STALE_SEEDS", "maybe")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_requires_a_provider() {
        let err =
            from_env_yaml("scan_id: s\napi:\n  base_url: https://x.example.com\n").unwrap_err();
        assert!(err.to_string().contains("one of aws, azure or gcp"));
    }

    #[test]
    fn test_gcp_project_format() {
        let yaml = MINIMAL.replace("projects/641674919469", "my-project");
        let err = from_env_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("projects/<number>"));
    }

    #[test]
    fn test_aws_assume_role_required_for_accounts() {
        let yaml = r#"
scan_id: scan-123
api:
  base_url: https://inventory.example.com/api
aws:
  enabled: true
  accounts: ["111111111111"]
  services:
    check_ec2: true
"#;
        let err = from_env_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("assume_role"));

        let ok = yaml.replace("  accounts:", "  assume_role: SeedConnector\n  accounts:");
        let config = from_env_yaml(&ok).unwrap();
        assert_eq!(config.aws.unwrap().default_region, "us-east-1");
    }

    #[test]
    fn test_enabled_provider_needs_services() {
        let yaml = "scan_id: s\napi:\n  base_url: https://x.example.com\nazure:\n  enabled: true\n";
        let err = from_env_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("azure.services"));
    }

    #[test]
    fn test_parse_error_names_origin() {
        let err = from_env_yaml("scan_id: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref origin, .. } if origin == CONFIG_ENV));
    }
}
