//! Tracing subscriber setup shared by the binaries

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Env var holding the filter directive, e.g. `info` or `cloud_seed_connector=debug`
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

const DEFAULT_DIRECTIVE: &str = "info";

/// Build the level filter from `LOG_LEVEL`, defaulting to `info`
pub fn filter_from(directive: Option<&str>) -> Result<EnvFilter> {
    let directive = directive
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVE);

    EnvFilter::try_new(directive)
        .map_err(|e| anyhow!("Invalid {} '{}': {}", LOG_LEVEL_ENV, directive, e))
}

/// Install the global subscriber: JSON lines, or human-readable when `debug`
pub fn init(debug: bool) -> Result<()> {
    let filter = filter_from(std::env::var(LOG_LEVEL_ENV).ok().as_deref())?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if debug {
        builder.pretty().try_init()
    } else {
        builder.json().try_init()
    };

    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(filter_from(None).unwrap().to_string(), "info");
        assert_eq!(filter_from(Some("  ")).unwrap().to_string(), "info");
    }

    #[test]
    fn test_custom_filter() {
        assert_eq!(filter_from(Some("debug")).unwrap().to_string(), "debug");
    }

    #[test]
    fn test_invalid_filter() {
        let err = filter_from(Some("cloud_seed_connector=loud")).unwrap_err();
        assert!(err.to_string().contains("LOG_LEVEL"));
    }
}
