//! Release version check
//!
//! Compares the running build against the latest published release. Any
//! failure is logged and ignored; it never stops a sync.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use semver::Version;
use serde::Deserialize;
use tracing::{info, warn};

pub const LATEST_RELEASE_URL: &str =
    "https://api.github.com/repos/hexiosec/asm-cloud-connector/releases/latest";

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

const USER_AGENT: &str = concat!("cloud-seed-connector/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

/// `remote > current`, ignoring a leading `v` on either side
pub fn is_newer(remote: &str, current: &str) -> Result<bool> {
    let parse = |v: &str| {
        Version::parse(v.strip_prefix('v').unwrap_or(v))
            .with_context(|| format!("version: failed to parse {}", v))
    };
    Ok(parse(remote)? > parse(current)?)
}

pub struct VersionChecker {
    http: Client,
    url: String,
}

impl VersionChecker {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Latest release tag, or `None` when nothing has been released
    pub async fn latest(&self) -> Result<Option<String>> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("version: release request failed")?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status != StatusCode::OK {
            bail!("version: received non-200 code {}", status.as_u16());
        }

        let release: Release = response
            .json()
            .await
            .context("version: failed to decode release")?;
        if release.tag_name.trim().is_empty() {
            bail!("version: release has no tag");
        }

        Ok(Some(release.tag_name))
    }

    /// Log whether a newer release exists than `current`
    pub async fn log_version(&self, current: &str) {
        let remote = match self.latest().await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                info!(current = %current, "No release found, assuming latest version");
                return;
            }
            Err(e) => {
                warn!(current = %current, error = %e, "Failed to get latest version");
                return;
            }
        };

        match is_newer(&remote, current) {
            Ok(true) => warn!(current = %current, remote = %remote, "New version available"),
            Ok(false) => info!(current = %current, "Running latest version"),
            Err(e) => warn!(
                current = %current,
                remote = %remote,
                error = %e,
                "Failed to compare current and remote version"
            ),
        }
    }
}
