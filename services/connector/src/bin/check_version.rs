//! Check Version - Standalone Binary
//!
//! Logs whether a newer connector release is available, then exits.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cloud_seed_connector::telemetry;
use cloud_seed_connector::version::{self, VersionChecker};

/// Check Version - compare this build with the latest release
#[derive(Parser, Debug)]
#[command(name = "check-version", version, about)]
struct Args {
    /// Latest-release endpoint
    #[arg(long, env = "RELEASE_URL", default_value = version::LATEST_RELEASE_URL)]
    release_url: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Human-readable logs instead of JSON
    #[arg(long, default_value = "false")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    telemetry::init(args.debug)?;

    info!("Starting version check");
    let checker = VersionChecker::new(&args.release_url, Duration::from_secs(args.timeout))?;
    checker.log_version(version::CURRENT_VERSION).await;
    info!("Done");

    Ok(())
}
