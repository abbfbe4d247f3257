//! Seed Connector - Standalone Binary
//!
//! Discovers public cloud resources and syncs them into a scan's seeds,
//! once or on an interval.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::time::interval;
use tracing::{error, info, info_span, warn};

use cloud_seed_connector::config::Config;
use cloud_seed_connector::connector::{Connector, SyncOptions};
use cloud_seed_connector::inventory::AsmClient;
use cloud_seed_connector::providers::MultiCloudProviders;
use cloud_seed_connector::run::{RunOutcome, RunSummary};
use cloud_seed_connector::telemetry;
use cloud_seed_connector::version::{self, VersionChecker};

/// Seed Connector - syncs cloud resources into scan seeds
#[derive(Parser, Debug)]
#[command(name = "seed-connector", version, about)]
struct Args {
    /// Config file, used when CONNECTOR_CONFIG is unset
    #[arg(long, default_value = "./config.yml")]
    config: PathBuf,

    /// Human-readable logs instead of JSON
    #[arg(long, default_value = "false")]
    debug: bool,

    /// Sync interval in seconds; runs once and exits when absent
    #[arg(long, env = "SYNC_INTERVAL")]
    interval: Option<u64>,

    /// Dry run - compute the plan without changing any seeds
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Latest-release endpoint for the startup version check
    #[arg(long, env = "RELEASE_URL", default_value = version::LATEST_RELEASE_URL)]
    release_url: String,

    /// Skip the startup version check
    #[arg(long, default_value = "false")]
    skip_version_check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    telemetry::init(args.debug)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        interval = ?args.interval,
        dry_run = args.dry_run,
        "Starting Seed Connector"
    );

    if !args.skip_version_check {
        match VersionChecker::new(&args.release_url, Duration::from_secs(10)) {
            Ok(checker) => checker.log_version(version::CURRENT_VERSION).await,
            Err(e) => warn!(error = %e, "Could not init version checker"),
        }
    }

    match args.interval {
        None => run_sync(&args).await?,
        Some(0) => bail!("SYNC_INTERVAL must be at least one second"),
        Some(secs) => {
            let mut ticker = interval(Duration::from_secs(secs));

            loop {
                ticker.tick().await;

                if let Err(e) = run_sync(&args).await {
                    error!(error = %format!("{:#}", e), "Sync cycle failed");
                }
            }
        }
    }

    Ok(())
}

/// Inventory API key: a provider-held key wins over `API_KEY`
async fn resolve_api_key(providers: &MultiCloudProviders) -> Result<String> {
    if let Some(key) = providers.api_key().await? {
        return Ok(key);
    }

    match std::env::var("API_KEY") {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => bail!("API_KEY must be set when no cloud provider supplies one"),
    }
}

/// Run a single sync cycle
async fn run_sync(args: &Args) -> Result<()> {
    let started_at = Utc::now();

    // Reloaded every cycle so config edits apply without a restart
    let config = Config::load(&args.config)?;

    let providers = MultiCloudProviders::from_config(&config)?;
    providers.authenticate_all().await?;

    let api_key = resolve_api_key(&providers).await?;
    let client = AsmClient::new(
        &config.api.base_url,
        api_key,
        config.http.timeout(),
        config.http.retry_policy(),
    )?;

    let provider_names = providers
        .providers()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let span = info_span!(
        "sync",
        scan_id = %config.scan_id,
        cloud_provider = %provider_names
    );

    let connector = Connector::new(
        SyncOptions {
            scan_id: config.scan_id.clone(),
            seed_tag: config.seed_tag.clone(),
            delete_stale: config.delete_stale_seeds,
        },
        Box::new(client),
        span,
    );

    connector.authenticate().await?;

    let resources = providers.discover_all_resources().await?;
    let discovered = resources.len();
    info!(count = discovered, "Discovered cloud resources");

    let outcome = if args.dry_run {
        RunOutcome::planned(connector.plan(resources).await?)
    } else {
        RunOutcome::Synced(connector.sync_resources(resources).await?)
    };

    let summary = RunSummary::finish(
        &config.scan_id,
        started_at,
        providers.providers(),
        discovered,
        outcome,
    );
    println!("{}", summary.to_json().context("Failed to encode run summary")?);
    info!(elapsed_ms = summary.elapsed_ms(), "Sync cycle finished");

    Ok(())
}
