//! Manual Sync - Standalone Binary
//!
//! Reconciles an explicit list of resources against a scan's seeds, without
//! any cloud discovery.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser};
use tracing::{info, info_span};

use cloud_seed_connector::connector::{Connector, SyncOptions};
use cloud_seed_connector::inventory::{AsmClient, RetryPolicy};
use cloud_seed_connector::run::{RunOutcome, RunSummary};
use cloud_seed_connector::telemetry;

/// Manual Sync - push a resource list into scan seeds
#[derive(Parser, Debug)]
#[command(name = "manual-sync", version, about)]
struct Args {
    /// Scan whose seeds are reconciled
    #[arg(long, env = "SCAN_ID")]
    scan_id: String,

    /// Tag applied to created seeds and required for deletion
    #[arg(long, alias = "seed-label")]
    seed_tag: String,

    /// Delete tagged seeds missing from the resource list
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    delete_stale_seeds: bool,

    /// Inventory API base URL
    #[arg(long, env = "ASM_API_URL")]
    api_url: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Human-readable logs instead of JSON
    #[arg(long, default_value = "false")]
    debug: bool,

    /// Dry run - compute the plan without changing any seeds
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Domains, IPs or URLs to sync
    #[arg(required = true, num_args = 1..)]
    resources: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    telemetry::init(args.debug)?;

    let started_at = Utc::now();

    let api_key = match std::env::var("API_KEY") {
        Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
        _ => bail!("API_KEY must be set"),
    };

    let client = AsmClient::new(
        &args.api_url,
        api_key,
        Duration::from_secs(args.timeout),
        RetryPolicy::default(),
    )?;

    let span = info_span!("manual_sync", scan_id = %args.scan_id);
    let connector = Connector::new(
        SyncOptions {
            scan_id: args.scan_id.clone(),
            seed_tag: args.seed_tag.clone(),
            delete_stale: args.delete_stale_seeds,
        },
        Box::new(client),
        span,
    );

    connector.authenticate().await?;

    let discovered = args.resources.len();
    info!(count = discovered, dry_run = args.dry_run, "Syncing resources");

    let outcome = if args.dry_run {
        RunOutcome::planned(connector.plan(args.resources).await?)
    } else {
        RunOutcome::Synced(connector.sync_resources(args.resources).await?)
    };

    let summary = RunSummary::finish(&args.scan_id, started_at, Vec::new(), discovered, outcome);
    println!("{}", summary.to_json().context("Failed to encode run summary")?);

    Ok(())
}
