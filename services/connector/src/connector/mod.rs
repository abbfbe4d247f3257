//! Seed Reconciliation Engine
//!
//! Keeps a scan's seed list in step with what cloud discovery found:
//! dedupe → normalize → dedupe → diff against one inventory snapshot →
//! create missing seeds → optionally delete stale connector-owned seeds.
//!
//! Failures are classified as they happen:
//! - a resource that cannot be normalized is logged and dropped
//! - failing to read the current seeds aborts the run
//! - a creation refused with a known error code is logged and skipped
//! - any other creation failure aborts the run
//! - deletions are best effort

pub mod classify;
pub mod dedup;
pub mod index;
pub mod normalize;
pub mod types;

use tracing::{debug, debug_span, error, info, trace, warn, Instrument, Span};

use crate::inventory::{CreateSeedRequest, SeedInventory};
use classify::{classify_create_failure, CreateFailure};
use dedup::dedup;
use index::SeedIndex;
use normalize::normalize_all;
use types::{ResourceKind, StaleSeed, SyncError, SyncPlan, SyncReport};

pub use normalize::{normalize_resource, NormalizeError};
pub use types::NormalizedResource;

/// Scope and behaviour of a sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub scan_id: String,
    /// Tag applied to created seeds, and required on a seed before it is deleted
    pub seed_tag: String,
    pub delete_stale: bool,
}

/// Reconciles discovered resources against a scan's seeds
pub struct Connector {
    options: SyncOptions,
    inventory: Box<dyn SeedInventory>,
    span: Span,
}

impl Connector {
    /// Create a connector. Every event it emits is recorded under `span`.
    pub fn new(options: SyncOptions, inventory: Box<dyn SeedInventory>, span: Span) -> Self {
        Self {
            options,
            inventory,
            span,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Check the credentials are accepted and the scan exists
    pub async fn authenticate(&self) -> Result<(), SyncError> {
        async {
            let state = self
                .inventory
                .get_state()
                .await
                .map_err(SyncError::AuthState)?;

            if !state.authenticated {
                return Err(SyncError::NotAuthenticated);
            }

            let scan = self
                .inventory
                .get_scan(&self.options.scan_id)
                .await
                .map_err(|source| SyncError::ScanLookup {
                    scan_id: self.options.scan_id.clone(),
                    source,
                })?;

            info!(scan_name = ?scan.name, "Authenticated with inventory");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Work out what a sync would do, without changing the inventory
    pub async fn plan(&self, resources: Vec<String>) -> Result<SyncPlan, SyncError> {
        self.build_plan(resources)
            .instrument(self.span.clone())
            .await
    }

    /// Bring the scan's seeds in line with `resources`.
    ///
    /// Returns an error only for conditions that make continuing unsafe.
    pub async fn sync_resources(&self, resources: Vec<String>) -> Result<SyncReport, SyncError> {
        async {
            let plan = self.build_plan(resources).await?;
            let report = self.apply(plan).await?;

            info!(
                created = report.created,
                unchanged = report.unchanged,
                rejected = report.rejected,
                unsupported = report.unsupported,
                not_normalized = report.not_normalized,
                deleted = report.deleted,
                delete_failed = report.delete_failed,
                retained = report.retained,
                "Seed sync complete"
            );

            Ok(report)
        }
        .instrument(self.span.clone())
        .await
    }

    async fn build_plan(&self, resources: Vec<String>) -> Result<SyncPlan, SyncError> {
        let raw = dedup(resources);
        let normalized = normalize_all(raw, &self.span);
        let working = dedup(normalized.resources);

        let seeds = self
            .inventory
            .get_scan_seeds(&self.options.scan_id)
            .await
            .map_err(|source| SyncError::FetchSeeds {
                scan_id: self.options.scan_id.clone(),
                source,
            })?;

        let mut existing = SeedIndex::from_seeds(seeds);
        debug!(
            existing = existing.len(),
            resources = working.len(),
            "Fetched existing seeds"
        );

        let mut plan = SyncPlan {
            not_normalized: normalized.failed,
            ..Default::default()
        };

        for resource in working {
            trace!(resource = %resource.value, "Processing resource");

            if existing.take(&resource.value).is_some() {
                debug!(resource = %resource.value, "Seed already exists");
                plan.unchanged.push(resource.value);
                continue;
            }

            if resource.kind == ResourceKind::Ipv6 {
                warn!(resource = %resource.value, "Cannot add IPv6 as seed, skipping");
                plan.unsupported.push(resource.value);
                continue;
            }

            plan.create.push(resource);
        }

        for seed in existing.into_remaining() {
            if seed.has_tag(&self.options.seed_tag) {
                plan.stale.push(StaleSeed {
                    id: seed.id,
                    name: seed.name,
                });
            } else {
                debug!(
                    seed = %seed.name,
                    seed_tag = %self.options.seed_tag,
                    "Seed lacks connector tag, probably added manually"
                );
                plan.retained.push(seed.name);
            }
        }

        Ok(plan)
    }

    async fn apply(&self, plan: SyncPlan) -> Result<SyncReport, SyncError> {
        let scan_id = &self.options.scan_id;
        let mut report = SyncReport {
            unchanged: plan.unchanged.len(),
            unsupported: plan.unsupported.len(),
            not_normalized: plan.not_normalized,
            retained: plan.retained.len(),
            ..Default::default()
        };

        for resource in plan.create {
            let span = debug_span!("seed", resource = %resource.value, kind = %resource.kind);
            let request = CreateSeedRequest {
                name: resource.value.clone(),
                kind: resource.kind,
                tags: vec![self.options.seed_tag.clone()],
            };

            debug!(parent: &span, "Adding seed");
            let result = self
                .inventory
                .add_scan_seed(scan_id, &request)
                .instrument(span.clone())
                .await;

            let Err(err) = result else {
                report.created += 1;
                continue;
            };

            match classify_create_failure(&err) {
                CreateFailure::Rejected { code } => {
                    warn!(
                        parent: &span,
                        code = %code,
                        error = %err,
                        "Inventory refused seed, skipping"
                    );
                    report.rejected += 1;
                }
                CreateFailure::Fatal(reason) => {
                    if let Some(reason) = reason {
                        error!(
                            parent: &span,
                            error = %reason,
                            "Failed to read error code explaining why the seed was not added"
                        );
                    }
                    return Err(SyncError::CreateSeed {
                        resource: resource.value,
                        source: err,
                    });
                }
            }
        }

        if !self.options.delete_stale {
            trace!(stale = plan.stale.len(), "Not deleting stale seeds");
            report.retained += plan.stale.len();
            return Ok(report);
        }

        for seed in plan.stale {
            debug!(seed = %seed.name, "Removing stale seed");
            match self.inventory.remove_scan_seed(scan_id, &seed.id).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    error!(seed = %seed.name, error = %e, "Failed to remove stale seed");
                    report.delete_failed += 1;
                }
            }
        }

        Ok(report)
    }
}
