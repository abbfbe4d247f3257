//! Run summaries printed by the binaries at the end of each cycle

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connector::types::{SyncPlan, SyncReport};
use crate::providers::CloudProvider;

/// What a cycle produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Dry run: the decisions, nothing applied
    Planned {
        create: Vec<String>,
        #[serde(flatten)]
        plan: SyncPlan,
    },
    Synced(SyncReport),
}

impl RunOutcome {
    pub fn planned(plan: SyncPlan) -> Self {
        let create = plan.create_names().into_iter().map(str::to_string).collect();
        RunOutcome::Planned { create, plan }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scan_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub providers: Vec<CloudProvider>,
    pub discovered: usize,
    pub outcome: RunOutcome,
}

impl RunSummary {
    /// Stamp the finish time now
    pub fn finish(
        scan_id: &str,
        started_at: DateTime<Utc>,
        providers: Vec<CloudProvider>,
        discovered: usize,
        outcome: RunOutcome,
    ) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            providers,
            discovered,
            outcome,
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
