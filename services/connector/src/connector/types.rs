//! Seed Reconciliation Types
//!
//! Canonical resource model and the outcome/error types of a sync run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inventory::ApiError;

/// Seed type accepted by the inventory API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Domain,
    #[serde(rename = "IPv4")]
    Ipv4,
    #[serde(rename = "IPv6")]
    Ipv6,
}

impl ResourceKind {
    /// Wire-level literal sent as the seed `type`
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Domain => "Domain",
            ResourceKind::Ipv4 => "IPv4",
            ResourceKind::Ipv6 => "IPv6",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource in canonical form, ready to be compared against seed names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedResource {
    pub value: String,
    pub kind: ResourceKind,
}

impl NormalizedResource {
    pub fn domain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: ResourceKind::Domain,
        }
    }

    pub fn ipv4(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: ResourceKind::Ipv4,
        }
    }

    pub fn ipv6(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: ResourceKind::Ipv6,
        }
    }
}

/// A seed scheduled for deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleSeed {
    pub id: String,
    pub name: String,
}

/// Decisions for one run, computed against a single inventory snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncPlan {
    /// Resources to create, in working-list order
    #[serde(skip)]
    pub create: Vec<NormalizedResource>,
    /// Resources already present as seeds
    pub unchanged: Vec<String>,
    /// Resources the inventory cannot accept (IPv6)
    pub unsupported: Vec<String>,
    /// Connector-owned seeds absent from discovery, in fetch order
    pub stale: Vec<StaleSeed>,
    /// Seeds absent from discovery that carry no connector tag
    pub retained: Vec<String>,
    /// Raw inputs that could not be normalized
    pub not_normalized: usize,
}

impl SyncPlan {
    pub fn create_names(&self) -> Vec<&str> {
        self.create.iter().map(|r| r.value.as_str()).collect()
    }
}

/// Counters for a completed sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub unchanged: usize,
    /// Creations refused by the inventory with a known error code
    pub rejected: usize,
    pub unsupported: usize,
    pub not_normalized: usize,
    pub deleted: usize,
    pub delete_failed: usize,
    /// Stale seeds left in place (deletion disabled or not connector-owned)
    pub retained: usize,
}

/// Fatal conditions that abort a run
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to get auth state: {0}")]
    AuthState(#[source] ApiError),

    #[error("credentials not valid")]
    NotAuthenticated,

    #[error("failed to check scan {scan_id} exists: {source}")]
    ScanLookup {
        scan_id: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to get scan {scan_id} existing seeds: {source}")]
    FetchSeeds {
        scan_id: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to add seed {resource}: {source}")]
    CreateSeed {
        resource: String,
        #[source]
        source: ApiError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_wire_literals() {
        assert_eq!(serde_json::to_string(&ResourceKind::Domain).unwrap(), "\"Domain\"");
        assert_eq!(serde_json::to_string(&ResourceKind::Ipv4).unwrap(), "\"IPv4\"");
        assert_eq!(serde_json::to_string(&ResourceKind::Ipv6).unwrap(), "\"IPv6\"");
        assert_eq!(ResourceKind::Ipv4.to_string(), "IPv4");
    }

    #[test]
    fn test_create_seed_error_names_resource() {
        let err = SyncError::CreateSeed {
            resource: "bad.example.com".to_string(),
            source: ApiError::Transport("connection reset".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("bad.example.com"));
        assert!(msg.contains("connection reset"));
    }
}
