//! Seed Inventory Client
//!
//! The operations the connector consumes from the attack surface inventory,
//! behind a trait so the reconciliation engine never sees an HTTP type.

pub mod client;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{AsmClient, RetryPolicy};
pub use types::{AuthState, CreateSeedRequest, Node, Scan, Seed};

/// Failure of an inventory call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The API answered with a non-success status
    #[error("inventory returned {status}: {}", body_preview(.body))]
    Status { status: u16, body: Vec<u8> },

    /// No usable response was received
    #[error("inventory request failed: {0}")]
    Transport(String),

    /// A success response whose body could not be decoded
    #[error("failed to decode inventory response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn body_preview(body: &[u8]) -> String {
    const MAX: usize = 256;
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}

/// Operations on a scan's seed list
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SeedInventory: Send + Sync {
    /// Whether the configured credentials are accepted
    async fn get_state(&self) -> Result<AuthState, ApiError>;

    async fn get_scan(&self, scan_id: &str) -> Result<Scan, ApiError>;

    /// Current seeds of the scan, with tags expanded
    async fn get_scan_seeds(&self, scan_id: &str) -> Result<Vec<Seed>, ApiError>;

    async fn add_scan_seed(
        &self,
        scan_id: &str,
        request: &CreateSeedRequest,
    ) -> Result<Node, ApiError>;

    async fn remove_scan_seed(&self, scan_id: &str, seed_id: &str) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display_truncates_body() {
        let err = ApiError::Status {
            status: 502,
            body: vec![b'x'; 1000],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("inventory returned 502: "));
        assert!(msg.ends_with("..."));
        assert!(msg.len() < 300);
        assert_eq!(err.status(), Some(502));
        assert_eq!(ApiError::Transport("x".into()).status(), None);
    }
}
