//! Cloud Seed Connector
//!
//! Discovers internet-facing resources in AWS, Azure and GCP and keeps the
//! seed list of an attack-surface scan in step with them.

pub mod config;
pub mod connector;
pub mod inventory;
pub mod providers;
pub mod run;
pub mod telemetry;
pub mod version;
