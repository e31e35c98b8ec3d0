//! Token holder tracking and buy/sell classification
//!
//! Discovers the largest holders of one SPL token, keeps live account
//! subscriptions on the top of that list, and turns their ledger activity into
//! classified buy/sell records with protocol attribution.

pub mod classifier;
pub mod config;
pub mod dashboard;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod monitor;
pub mod protocols;
pub mod reconciliation;
pub mod store;
pub mod subscriptions;
pub mod types;


pub use config::{ConfigError, MonitorConfig};
pub use error::MonitorError;
pub use monitor::{MonitoringService, ServiceState};
