//! Passbook Service
//!
//! Wires the entity store, ledger engine and settlement engine together
//! behind one facade with configuration, lifecycle state and metrics.

pub mod config;
pub mod metrics;
pub mod service;
pub mod state;

pub use config::ServiceConfig;
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use service::LedgerService;
pub use state::ServiceState;
