//! Passbook Settlement
//!
//! Reduces the gross history of interbank transactions to one net
//! settlement instruction per bank pair.

pub mod config;
pub mod engine;
pub mod netting;

pub use config::SettlementConfig;
pub use engine::SettlementEngine;
pub use netting::{FlowMatrix, NettingDirection, NettingReport, SettlementInstruction};
