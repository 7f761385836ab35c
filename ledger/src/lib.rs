//! Passbook Ledger Engine
//!
//! Account creation, deposits, withdrawals and transfers over an entity
//! store. Each operation runs in a single unit of work and keeps account
//! balances, passbooks and owner totals consistent.

pub mod account;
pub mod balance;
pub mod config;
pub mod engine;
pub mod journal;

pub use account::AccountNumberGenerator;
pub use balance::{IntegrityReport, Violation};
pub use config::LedgerConfig;
pub use engine::{LedgerEngine, TransferReceipt};
pub use journal::Posting;
