//! Passbook Common Types
//!
//! Shared types used across the passbook ledger, including identifiers,
//! monetary helpers, the entity model and the error type.

pub mod identifiers;
pub mod monetary;
pub mod entities;
pub mod error;

pub use identifiers::*;
pub use monetary::*;
pub use entities::*;
pub use error::*;
