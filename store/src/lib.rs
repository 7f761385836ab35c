//! Passbook Entity Store
//!
//! Unit-of-work access to users, banks, accounts, passbook entries and
//! interbank transactions. Every ledger operation runs inside one unit of
//! work, which either commits all of its writes or none of them.

pub mod error;
pub mod memory;
pub mod query;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, MemoryUnitOfWork};
pub use query::{AccountFilter, AccountUpdate, Page, PageRequest, UserFilter, UserUpdate};
pub use store::{AccessMode, EntityStore, UnitOfWork};
