//! Store error types.

use passbook_common::LedgerError;
use thiserror::Error;

/// Errors raised by an entity store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("Unique constraint violated on {constraint}: {value}")]
    UniqueViolation { constraint: &'static str, value: String },

    /// A write was attempted inside a read-only unit of work.
    #[error("Unit of work is read-only")]
    ReadOnly,

    /// A row referenced by a write does not exist.
    #[error("Missing {table} row: {id}")]
    MissingRow { table: &'static str, id: String },

    /// A write would break an ordering constraint.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The unit of work was already committed or rolled back.
    #[error("Unit of work already finished")]
    Finished,

    /// Backend-specific failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passbook_common::ErrorKind;

    #[test]
    fn test_store_errors_map_to_persistence() {
        let err: LedgerError = StoreError::UniqueViolation {
            constraint: "accounts.account_number",
            value: "123456789012".to_string(),
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(err.to_string().contains("accounts.account_number"));
    }
}
