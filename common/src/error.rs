//! Error types for ledger operations.

use std::fmt;

use thiserror::Error;

/// Kind of entity referenced by an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Bank,
    Account,
    CounterpartAccount,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::User => "user",
            EntityKind::Bank => "bank",
            EntityKind::Account => "account",
            EntityKind::CounterpartAccount => "counterpart account",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Validation,
    InactiveEntity,
    Unauthorized,
    Persistence,
    Exhaustion,
    Unavailable,
}

/// Main error type for ledger operations.
///
/// Every failure aborts the enclosing unit of work; callers can assume the
/// store is unchanged when they receive one of these.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    /// Input or business-rule validation failed.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// A referenced entity exists but is disabled.
    #[error("{entity} is inactive: {id}")]
    InactiveEntity { entity: EntityKind, id: String },

    /// The caller may not perform the operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The underlying store failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A bounded retry loop ran out of attempts.
    #[error("Exhausted {attempts} attempts: {what}")]
    Exhaustion { what: String, attempts: u32 },

    /// The service is not accepting requests.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Create a not-found error.
    pub fn not_found(entity: EntityKind, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create an inactive-entity error.
    pub fn inactive(entity: EntityKind, id: impl ToString) -> Self {
        LedgerError::InactiveEntity {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error tied to a request field.
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::Validation { .. } => ErrorKind::Validation,
            LedgerError::InactiveEntity { .. } => ErrorKind::InactiveEntity,
            LedgerError::Unauthorized(_) => ErrorKind::Unauthorized,
            LedgerError::Persistence(_) => ErrorKind::Persistence,
            LedgerError::Exhaustion { .. } => ErrorKind::Exhaustion,
            LedgerError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Check if the caller may retry the same request later.
    ///
    /// Business-rule failures never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Persistence(_) | LedgerError::Unavailable(_)
        )
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::InactiveEntity => "INACTIVE_ENTITY",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Persistence => "PERSISTENCE",
            ErrorKind::Exhaustion => "EXHAUSTION",
            ErrorKind::Unavailable => "UNAVAILABLE",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
