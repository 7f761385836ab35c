//! Identifier types for ledger entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LedgerError;

/// Number of digits in an account number.
pub const ACCOUNT_NUMBER_LENGTH: usize = 12;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $ctor:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new identifier.
            pub fn new() -> Self {
                Self(Uuid::$ctor())
            }

            /// Create from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from string.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Identifier of a customer (account owner or administrator).
    UserId,
    new_v4
);

uuid_identifier!(
    /// Identifier of a bank.
    BankId,
    new_v4
);

uuid_identifier!(
    /// Identifier of an account record.
    AccountId,
    new_v4
);

uuid_identifier!(
    /// Identifier of a passbook entry.
    /// Uses UUID v7 so identifiers sort by creation time.
    EntryId,
    now_v7
);

uuid_identifier!(
    /// Identifier of an interbank transaction record.
    BankTransactionId,
    now_v7
);

/// Customer-facing account number: exactly twelve ASCII digits.
///
/// Assigned once at account creation and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountNumber(String);

impl AccountNumber {
    /// Parse and validate an account number.
    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        let s = s.trim();
        if s.len() != ACCOUNT_NUMBER_LENGTH || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LedgerError::validation_field(
                format!("Account number must be {ACCOUNT_NUMBER_LENGTH} digits, got {s:?}"),
                "account_number",
            ));
        }
        Ok(Self(s.to_string()))
    }

    /// Build from digits produced by the account number generator.
    pub fn from_digits(digits: &[u8]) -> Result<Self, LedgerError> {
        let s: String = digits.iter().map(|d| char::from(b'0' + (d % 10))).collect();
        Self::parse(&s)
    }

    /// Get the number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountNumber {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountNumber {
    type Error = LedgerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AccountNumber> for String {
    fn from(n: AccountNumber) -> Self {
        n.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_creation() {
        let first = EntryId::new();
        let second = EntryId::new();
        assert_ne!(first, second);
        assert_eq!(first.as_uuid().get_version_num(), 7);
    }

    #[test]
    fn test_user_id_parse() {
        let uuid_str = "6f1c2a9e-3b7d-4c1a-9e2f-0a1b2c3d4e5f";
        let id = UserId::parse(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);
    }

    #[test]
    fn test_account_number_validation() {
        assert!(AccountNumber::parse("123456789012").is_ok());
        assert!(AccountNumber::parse(" 123456789012 ").is_ok());
        assert!(AccountNumber::parse("12345678901").is_err());
        assert!(AccountNumber::parse("1234567890123").is_err());
        assert!(AccountNumber::parse("12345678901a").is_err());
        assert!(AccountNumber::parse("").is_err());
    }

    #[test]
    fn test_account_number_from_digits() {
        let number = AccountNumber::from_digits(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 1]).unwrap();
        assert_eq!(number.as_str(), "012345678901");
        assert!(AccountNumber::from_digits(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_account_number_serde() {
        let number = AccountNumber::parse("000000000042").unwrap();
        let json = serde_json::to_string(&number).unwrap();
        assert_eq!(json, "\"000000000042\"");

        let parsed: AccountNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, number);
        assert!(serde_json::from_str::<AccountNumber>("\"42\"").is_err());
    }
}
