//! Ledger entity model: users, banks, accounts, passbook entries and
//! interbank transactions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, AccountNumber, BankId, BankTransactionId, EntryId, UserId};

/// A customer or administrator as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier.
    pub id: UserId,
    /// Whether the user may transact.
    pub is_active: bool,
    /// Whether the user may run settlement.
    pub is_admin: bool,
    /// Sum of balances of the user's non-deleted accounts.
    pub total_balance: Decimal,
}

impl User {
    /// Create an active, non-admin user with no balance.
    pub fn new() -> Self {
        Self {
            id: UserId::new(),
            is_active: true,
            is_admin: false,
            total_balance: Decimal::ZERO,
        }
    }

    /// Create an active administrator.
    pub fn admin() -> Self {
        Self {
            is_admin: true,
            ..Self::new()
        }
    }

    /// Check if the user is an active administrator.
    pub fn is_active_admin(&self) -> bool {
        self.is_active && self.is_admin
    }
}

impl Default for User {
    fn default() -> Self {
        Self::new()
    }
}

/// A bank holding customer accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    /// Unique bank identifier.
    pub id: BankId,
    /// Full legal name.
    pub full_name: String,
    /// Short name, e.g. "SBI".
    pub abbreviation: String,
    /// Whether operations touching this bank's accounts are allowed.
    pub is_active: bool,
}

impl Bank {
    /// Create an active bank. The abbreviation is derived from the name.
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        Self {
            id: BankId::new(),
            abbreviation: abbreviate(&full_name),
            full_name,
            is_active: true,
        }
    }
}

/// Upper-cased initials of each word: "State Bank of India" -> "SBOI".
pub fn abbreviate(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Kind of passbook entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Opening balance of a new account.
    AccountCreation,
    /// Cash withdrawal.
    Withdrawal,
    /// Cash deposit.
    Deposit,
    /// Debit leg of a transfer.
    TransferOut,
    /// Credit leg of a transfer.
    TransferIn,
}

impl EntryKind {
    /// Check if entries of this kind decrease the balance.
    pub fn is_debit(&self) -> bool {
        matches!(self, EntryKind::Withdrawal | EntryKind::TransferOut)
    }
}

/// One immutable passbook entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassbookEntry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Account this entry belongs to.
    pub account_id: AccountId,
    /// Position within the account's passbook, starting at 1.
    pub sequence: u64,
    /// Entry kind.
    pub kind: EntryKind,
    /// Signed amount: negative for debits.
    pub amount: Decimal,
    /// Account balance right after this entry.
    pub balance_after: Decimal,
    /// Free-text note.
    pub note: String,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

/// A customer account together with its passbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Customer-facing account number.
    pub account_number: AccountNumber,
    /// Current balance.
    pub balance: Decimal,
    /// Whether the account can transact.
    pub is_active: bool,
    /// Owning user.
    pub user_id: UserId,
    /// Holding bank.
    pub bank_id: BankId,
    /// Entries in creation order.
    pub passbook: Vec<PassbookEntry>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
    /// User who closed the account.
    pub deleted_by: Option<UserId>,
}

impl Account {
    /// Create an active account with a zero balance and an empty passbook.
    pub fn new(account_number: AccountNumber, user_id: UserId, bank_id: BankId) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new(),
            account_number,
            balance: Decimal::ZERO,
            is_active: true,
            user_id,
            bank_id,
            passbook: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        }
    }

    /// Check if the account has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Check if the account can transact.
    pub fn can_transact(&self) -> bool {
        self.is_active && !self.is_deleted()
    }

    /// Sum of all passbook amounts.
    pub fn passbook_total(&self) -> Decimal {
        self.passbook.iter().map(|e| e.amount).sum()
    }
}

/// Gross amount moved from one bank to another by a single transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    /// Unique record ID.
    pub id: BankTransactionId,
    /// Bank of the sending account.
    pub sender_bank_id: BankId,
    /// Bank of the receiving account.
    pub receiver_bank_id: BankId,
    /// Transferred amount.
    pub amount: Decimal,
    /// When the transfer was recorded.
    pub created_at: DateTime<Utc>,
}

impl BankTransaction {
    /// Create a new interbank record.
    pub fn new(sender_bank_id: BankId, receiver_bank_id: BankId, amount: Decimal) -> Self {
        Self {
            id: BankTransactionId::new(),
            sender_bank_id,
            receiver_bank_id,
            amount,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate("State Bank of India"), "SBOI");
        assert_eq!(abbreviate("  alpha   beta "), "AB");
        assert_eq!(abbreviate(""), "");
        assert_eq!(Bank::new("Harbor Trust").abbreviation, "HT");
    }

    #[test]
    fn test_account_flags() {
        let number = AccountNumber::parse("111122223333").unwrap();
        let mut account = Account::new(number, UserId::new(), BankId::new());
        assert!(account.can_transact());

        account.deleted_at = Some(Utc::now());
        assert!(account.is_deleted());
        assert!(!account.can_transact());
    }

    #[test]
    fn test_entry_kind_direction() {
        assert!(EntryKind::Withdrawal.is_debit());
        assert!(EntryKind::TransferOut.is_debit());
        assert!(!EntryKind::Deposit.is_debit());
        assert!(!EntryKind::AccountCreation.is_debit());
    }

    #[test]
    fn test_user_roles() {
        assert!(User::admin().is_active_admin());
        let mut admin = User::admin();
        admin.is_active = false;
        assert!(!admin.is_active_admin());
        assert_eq!(User::new().total_balance, dec!(0));
    }
}
