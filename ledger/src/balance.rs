//! Ledger integrity audit.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use passbook_common::{Account, AccountId, AccountNumber, User, UserId};

use crate::journal::first_broken_entry;

/// One broken ledger invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Violation {
    /// Balance differs from the sum of passbook amounts.
    BalanceMismatch {
        account_id: AccountId,
        balance: Decimal,
        passbook_total: Decimal,
    },
    /// A passbook entry is out of sequence or carries a wrong snapshot.
    BrokenPassbook { account_id: AccountId, sequence: u64 },
    /// Balance dropped below zero.
    NegativeBalance { account_id: AccountId, balance: Decimal },
    /// Stored owner total differs from the sum of live account balances.
    UserTotalMismatch {
        user_id: UserId,
        stored: Decimal,
        computed: Decimal,
    },
    /// Two accounts share a number.
    DuplicateAccountNumber { account_number: AccountNumber },
}

/// Result of an integrity scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub accounts_checked: usize,
    pub users_checked: usize,
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    /// Check if no invariant is broken.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check balance, passbook, owner-total and uniqueness invariants.
///
/// `accounts` must include soft-deleted accounts; they are checked for
/// balance consistency but do not count towards owner totals.
pub fn audit(users: &[User], accounts: &[Account]) -> IntegrityReport {
    let mut violations = Vec::new();
    let mut numbers = HashSet::with_capacity(accounts.len());
    let mut totals: HashMap<UserId, Decimal> = HashMap::new();

    for account in accounts {
        let passbook_total = account.passbook_total();
        if account.balance != passbook_total {
            violations.push(Violation::BalanceMismatch {
                account_id: account.id,
                balance: account.balance,
                passbook_total,
            });
        }

        if let Some(entry) = first_broken_entry(&account.passbook) {
            violations.push(Violation::BrokenPassbook {
                account_id: account.id,
                sequence: entry.sequence,
            });
        }

        if account.balance < Decimal::ZERO {
            violations.push(Violation::NegativeBalance {
                account_id: account.id,
                balance: account.balance,
            });
        }

        if !numbers.insert(&account.account_number) {
            violations.push(Violation::DuplicateAccountNumber {
                account_number: account.account_number.clone(),
            });
        }

        if !account.is_deleted() {
            *totals.entry(account.user_id).or_default() += account.balance;
        }
    }

    for user in users {
        let computed = totals.get(&user.id).copied().unwrap_or_default();
        if user.total_balance != computed {
            violations.push(Violation::UserTotalMismatch {
                user_id: user.id,
                stored: user.total_balance,
                computed,
            });
        }
    }

    IntegrityReport {
        accounts_checked: accounts.len(),
        users_checked: users.len(),
        violations,
    }
}
