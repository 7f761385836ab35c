//! Passbook postings.

use chrono::Utc;
use rust_decimal::Decimal;

use passbook_common::{
    Account, AccountNumber, EntryId, EntryKind, LedgerError, PassbookEntry, Result,
};

/// A balance change about to be written to an account's passbook.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    /// Entry kind.
    pub kind: EntryKind,
    /// Signed amount: negative for debits.
    pub amount: Decimal,
    /// Passbook note.
    pub note: String,
}

impl Posting {
    /// Opening balance of a new account.
    pub fn opening(balance: Decimal) -> Self {
        Self {
            kind: EntryKind::AccountCreation,
            amount: balance,
            note: format!("Account created with initial balance Rs.{balance}"),
        }
    }

    /// Cash withdrawal of `amount`.
    pub fn withdrawal(amount: Decimal) -> Self {
        Self {
            kind: EntryKind::Withdrawal,
            amount: -amount,
            note: "Withdrawal transaction".to_string(),
        }
    }

    /// Cash deposit of `amount`.
    pub fn deposit(amount: Decimal) -> Self {
        Self {
            kind: EntryKind::Deposit,
            amount,
            note: "Deposit transaction".to_string(),
        }
    }

    /// Debit leg of a transfer to `receiver`.
    pub fn transfer_out(amount: Decimal, receiver: &AccountNumber) -> Self {
        Self {
            kind: EntryKind::TransferOut,
            amount: -amount,
            note: format!("Transfer to account {receiver}"),
        }
    }

    /// Credit leg of a transfer from `sender`.
    pub fn transfer_in(amount: Decimal, sender: &AccountNumber) -> Self {
        Self {
            kind: EntryKind::TransferIn,
            amount,
            note: format!("Transfer from account {sender}"),
        }
    }

    /// Apply the posting to `account` and return the new passbook entry.
    ///
    /// The entry is also appended to `account.passbook`, so the in-memory
    /// account mirrors what the store will hold after the write. A balance
    /// that would leave the decimal range is rejected and `account` is left
    /// untouched.
    pub fn post(self, account: &mut Account) -> Result<PassbookEntry> {
        account.balance = adjust(account.balance, self.amount)?;

        let entry = PassbookEntry {
            id: EntryId::new(),
            account_id: account.id,
            sequence: account.passbook.len() as u64 + 1,
            kind: self.kind,
            amount: self.amount,
            balance_after: account.balance,
            note: self.note,
            created_at: Utc::now(),
        };
        account.passbook.push(entry.clone());
        Ok(entry)
    }
}

/// `total + delta`, or a validation error on the amount when the result is
/// not representable.
pub fn adjust(total: Decimal, delta: Decimal) -> Result<Decimal> {
    total.checked_add(delta).ok_or_else(|| {
        LedgerError::validation_field(
            format!("Applying {delta} to {total} exceeds the supported range"),
            "amount",
        )
    })
}

/// Find the first entry whose sequence or balance snapshot disagrees with
/// a replay of the passbook from zero.
pub fn first_broken_entry(entries: &[PassbookEntry]) -> Option<&PassbookEntry> {
    let mut running = Decimal::ZERO;
    for (idx, entry) in entries.iter().enumerate() {
        running = match running.checked_add(entry.amount) {
            Some(next) => next,
            None => return Some(entry),
        };
        if entry.sequence != idx as u64 + 1
            || entry.balance_after != running
            || entry.kind.is_debit() != entry.amount.is_sign_negative()
        {
            return Some(entry);
        }
    }
    None
}
