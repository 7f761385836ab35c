//! Typed filters, partial updates and pagination for store access.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use passbook_common::{Account, AccountId, AccountNumber, BankId, User, UserId};

/// Composite predicate over accounts.
///
/// Soft-deleted accounts are excluded unless `include_deleted` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    pub id: Option<AccountId>,
    pub account_number: Option<AccountNumber>,
    pub user_id: Option<UserId>,
    pub bank_id: Option<BankId>,
    pub include_deleted: bool,
}

impl AccountFilter {
    /// Match a single account by ID.
    pub fn by_id(id: AccountId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Match a single account by account number.
    pub fn by_number(account_number: AccountNumber) -> Self {
        Self {
            account_number: Some(account_number),
            ..Self::default()
        }
    }

    /// Match all accounts of a user.
    pub fn owned_by(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    /// Also match soft-deleted accounts.
    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Evaluate the predicate.
    pub fn matches(&self, account: &Account) -> bool {
        (self.include_deleted || !account.is_deleted())
            && self.id.map_or(true, |id| account.id == id)
            && self
                .account_number
                .as_ref()
                .map_or(true, |n| &account.account_number == n)
            && self.user_id.map_or(true, |id| account.user_id == id)
            && self.bank_id.map_or(true, |id| account.bank_id == id)
    }
}

/// Predicate over users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub id: Option<UserId>,
}

impl UserFilter {
    /// Match a single user by ID.
    pub fn by_id(id: UserId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Evaluate the predicate.
    pub fn matches(&self, user: &User) -> bool {
        self.id.map_or(true, |id| user.id == id)
    }
}

/// Field-level update of account rows. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountUpdate {
    pub balance: Option<Decimal>,
    pub is_active: Option<bool>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl AccountUpdate {
    /// Set a new balance.
    pub fn balance(balance: Decimal) -> Self {
        Self {
            balance: Some(balance),
            ..Self::default()
        }
    }

    /// Mark as soft-deleted by `user_id`.
    pub fn soft_delete(user_id: UserId) -> Self {
        Self {
            is_active: Some(false),
            deleted_at: Some(Utc::now()),
            deleted_by: Some(user_id),
            ..Self::default()
        }
    }

    /// Check if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the update to a row and bump `updated_at`.
    pub fn apply(&self, account: &mut Account) {
        if let Some(balance) = self.balance {
            account.balance = balance;
        }
        if let Some(is_active) = self.is_active {
            account.is_active = is_active;
        }
        if let Some(deleted_at) = self.deleted_at {
            account.deleted_at = Some(deleted_at);
        }
        if let Some(deleted_by) = self.deleted_by {
            account.deleted_by = Some(deleted_by);
        }
        account.updated_at = Utc::now();
    }
}

/// Field-level update of user rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUpdate {
    pub total_balance: Option<Decimal>,
}

impl UserUpdate {
    /// Set a new aggregate balance.
    pub fn total_balance(total_balance: Decimal) -> Self {
        Self {
            total_balance: Some(total_balance),
        }
    }

    /// Apply the update to a row.
    pub fn apply(&self, user: &mut User) {
        if let Some(total_balance) = self.total_balance {
            user.total_balance = total_balance;
        }
    }
}

/// Offset pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl PageRequest {
    /// Largest page size a caller may request.
    pub const MAX_LIMIT: usize = 500;

    /// Create a page request; the limit is clamped to `1..=MAX_LIMIT`.
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset,
        }
    }

    /// Request every row.
    pub fn all() -> Self {
        Self {
            limit: usize::MAX,
            offset: 0,
        }
    }

    /// Slice an ordered iterator according to this request.
    pub fn slice<T>(&self, rows: impl IntoIterator<Item = T>) -> Vec<T> {
        rows.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(20, 0)
    }
}

/// One page of results plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}
