//! Entity store and unit-of-work traits.

use async_trait::async_trait;

use passbook_common::{
    Account, AccountId, Bank, BankId, BankTransaction, PassbookEntry, User, UserId,
};

use crate::error::StoreResult;
use crate::query::{AccountFilter, AccountUpdate, Page, PageRequest, UserFilter, UserUpdate};

/// Access mode of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Reads only; may run concurrently with other readers.
    ReadOnly,
    /// Reads and writes; exclusive for its whole lifetime.
    ReadWrite,
}

/// A store of ledger entities that hands out units of work.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Begin a new unit of work.
    async fn begin(&self, mode: AccessMode) -> StoreResult<Box<dyn UnitOfWork>>;
}

/// An atomic transactional scope over the store.
///
/// Writes become visible to other units of work only after [`commit`].
/// Dropping a unit of work without committing rolls it back.
///
/// [`commit`]: UnitOfWork::commit
#[async_trait]
pub trait UnitOfWork: Send {
    /// Access mode this unit was opened with.
    fn mode(&self) -> AccessMode;

    /// Get a user by ID.
    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>>;

    /// List users matching a filter.
    async fn list_users(&mut self, filter: &UserFilter) -> StoreResult<Vec<User>>;

    /// Apply a partial update to all matching users; returns the number updated.
    async fn update_users(&mut self, filter: &UserFilter, update: &UserUpdate) -> StoreResult<u64>;

    /// Get a bank by ID.
    async fn get_bank(&mut self, id: BankId) -> StoreResult<Option<Bank>>;

    /// Find the first account matching a filter, passbook included.
    async fn find_account(&mut self, filter: &AccountFilter) -> StoreResult<Option<Account>>;

    /// List matching accounts in creation order, passbooks included.
    async fn list_accounts(
        &mut self,
        filter: &AccountFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Account>>;

    /// Count matching accounts.
    async fn count_accounts(&mut self, filter: &AccountFilter) -> StoreResult<u64>;

    /// Insert an account together with its initial passbook entries.
    async fn insert_account(&mut self, account: Account) -> StoreResult<()>;

    /// Apply a partial update to all matching accounts; returns the number updated.
    async fn update_accounts(
        &mut self,
        filter: &AccountFilter,
        update: &AccountUpdate,
    ) -> StoreResult<u64>;

    /// Append an entry to an account's passbook.
    async fn append_entry(&mut self, entry: PassbookEntry) -> StoreResult<()>;

    /// List an account's passbook entries in creation order.
    async fn list_entries(
        &mut self,
        account_id: AccountId,
        page: PageRequest,
    ) -> StoreResult<Page<PassbookEntry>>;

    /// Record an interbank transaction.
    async fn insert_bank_transaction(&mut self, record: BankTransaction) -> StoreResult<()>;

    /// List every interbank transaction in insertion order.
    async fn list_bank_transactions(&mut self) -> StoreResult<Vec<BankTransaction>>;

    /// Make all writes durable and visible.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard all writes.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
