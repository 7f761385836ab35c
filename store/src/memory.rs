//! In-memory entity store.
//!
//! A read-write unit of work holds the store's write lock until it commits or
//! rolls back, so units of work are serializable. Writes are applied in place
//! and recorded in an undo log that is replayed in reverse on rollback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

use passbook_common::{
    Account, AccountId, AccountNumber, Bank, BankId, BankTransaction, PassbookEntry, User, UserId,
};

use crate::error::{StoreError, StoreResult};
use crate::query::{AccountFilter, AccountUpdate, Page, PageRequest, UserFilter, UserUpdate};
use crate::store::{AccessMode, EntityStore, UnitOfWork};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    banks: HashMap<BankId, Bank>,
    /// Account rows; passbooks live in `entries`.
    accounts: HashMap<AccountId, Account>,
    account_order: Vec<AccountId>,
    /// Unique index on account number, soft-deleted rows included.
    account_numbers: HashMap<AccountNumber, AccountId>,
    entries: HashMap<AccountId, Vec<PassbookEntry>>,
    bank_transactions: Vec<BankTransaction>,
}

impl Tables {
    fn hydrate(&self, row: &Account) -> Account {
        let mut account = row.clone();
        account.passbook = self.entries.get(&row.id).cloned().unwrap_or_default();
        account
    }

    fn matching_accounts<'a>(
        &'a self,
        filter: &'a AccountFilter,
    ) -> impl Iterator<Item = &'a Account> + 'a {
        self.account_order
            .iter()
            .filter_map(move |id| self.accounts.get(id))
            .filter(move |account| filter.matches(account))
    }

    fn find<'a>(&'a self, filter: &'a AccountFilter) -> Option<&'a Account> {
        if let Some(id) = filter.id {
            return self.accounts.get(&id).filter(|a| filter.matches(a));
        }
        if let Some(number) = &filter.account_number {
            return self
                .account_numbers
                .get(number)
                .and_then(|id| self.accounts.get(id))
                .filter(|a| filter.matches(a));
        }
        self.matching_accounts(filter).next()
    }
}

/// One reversible write.
#[derive(Debug)]
enum Undo {
    UserRestored(User),
    AccountInserted(AccountId),
    AccountRestored(Account),
    EntryAppended(AccountId),
    BankTransactionInserted,
}

impl Undo {
    fn revert(self, tables: &mut Tables) {
        match self {
            Undo::UserRestored(user) => {
                tables.users.insert(user.id, user);
            }
            Undo::AccountInserted(id) => {
                if let Some(account) = tables.accounts.remove(&id) {
                    tables.account_numbers.remove(&account.account_number);
                }
                tables.account_order.retain(|existing| *existing != id);
                tables.entries.remove(&id);
            }
            Undo::AccountRestored(account) => {
                tables.accounts.insert(account.id, account);
            }
            Undo::EntryAppended(id) => {
                if let Some(entries) = tables.entries.get_mut(&id) {
                    entries.pop();
                }
            }
            Undo::BankTransactionInserted => {
                tables.bank_transactions.pop();
            }
        }
    }
}

enum Guard {
    Read(OwnedRwLockReadGuard<Tables>),
    Write(OwnedRwLockWriteGuard<Tables>),
}

impl Guard {
    fn tables(&self) -> &Tables {
        match self {
            Guard::Read(g) => &**g,
            Guard::Write(g) => &**g,
        }
    }

    fn tables_mut(&mut self) -> StoreResult<&mut Tables> {
        match self {
            Guard::Write(g) => Ok(&mut **g),
            Guard::Read(_) => Err(StoreError::ReadOnly),
        }
    }
}

/// Thread-safe in-memory entity store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    next_unit: Arc<AtomicU64>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user row (directory seeding).
    pub async fn put_user(&self, user: User) {
        self.tables.write().await.users.insert(user.id, user);
    }

    /// Insert or replace a bank row (directory seeding).
    pub async fn put_bank(&self, bank: Bank) {
        self.tables.write().await.banks.insert(bank.id, bank);
    }

    /// Read a committed user row.
    pub async fn user(&self, id: UserId) -> Option<User> {
        self.tables.read().await.users.get(&id).cloned()
    }

    /// Read a committed bank row.
    pub async fn bank(&self, id: BankId) -> Option<Bank> {
        self.tables.read().await.banks.get(&id).cloned()
    }

    /// Read a committed account with its passbook, soft-deleted ones included.
    pub async fn account(&self, id: AccountId) -> Option<Account> {
        let tables = self.tables.read().await;
        tables.accounts.get(&id).map(|row| tables.hydrate(row))
    }

    /// Number of committed interbank transactions.
    pub async fn bank_transaction_count(&self) -> usize {
        self.tables.read().await.bank_transactions.len()
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn begin(&self, mode: AccessMode) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = match mode {
            AccessMode::ReadOnly => Guard::Read(self.tables.clone().read_owned().await),
            AccessMode::ReadWrite => Guard::Write(self.tables.clone().write_owned().await),
        };
        let id = self.next_unit.fetch_add(1, Ordering::Relaxed);
        debug!(uow = id, ?mode, "Unit of work started");

        Ok(Box::new(MemoryUnitOfWork {
            id,
            mode,
            guard: Some(guard),
            undo: Vec::new(),
        }))
    }
}

/// Unit of work over an [`InMemoryStore`].
pub struct MemoryUnitOfWork {
    id: u64,
    mode: AccessMode,
    guard: Option<Guard>,
    undo: Vec<Undo>,
}

impl MemoryUnitOfWork {
    fn tables(&self) -> StoreResult<&Tables> {
        self.guard
            .as_ref()
            .map(Guard::tables)
            .ok_or(StoreError::Finished)
    }

    fn writer(&mut self) -> StoreResult<(&mut Tables, &mut Vec<Undo>)> {
        let tables = self
            .guard
            .as_mut()
            .ok_or(StoreError::Finished)?
            .tables_mut()?;
        Ok((tables, &mut self.undo))
    }

    fn revert_all(&mut self) -> usize {
        let reverted = self.undo.len();
        if let Some(Guard::Write(tables)) = self.guard.as_mut() {
            while let Some(op) = self.undo.pop() {
                op.revert(tables);
            }
        }
        reverted
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if self.guard.is_some() && !self.undo.is_empty() {
            let reverted = self.revert_all();
            warn!(uow = self.id, reverted, "Unit of work dropped without commit, rolled back");
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn mode(&self) -> AccessMode {
        self.mode
    }

    async fn get_user(&mut self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.tables()?.users.get(&id).cloned())
    }

    async fn list_users(&mut self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self
            .tables()?
            .users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn update_users(&mut self, filter: &UserFilter, update: &UserUpdate) -> StoreResult<u64> {
        let (tables, undo) = self.writer()?;
        let mut updated = 0;
        for user in tables.users.values_mut().filter(|u| filter.matches(u)) {
            undo.push(Undo::UserRestored(user.clone()));
            update.apply(user);
            updated += 1;
        }
        Ok(updated)
    }

    async fn get_bank(&mut self, id: BankId) -> StoreResult<Option<Bank>> {
        Ok(self.tables()?.banks.get(&id).cloned())
    }

    async fn find_account(&mut self, filter: &AccountFilter) -> StoreResult<Option<Account>> {
        let tables = self.tables()?;
        Ok(tables.find(filter).map(|row| tables.hydrate(row)))
    }

    async fn list_accounts(
        &mut self,
        filter: &AccountFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Account>> {
        let tables = self.tables()?;
        let matching: Vec<&Account> = tables.matching_accounts(filter).collect();
        let total = matching.len() as u64;
        let items = page
            .slice(matching)
            .into_iter()
            .map(|row| tables.hydrate(row))
            .collect();
        Ok(Page { items, total })
    }

    async fn count_accounts(&mut self, filter: &AccountFilter) -> StoreResult<u64> {
        Ok(self.tables()?.matching_accounts(filter).count() as u64)
    }

    async fn insert_account(&mut self, account: Account) -> StoreResult<()> {
        let (tables, undo) = self.writer()?;

        if tables.account_numbers.contains_key(&account.account_number) {
            return Err(StoreError::UniqueViolation {
                constraint: "accounts.account_number",
                value: account.account_number.to_string(),
            });
        }
        if tables.accounts.contains_key(&account.id) {
            return Err(StoreError::UniqueViolation {
                constraint: "accounts.id",
                value: account.id.to_string(),
            });
        }
        for (idx, entry) in account.passbook.iter().enumerate() {
            if entry.account_id != account.id || entry.sequence != idx as u64 + 1 {
                return Err(StoreError::Conflict(format!(
                    "passbook entry {} does not belong at position {} of account {}",
                    entry.id,
                    idx + 1,
                    account.id
                )));
            }
        }

        let mut row = account;
        let passbook = std::mem::take(&mut row.passbook);
        let id = row.id;

        tables.account_numbers.insert(row.account_number.clone(), id);
        tables.account_order.push(id);
        tables.entries.insert(id, passbook);
        tables.accounts.insert(id, row);
        undo.push(Undo::AccountInserted(id));

        Ok(())
    }

    async fn update_accounts(
        &mut self,
        filter: &AccountFilter,
        update: &AccountUpdate,
    ) -> StoreResult<u64> {
        let (tables, undo) = self.writer()?;
        let ids: Vec<AccountId> = tables.matching_accounts(filter).map(|a| a.id).collect();
        if update.is_empty() {
            return Ok(ids.len() as u64);
        }

        for id in &ids {
            if let Some(account) = tables.accounts.get_mut(id) {
                undo.push(Undo::AccountRestored(account.clone()));
                update.apply(account);
            }
        }
        Ok(ids.len() as u64)
    }

    async fn append_entry(&mut self, entry: PassbookEntry) -> StoreResult<()> {
        let (tables, undo) = self.writer()?;

        if !tables.accounts.contains_key(&entry.account_id) {
            return Err(StoreError::MissingRow {
                table: "accounts",
                id: entry.account_id.to_string(),
            });
        }

        let account_id = entry.account_id;
        let entries = tables.entries.entry(account_id).or_default();
        let expected = entries.len() as u64 + 1;
        if entry.sequence != expected {
            return Err(StoreError::Conflict(format!(
                "passbook sequence {} for account {}, expected {}",
                entry.sequence, account_id, expected
            )));
        }

        entries.push(entry);
        undo.push(Undo::EntryAppended(account_id));
        Ok(())
    }

    async fn list_entries(
        &mut self,
        account_id: AccountId,
        page: PageRequest,
    ) -> StoreResult<Page<PassbookEntry>> {
        let tables = self.tables()?;
        if !tables.accounts.contains_key(&account_id) {
            return Err(StoreError::MissingRow {
                table: "accounts",
                id: account_id.to_string(),
            });
        }

        let entries = tables.entries.get(&account_id).map(Vec::as_slice).unwrap_or_default();
        Ok(Page {
            items: page.slice(entries.iter().cloned()),
            total: entries.len() as u64,
        })
    }

    async fn insert_bank_transaction(&mut self, record: BankTransaction) -> StoreResult<()> {
        let (tables, undo) = self.writer()?;

        for bank_id in [record.sender_bank_id, record.receiver_bank_id] {
            if !tables.banks.contains_key(&bank_id) {
                return Err(StoreError::MissingRow {
                    table: "banks",
                    id: bank_id.to_string(),
                });
            }
        }

        tables.bank_transactions.push(record);
        undo.push(Undo::BankTransactionInserted);
        Ok(())
    }

    async fn list_bank_transactions(&mut self) -> StoreResult<Vec<BankTransaction>> {
        Ok(self.tables()?.bank_transactions.clone())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        if this.guard.is_none() {
            return Err(StoreError::Finished);
        }

        let writes = this.undo.len();
        this.undo.clear();
        this.guard = None;
        debug!(uow = this.id, writes, "Unit of work committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        if this.guard.is_none() {
            return Err(StoreError::Finished);
        }

        let reverted = this.revert_all();
        this.guard = None;
        debug!(uow = this.id, reverted, "Unit of work rolled back");
        Ok(())
    }
}
