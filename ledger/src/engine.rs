//! Core ledger engine implementation.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use passbook_common::{
    resolve_opening_balance, validate_amount, Account, AccountId, AccountNumber, Bank, BankId,
    BankTransaction, EntityKind, LedgerError, PassbookEntry, Result, User, UserId,
};
use passbook_store::{
    AccessMode, AccountFilter, AccountUpdate, EntityStore, Page, PageRequest, UnitOfWork,
    UserFilter, UserUpdate,
};

use crate::account::AccountNumberGenerator;
use crate::balance::{audit, IntegrityReport};
use crate::config::LedgerConfig;
use crate::journal::{adjust, Posting};

/// Outcome of a successful transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Sending account after the debit.
    pub sender: Account,
    /// Receiving account after the credit.
    pub receiver: Account,
    /// Interbank record, present only when the banks differ.
    pub bank_transaction: Option<BankTransaction>,
}

/// The ledger engine moves money between accounts.
///
/// Every operation opens one unit of work and commits it only after all
/// checks and writes succeed. Returning early drops the unit of work,
/// which discards everything written so far.
pub struct LedgerEngine {
    store: Arc<dyn EntityStore>,
    config: LedgerConfig,
    numbers: AccountNumberGenerator,
}

impl LedgerEngine {
    /// Create a new ledger engine.
    pub fn new(store: Arc<dyn EntityStore>, config: LedgerConfig) -> Self {
        Self::with_generator(store, config, AccountNumberGenerator::new())
    }

    /// Create an engine with reproducible account numbers.
    pub fn with_seed(store: Arc<dyn EntityStore>, config: LedgerConfig, seed: u64) -> Self {
        Self::with_generator(store, config, AccountNumberGenerator::with_seed(seed))
    }

    /// Create an engine with a specific account-number generator.
    pub fn with_generator(
        store: Arc<dyn EntityStore>,
        config: LedgerConfig,
        numbers: AccountNumberGenerator,
    ) -> Self {
        Self {
            store,
            config,
            numbers,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Open an account for `owner_id` at `bank_id`.
    ///
    /// A zero `opening_balance` is replaced by the configured default.
    #[instrument(skip(self))]
    pub async fn create_account(
        &self,
        owner_id: UserId,
        bank_id: BankId,
        opening_balance: Decimal,
    ) -> Result<Account> {
        let opening =
            resolve_opening_balance(opening_balance, self.config.default_opening_balance)?;

        let mut uow = self.store.begin(AccessMode::ReadWrite).await?;
        let owner = active_user(uow.as_mut(), owner_id).await?;
        active_bank(uow.as_mut(), bank_id).await?;

        let number = self
            .numbers
            .assign(uow.as_mut(), self.config.account_number_attempts)
            .await?;

        let mut account = Account::new(number, owner_id, bank_id);
        Posting::opening(opening).post(&mut account)?;

        uow.insert_account(account.clone()).await?;
        set_user_total(uow.as_mut(), &owner, adjust(owner.total_balance, opening)?).await?;
        uow.commit().await?;

        info!(
            account = %account.account_number,
            owner = %owner_id,
            balance = %opening,
            "Account created"
        );

        Ok(account)
    }

    /// Withdraw `amount` from one of the caller's accounts.
    #[instrument(skip(self))]
    pub async fn withdraw(
        &self,
        caller_id: UserId,
        account_number: &AccountNumber,
        amount: Decimal,
    ) -> Result<Account> {
        let amount = validate_amount(amount)?;

        let mut uow = self.store.begin(AccessMode::ReadWrite).await?;
        let owner = active_user(uow.as_mut(), caller_id).await?;
        let mut account = owned_account(uow.as_mut(), caller_id, account_number).await?;
        active_bank(uow.as_mut(), account.bank_id).await?;
        ensure_sufficient(&account, amount)?;

        let entry = Posting::withdrawal(amount).post(&mut account)?;
        write_posting(uow.as_mut(), &account, entry).await?;
        set_user_total(uow.as_mut(), &owner, adjust(owner.total_balance, -amount)?).await?;
        uow.commit().await?;

        info!(
            account = %account_number,
            amount = %amount,
            balance = %account.balance,
            "Withdrawal recorded"
        );

        Ok(account)
    }

    /// Deposit `amount` into one of the caller's accounts.
    #[instrument(skip(self))]
    pub async fn deposit(
        &self,
        caller_id: UserId,
        account_number: &AccountNumber,
        amount: Decimal,
    ) -> Result<Account> {
        let amount = validate_amount(amount)?;

        let mut uow = self.store.begin(AccessMode::ReadWrite).await?;
        let owner = active_user(uow.as_mut(), caller_id).await?;
        let mut account = owned_account(uow.as_mut(), caller_id, account_number).await?;
        active_bank(uow.as_mut(), account.bank_id).await?;

        let entry = Posting::deposit(amount).post(&mut account)?;
        write_posting(uow.as_mut(), &account, entry).await?;
        set_user_total(uow.as_mut(), &owner, adjust(owner.total_balance, amount)?).await?;
        uow.commit().await?;

        info!(
            account = %account_number,
            amount = %amount,
            balance = %account.balance,
            "Deposit recorded"
        );

        Ok(account)
    }

    /// Move `amount` from one of the caller's accounts to any active account.
    ///
    /// The sender is debited before the receiver is resolved; a failure on
    /// the receiver side rolls the debit back with the rest of the unit.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        caller_id: UserId,
        from: &AccountNumber,
        to: &AccountNumber,
        amount: Decimal,
    ) -> Result<TransferReceipt> {
        let amount = validate_amount(amount)?;
        if from == to {
            return Err(LedgerError::validation_field(
                format!("Cannot transfer from account {from} to itself"),
                "to_account_number",
            ));
        }

        let mut uow = self.store.begin(AccessMode::ReadWrite).await?;

        let sender_owner = active_user(uow.as_mut(), caller_id).await?;
        let mut sender = owned_account(uow.as_mut(), caller_id, from).await?;
        active_bank(uow.as_mut(), sender.bank_id).await?;
        ensure_sufficient(&sender, amount)?;

        let debit = Posting::transfer_out(amount, to).post(&mut sender)?;
        write_posting(uow.as_mut(), &sender, debit).await?;
        set_user_total(
            uow.as_mut(),
            &sender_owner,
            adjust(sender_owner.total_balance, -amount)?,
        )
        .await?;

        let mut receiver = uow
            .find_account(&AccountFilter::by_number(to.clone()))
            .await?
            .ok_or_else(|| LedgerError::not_found(EntityKind::CounterpartAccount, to))?;
        if !receiver.can_transact() {
            return Err(LedgerError::inactive(EntityKind::CounterpartAccount, to));
        }
        // Re-read: when both accounts share an owner this sees the debit above.
        let receiver_owner = active_user(uow.as_mut(), receiver.user_id).await?;
        active_bank(uow.as_mut(), receiver.bank_id).await?;

        let credit = Posting::transfer_in(amount, from).post(&mut receiver)?;
        write_posting(uow.as_mut(), &receiver, credit).await?;
        set_user_total(
            uow.as_mut(),
            &receiver_owner,
            adjust(receiver_owner.total_balance, amount)?,
        )
        .await?;

        let bank_transaction = if sender.bank_id != receiver.bank_id {
            let record = BankTransaction::new(sender.bank_id, receiver.bank_id, amount);
            uow.insert_bank_transaction(record.clone()).await?;
            Some(record)
        } else {
            None
        };

        uow.commit().await?;

        info!(
            from = %from,
            to = %to,
            amount = %amount,
            interbank = bank_transaction.is_some(),
            "Transfer recorded"
        );

        Ok(TransferReceipt {
            sender,
            receiver,
            bank_transaction,
        })
    }

    /// Get one of the caller's accounts with its passbook.
    #[instrument(skip(self))]
    pub async fn get_account(&self, caller_id: UserId, account_id: AccountId) -> Result<Account> {
        let mut uow = self.store.begin(AccessMode::ReadOnly).await?;
        active_user(uow.as_mut(), caller_id).await?;

        let account = uow
            .find_account(&AccountFilter::by_id(account_id))
            .await?
            .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account_id))?;
        ensure_owner(&account, caller_id)?;

        uow.commit().await?;
        Ok(account)
    }

    /// List the caller's live accounts.
    #[instrument(skip(self))]
    pub async fn list_accounts(&self, caller_id: UserId, page: PageRequest) -> Result<Page<Account>> {
        let mut uow = self.store.begin(AccessMode::ReadOnly).await?;
        active_user(uow.as_mut(), caller_id).await?;

        let accounts = uow
            .list_accounts(&AccountFilter::owned_by(caller_id), page)
            .await?;

        uow.commit().await?;
        Ok(accounts)
    }

    /// Page through the passbook of one of the caller's accounts.
    #[instrument(skip(self))]
    pub async fn passbook(
        &self,
        caller_id: UserId,
        account_number: &AccountNumber,
        page: PageRequest,
    ) -> Result<Page<PassbookEntry>> {
        let mut uow = self.store.begin(AccessMode::ReadOnly).await?;
        active_user(uow.as_mut(), caller_id).await?;
        let account = owned_account(uow.as_mut(), caller_id, account_number).await?;
        active_bank(uow.as_mut(), account.bank_id).await?;

        let entries = uow.list_entries(account.id, page).await?;

        uow.commit().await?;
        Ok(entries)
    }

    /// Page through a passbook by account ID instead of account number.
    #[instrument(skip(self))]
    pub async fn passbook_by_id(
        &self,
        caller_id: UserId,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Page<PassbookEntry>> {
        let mut uow = self.store.begin(AccessMode::ReadOnly).await?;
        active_user(uow.as_mut(), caller_id).await?;

        let account = uow
            .find_account(&AccountFilter::by_id(account_id))
            .await?
            .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account_id))?;
        ensure_owner(&account, caller_id)?;
        if !account.can_transact() {
            return Err(LedgerError::inactive(EntityKind::Account, account_id));
        }
        active_bank(uow.as_mut(), account.bank_id).await?;

        let entries = uow.list_entries(account.id, page).await?;

        uow.commit().await?;
        Ok(entries)
    }

    /// Soft-delete one of the caller's accounts. The balance must be zero.
    #[instrument(skip(self))]
    pub async fn close_account(&self, caller_id: UserId, account_id: AccountId) -> Result<Account> {
        let mut uow = self.store.begin(AccessMode::ReadWrite).await?;
        active_user(uow.as_mut(), caller_id).await?;

        let mut account = uow
            .find_account(&AccountFilter::by_id(account_id))
            .await?
            .ok_or_else(|| LedgerError::not_found(EntityKind::Account, account_id))?;
        ensure_owner(&account, caller_id)?;

        if !account.balance.is_zero() {
            return Err(LedgerError::validation_field(
                format!(
                    "Account {} still holds {}; withdraw or transfer it first",
                    account.account_number, account.balance
                ),
                "balance",
            ));
        }

        let update = AccountUpdate::soft_delete(caller_id);
        let updated = uow
            .update_accounts(&AccountFilter::by_id(account_id), &update)
            .await?;
        ensure_single_row(updated, &account.id)?;
        update.apply(&mut account);

        uow.commit().await?;

        info!(account = %account.account_number, "Account closed");
        Ok(account)
    }

    /// Scan every account and user for broken invariants.
    #[instrument(skip(self))]
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        let mut uow = self.store.begin(AccessMode::ReadOnly).await?;
        let users = uow.list_users(&UserFilter::default()).await?;
        let accounts = uow
            .list_accounts(&AccountFilter::default().including_deleted(), PageRequest::all())
            .await?;
        uow.commit().await?;

        let report = audit(&users, &accounts.items);
        if report.is_clean() {
            info!(
                accounts = report.accounts_checked,
                users = report.users_checked,
                "Ledger integrity verified"
            );
        } else {
            warn!(
                violations = report.violations.len(),
                "Ledger integrity violations found"
            );
        }

        Ok(report)
    }
}

async fn active_user(uow: &mut dyn UnitOfWork, id: UserId) -> Result<User> {
    let user = uow
        .get_user(id)
        .await?
        .ok_or_else(|| LedgerError::not_found(EntityKind::User, id))?;
    if !user.is_active {
        return Err(LedgerError::inactive(EntityKind::User, id));
    }
    Ok(user)
}

async fn active_bank(uow: &mut dyn UnitOfWork, id: BankId) -> Result<Bank> {
    let bank = uow
        .get_bank(id)
        .await?
        .ok_or_else(|| LedgerError::not_found(EntityKind::Bank, id))?;
    if !bank.is_active {
        return Err(LedgerError::inactive(EntityKind::Bank, id));
    }
    Ok(bank)
}

/// Resolve an account by number and check it belongs to `caller_id` and is active.
async fn owned_account(
    uow: &mut dyn UnitOfWork,
    caller_id: UserId,
    number: &AccountNumber,
) -> Result<Account> {
    let account = uow
        .find_account(&AccountFilter::by_number(number.clone()))
        .await?
        .ok_or_else(|| LedgerError::not_found(EntityKind::Account, number))?;
    ensure_owner(&account, caller_id)?;
    if !account.can_transact() {
        return Err(LedgerError::inactive(EntityKind::Account, number));
    }
    Ok(account)
}

fn ensure_owner(account: &Account, caller_id: UserId) -> Result<()> {
    if account.user_id != caller_id {
        return Err(LedgerError::Unauthorized(format!(
            "account {} does not belong to user {}",
            account.account_number, caller_id
        )));
    }
    Ok(())
}

fn ensure_sufficient(account: &Account, amount: Decimal) -> Result<()> {
    if account.balance < amount {
        return Err(LedgerError::validation_field(
            format!(
                "Insufficient balance in account {}: {} < {}",
                account.account_number, account.balance, amount
            ),
            "amount",
        ));
    }
    Ok(())
}

fn ensure_single_row(updated: u64, id: &AccountId) -> Result<()> {
    if updated != 1 {
        return Err(LedgerError::Persistence(format!(
            "expected to update account {id}, updated {updated} rows"
        )));
    }
    Ok(())
}

/// Persist a posting already applied to `account`.
async fn write_posting(
    uow: &mut dyn UnitOfWork,
    account: &Account,
    entry: PassbookEntry,
) -> Result<()> {
    let updated = uow
        .update_accounts(
            &AccountFilter::by_id(account.id),
            &AccountUpdate::balance(account.balance),
        )
        .await?;
    ensure_single_row(updated, &account.id)?;
    uow.append_entry(entry).await?;
    Ok(())
}

async fn set_user_total(uow: &mut dyn UnitOfWork, user: &User, total: Decimal) -> Result<()> {
    let updated = uow
        .update_users(&UserFilter::by_id(user.id), &UserUpdate::total_balance(total))
        .await?;
    if updated != 1 {
        return Err(LedgerError::Persistence(format!(
            "expected to update user {}, updated {updated} rows",
            user.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use passbook_common::{EntryKind, ErrorKind};
    use passbook_store::InMemoryStore;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: InMemoryStore,
        engine: LedgerEngine,
        alice: User,
        bob: User,
        bank_x: Bank,
        bank_y: Bank,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let alice = User::new();
        let bob = User::new();
        let bank_x = Bank::new("Xavier National Bank");
        let bank_y = Bank::new("Yellow River Bank");

        store.put_user(alice.clone()).await;
        store.put_user(bob.clone()).await;
        store.put_bank(bank_x.clone()).await;
        store.put_bank(bank_y.clone()).await;

        let engine = LedgerEngine::with_seed(Arc::new(store.clone()), LedgerConfig::default(), 7);

        Fixture {
            store,
            engine,
            alice,
            bob,
            bank_x,
            bank_y,
        }
    }

    async fn total_of(store: &InMemoryStore, user: &User) -> Decimal {
        store.user(user.id).await.unwrap().total_balance
    }

    #[tokio::test]
    async fn test_create_account_with_default_opening_balance() {
        let f = fixture().await;

        let account = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();

        assert_eq!(account.balance, dec!(1000));
        assert_eq!(account.passbook.len(), 1);
        assert_eq!(account.passbook[0].kind, EntryKind::AccountCreation);
        assert_eq!(account.passbook[0].amount, dec!(1000));
        assert_eq!(total_of(&f.store, &f.alice).await, dec!(1000));

        let stored = f.engine.get_account(f.alice.id, account.id).await.unwrap();
        assert_eq!(stored, account);
    }

    #[tokio::test]
    async fn test_create_account_rejections() {
        let f = fixture().await;

        let err = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, dec!(-5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = f
            .engine
            .create_account(UserId::new(), f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut closed_bank = Bank::new("Closed Savings Bank");
        closed_bank.is_active = false;
        f.store.put_bank(closed_bank.clone()).await;
        let err = f
            .engine
            .create_account(f.alice.id, closed_bank.id, Decimal::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InactiveEntity);

        assert_eq!(total_of(&f.store, &f.alice).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_create_account_exhausts_number_space() {
        let f = fixture().await;
        let first = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();

        // Same seed, so the first draw collides with the account above.
        let config = LedgerConfig {
            account_number_attempts: 1,
            ..LedgerConfig::default()
        };
        let replay = LedgerEngine::with_seed(Arc::new(f.store.clone()), config, 7);
        let err = replay
            .create_account(f.bob.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Exhaustion);
        assert_eq!(total_of(&f.store, &f.bob).await, Decimal::ZERO);
        assert_eq!(
            f.engine.get_account(f.alice.id, first.id).await.unwrap(),
            first
        );
    }

    #[tokio::test]
    async fn test_deposit_then_overdraw() {
        let f = fixture().await;
        let account = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();
        let number = account.account_number.clone();

        let account = f.engine.deposit(f.alice.id, &number, dec!(500)).await.unwrap();
        assert_eq!(account.balance, dec!(1500));
        let amounts: Vec<Decimal> = account.passbook.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![dec!(1000), dec!(500)]);

        let err = f
            .engine
            .withdraw(f.alice.id, &number, dec!(2000))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let stored = f.engine.get_account(f.alice.id, account.id).await.unwrap();
        assert_eq!(stored.balance, dec!(1500));
        assert_eq!(stored.passbook.len(), 2);
        assert_eq!(total_of(&f.store, &f.alice).await, dec!(1500));
    }

    #[tokio::test]
    async fn test_withdraw_exact_balance() {
        let f = fixture().await;
        let account = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, dec!(75.25))
            .await
            .unwrap();

        let account = f
            .engine
            .withdraw(f.alice.id, &account.account_number, dec!(75.25))
            .await
            .unwrap();

        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.passbook[1].kind, EntryKind::Withdrawal);
        assert_eq!(account.passbook[1].amount, dec!(-75.25));
        assert_eq!(total_of(&f.store, &f.alice).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_operation_rejections() {
        let f = fixture().await;
        let account = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();
        let number = account.account_number.clone();

        let kind = |r: Result<Account>| r.unwrap_err().kind();

        assert_eq!(
            kind(f.engine.deposit(f.alice.id, &number, Decimal::ZERO).await),
            ErrorKind::Validation
        );
        assert_eq!(
            kind(f.engine.deposit(f.alice.id, &number, dec!(0.001)).await),
            ErrorKind::Validation
        );
        assert_eq!(
            kind(f.engine.withdraw(f.bob.id, &number, dec!(1)).await),
            ErrorKind::Unauthorized
        );
        let unknown = AccountNumber::parse("999999999999").unwrap();
        assert_eq!(
            kind(f.engine.deposit(f.alice.id, &unknown, dec!(1)).await),
            ErrorKind::NotFound
        );

        let mut bank_x = f.bank_x.clone();
        bank_x.is_active = false;
        f.store.put_bank(bank_x).await;
        assert_eq!(
            kind(f.engine.deposit(f.alice.id, &number, dec!(1)).await),
            ErrorKind::InactiveEntity
        );

        let mut alice = f.store.user(f.alice.id).await.unwrap();
        alice.is_active = false;
        f.store.put_user(alice).await;
        assert_eq!(
            kind(f.engine.deposit(f.alice.id, &number, dec!(1)).await),
            ErrorKind::InactiveEntity
        );

        let stored = f.store.account(account.id).await.unwrap();
        assert_eq!(stored.balance, dec!(1000));
        assert_eq!(stored.passbook.len(), 1);
    }

    #[tokio::test]
    async fn test_cross_bank_transfer() {
        let f = fixture().await;
        let a = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();
        let a = f
            .engine
            .deposit(f.alice.id, &a.account_number, dec!(500))
            .await
            .unwrap();
        let b = f
            .engine
            .create_account(f.bob.id, f.bank_y.id, Decimal::ZERO)
            .await
            .unwrap();

        let receipt = f
            .engine
            .transfer(f.alice.id, &a.account_number, &b.account_number, dec!(300))
            .await
            .unwrap();

        assert_eq!(receipt.sender.balance, dec!(1200));
        assert_eq!(receipt.receiver.balance, dec!(1300));
        assert_eq!(receipt.sender.passbook.last().unwrap().kind, EntryKind::TransferOut);
        assert_eq!(receipt.receiver.passbook.last().unwrap().kind, EntryKind::TransferIn);

        let record = receipt.bank_transaction.unwrap();
        assert_eq!(record.sender_bank_id, f.bank_x.id);
        assert_eq!(record.receiver_bank_id, f.bank_y.id);
        assert_eq!(record.amount, dec!(300));
        assert_eq!(f.store.bank_transaction_count().await, 1);

        assert_eq!(total_of(&f.store, &f.alice).await, dec!(1200));
        assert_eq!(total_of(&f.store, &f.bob).await, dec!(1300));
        assert!(f.engine.verify_integrity().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_same_bank_transfer_between_own_accounts() {
        let f = fixture().await;
        let a = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();
        let b = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, dec!(10))
            .await
            .unwrap();

        let receipt = f
            .engine
            .transfer(f.alice.id, &a.account_number, &b.account_number, dec!(400))
            .await
            .unwrap();

        assert!(receipt.bank_transaction.is_none());
        assert_eq!(receipt.sender.balance, dec!(600));
        assert_eq!(receipt.receiver.balance, dec!(410));
        assert_eq!(f.store.bank_transaction_count().await, 0);
        assert_eq!(total_of(&f.store, &f.alice).await, dec!(1010));
        assert!(f.engine.verify_integrity().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_failed_transfer_rolls_back_debit() {
        let f = fixture().await;
        let a = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();
        let b = f
            .engine
            .create_account(f.bob.id, f.bank_y.id, Decimal::ZERO)
            .await
            .unwrap();

        let missing = AccountNumber::parse("000000000000").unwrap();
        let err = f
            .engine
            .transfer(f.alice.id, &a.account_number, &missing, dec!(300))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::NotFound {
                entity: EntityKind::CounterpartAccount,
                ..
            }
        ));

        let mut bank_y = f.bank_y.clone();
        bank_y.is_active = false;
        f.store.put_bank(bank_y).await;
        let err = f
            .engine
            .transfer(f.alice.id, &a.account_number, &b.account_number, dec!(300))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InactiveEntity);

        let stored = f.store.account(a.id).await.unwrap();
        assert_eq!(stored.balance, dec!(1000));
        assert_eq!(stored.passbook.len(), 1);
        assert_eq!(total_of(&f.store, &f.alice).await, dec!(1000));
        assert_eq!(f.store.bank_transaction_count().await, 0);
    }

    async fn assert_sender_untouched(f: &Fixture, sender: &Account) {
        let stored = f.store.account(sender.id).await.unwrap();
        assert_eq!(stored.balance, sender.balance);
        assert_eq!(stored.passbook.len(), sender.passbook.len());
        assert_eq!(total_of(&f.store, &f.alice).await, sender.balance);
        assert_eq!(f.store.bank_transaction_count().await, 0);
    }

    #[tokio::test]
    async fn test_transfer_to_inactive_owner_rolls_back() {
        let f = fixture().await;
        let a = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();
        let b = f
            .engine
            .create_account(f.bob.id, f.bank_y.id, Decimal::ZERO)
            .await
            .unwrap();

        let mut bob = f.store.user(f.bob.id).await.unwrap();
        bob.is_active = false;
        f.store.put_user(bob).await;

        let err = f
            .engine
            .transfer(f.alice.id, &a.account_number, &b.account_number, dec!(300))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InactiveEntity {
                entity: EntityKind::User,
                ..
            }
        ));
        assert_sender_untouched(&f, &a).await;
        assert_eq!(f.store.account(b.id).await.unwrap().balance, dec!(1000));
    }

    #[tokio::test]
    async fn test_transfer_to_inactive_account_rolls_back() {
        let f = fixture().await;
        let a = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();
        let b = f
            .engine
            .create_account(f.bob.id, f.bank_y.id, Decimal::ZERO)
            .await
            .unwrap();

        let mut uow = f.store.begin(AccessMode::ReadWrite).await.unwrap();
        let frozen = AccountUpdate {
            is_active: Some(false),
            ..AccountUpdate::default()
        };
        uow.update_accounts(&AccountFilter::by_id(b.id), &frozen)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let err = f
            .engine
            .transfer(f.alice.id, &a.account_number, &b.account_number, dec!(300))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InactiveEntity {
                entity: EntityKind::CounterpartAccount,
                ..
            }
        ));
        assert_sender_untouched(&f, &a).await;
    }

    #[tokio::test]
    async fn test_transfer_to_closed_account_rolls_back() {
        let f = fixture().await;
        let a = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();
        let b = f
            .engine
            .create_account(f.bob.id, f.bank_y.id, Decimal::ZERO)
            .await
            .unwrap();
        f.engine
            .withdraw(f.bob.id, &b.account_number, dec!(1000))
            .await
            .unwrap();
        f.engine.close_account(f.bob.id, b.id).await.unwrap();

        let err = f
            .engine
            .transfer(f.alice.id, &a.account_number, &b.account_number, dec!(300))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::NotFound {
                entity: EntityKind::CounterpartAccount,
                ..
            }
        ));
        assert_sender_untouched(&f, &a).await;
        assert!(f.engine.verify_integrity().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_deposit_out_of_range_rejected() {
        let f = fixture().await;
        let a = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();

        let err = f
            .engine
            .deposit(f.alice.id, &a.account_number, Decimal::MAX)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let stored = f.store.account(a.id).await.unwrap();
        assert_eq!(stored.balance, dec!(1000));
        assert_eq!(stored.passbook.len(), 1);
        assert_eq!(total_of(&f.store, &f.alice).await, dec!(1000));
    }

    #[tokio::test]
    async fn test_owner_total_out_of_range_rejected() {
        let f = fixture().await;
        f.engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::MAX)
            .await
            .unwrap();

        let err = f
            .engine
            .create_account(f.alice.id, f.bank_y.id, Decimal::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(total_of(&f.store, &f.alice).await, Decimal::MAX);

        let listed = f
            .engine
            .list_accounts(f.alice.id, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(listed.total, 1);
    }

    #[tokio::test]
    async fn test_transfer_to_same_account_rejected() {
        let f = fixture().await;
        let a = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();

        let err = f
            .engine
            .transfer(f.alice.id, &a.account_number, &a.account_number, dec!(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_passbook_pages_in_creation_order() {
        let f = fixture().await;
        let a = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();
        for n in 1..=4 {
            f.engine
                .deposit(f.alice.id, &a.account_number, Decimal::from(n))
                .await
                .unwrap();
        }

        let page = f
            .engine
            .passbook(f.alice.id, &a.account_number, PageRequest::new(2, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        let sequences: Vec<u64> = page.items.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);

        let err = f
            .engine
            .passbook(f.bob.id, &a.account_number, PageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let by_id = f
            .engine
            .passbook_by_id(f.alice.id, a.id, PageRequest::new(2, 2))
            .await
            .unwrap();
        assert_eq!(by_id, page);

        let err = f
            .engine
            .passbook_by_id(f.bob.id, a.id, PageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        let err = f
            .engine
            .passbook_by_id(f.alice.id, AccountId::new(), PageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_close_account_requires_zero_balance() {
        let f = fixture().await;
        let a = f
            .engine
            .create_account(f.alice.id, f.bank_x.id, Decimal::ZERO)
            .await
            .unwrap();
        f.engine
            .create_account(f.alice.id, f.bank_y.id, Decimal::ZERO)
            .await
            .unwrap();

        let err = f.engine.close_account(f.alice.id, a.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = f.engine.close_account(f.bob.id, a.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        f.engine
            .withdraw(f.alice.id, &a.account_number, dec!(1000))
            .await
            .unwrap();
        let closed = f.engine.close_account(f.alice.id, a.id).await.unwrap();
        assert!(!closed.is_active);
        assert!(closed.is_deleted());
        assert_eq!(closed.deleted_by, Some(f.alice.id));

        let err = f.engine.get_account(f.alice.id, a.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let listed = f
            .engine
            .list_accounts(f.alice.id, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(listed.total, 1);
        assert!(f.engine.verify_integrity().await.unwrap().is_clean());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Deposit(usize, u32),
        Withdraw(usize, u32),
        Transfer(usize, usize, u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, 1..50_000u32).prop_map(|(a, c)| Op::Deposit(a, c)),
            (0..4usize, 1..200_000u32).prop_map(|(a, c)| Op::Withdraw(a, c)),
            (0..4usize, 0..4usize, 1..200_000u32).prop_map(|(a, b, c)| Op::Transfer(a, b, c)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_invariants_hold_under_random_operations(ops in prop::collection::vec(op(), 1..40)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let f = fixture().await;
                let owners = [&f.alice, &f.alice, &f.bob, &f.bob];
                let banks = [&f.bank_x, &f.bank_y, &f.bank_x, &f.bank_y];

                let mut accounts = Vec::new();
                for (owner, bank) in owners.iter().zip(banks.iter()) {
                    let account = f.engine.create_account(owner.id, bank.id, Decimal::ZERO).await.unwrap();
                    accounts.push(account.account_number);
                }
                let mut expected_money = dec!(4000);

                for op in ops {
                    match op {
                        Op::Deposit(a, cents) => {
                            let amount = Decimal::new(cents as i64, 2);
                            if f.engine.deposit(owners[a].id, &accounts[a], amount).await.is_ok() {
                                expected_money += amount;
                            }
                        }
                        Op::Withdraw(a, cents) => {
                            let amount = Decimal::new(cents as i64, 2);
                            if f.engine.withdraw(owners[a].id, &accounts[a], amount).await.is_ok() {
                                expected_money -= amount;
                            }
                        }
                        Op::Transfer(a, b, cents) => {
                            let amount = Decimal::new(cents as i64, 2);
                            let _ = f.engine.transfer(owners[a].id, &accounts[a], &accounts[b], amount).await;
                        }
                    }
                }

                let report = f.engine.verify_integrity().await.unwrap();
                assert!(report.is_clean(), "{:?}", report.violations);

                let held = total_of(&f.store, &f.alice).await + total_of(&f.store, &f.bob).await;
                assert_eq!(held, expected_money);
            });
        }
    }
}
