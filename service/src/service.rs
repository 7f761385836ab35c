//! Ledger service facade.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use passbook_common::{
    Account, AccountId, AccountNumber, BankId, LedgerError, PassbookEntry, Result, UserId,
};
use passbook_ledger::{IntegrityReport, LedgerEngine, TransferReceipt};
use passbook_settlement::{NettingReport, SettlementEngine};
use passbook_store::{EntityStore, Page, PageRequest};

use crate::config::ServiceConfig;
use crate::metrics::{Metrics, SharedMetrics};
use crate::state::ServiceState;

/// Entry point for all ledger and settlement operations.
///
/// Requests are refused with [`LedgerError::Unavailable`] unless the
/// service is running.
pub struct LedgerService {
    config: ServiceConfig,
    ledger: LedgerEngine,
    settlement: SettlementEngine,
    state: Arc<RwLock<ServiceState>>,
    metrics: SharedMetrics,
    /// Signalled when the last in-flight request leaves.
    drained: Arc<Notify>,
}

/// Keeps a request counted as in flight until dropped, whether the request
/// completed or its future was dropped first.
struct InFlight<'a> {
    metrics: &'a Metrics,
    drained: &'a Notify,
}

impl<'a> InFlight<'a> {
    fn enter(metrics: &'a Metrics, drained: &'a Notify) -> Self {
        metrics.request_entered();
        Self { metrics, drained }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.metrics.request_left() == 0 {
            self.drained.notify_waiters();
        }
    }
}

impl LedgerService {
    /// Create a new service over `store`.
    pub fn new(config: ServiceConfig, store: Arc<dyn EntityStore>) -> Self {
        let ledger = match config.rng_seed {
            Some(seed) => LedgerEngine::with_seed(store.clone(), config.ledger.clone(), seed),
            None => LedgerEngine::new(store.clone(), config.ledger.clone()),
        };
        let settlement = SettlementEngine::new(store, config.settlement.clone());

        Self {
            config,
            ledger,
            settlement,
            state: Arc::new(RwLock::new(ServiceState::Starting)),
            metrics: Arc::new(Metrics::new()),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Get current state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Check if accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state().accepts_requests()
    }

    /// Shared metrics.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Start serving requests.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        self.config.validate().map_err(LedgerError::validation)?;

        {
            let mut state = self.state.write();
            if !state.can_start() {
                return Err(LedgerError::Unavailable(format!(
                    "cannot start from state {:?}",
                    *state
                )));
            }
            *state = ServiceState::Running;
        }

        info!(
            direction = %self.settlement.config().direction,
            default_opening_balance = %self.ledger.config().default_opening_balance,
            seeded = self.config.rng_seed.is_some(),
            "Ledger service started"
        );
        Ok(())
    }

    /// Stop accepting requests and wait for in-flight ones.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        *self.state.write() = ServiceState::ShuttingDown;

        self.drain_in_flight().await;

        *self.state.write() = ServiceState::Stopped;
        info!("Ledger service stopped");
        Ok(())
    }

    async fn drain_in_flight(&self) {
        let drain = async {
            loop {
                let drained = self.drained.notified();
                tokio::pin!(drained);
                drained.as_mut().enable();

                let active = self.metrics.in_flight();
                if active == 0 {
                    break;
                }
                info!(active, "Waiting for in-flight requests to complete");
                drained.await;
            }
        };

        if tokio::time::timeout(self.config.drain_timeout(), drain)
            .await
            .is_err()
        {
            warn!(
                active = self.metrics.in_flight(),
                "Drain timed out, stopping with requests in flight"
            );
        }
    }

    async fn run<T>(&self, operation: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        // Counted before the state check, under the state lock, so `stop`
        // either refuses the request or waits for it.
        let admitted = {
            let state = self.state.read();
            let in_flight = InFlight::enter(&self.metrics, &self.drained);
            if state.accepts_requests() {
                Ok(in_flight)
            } else {
                Err(*state)
            }
        };
        let _in_flight = match admitted {
            Ok(in_flight) => in_flight,
            Err(state) => {
                self.metrics.request_rejected();
                warn!(operation, ?state, "Request refused");
                return Err(LedgerError::Unavailable(format!(
                    "service is {state:?}, not accepting {operation}"
                )));
            }
        };

        self.metrics.request_started();
        let result = fut.await;
        match &result {
            Ok(_) => self.metrics.request_succeeded(),
            Err(err) => {
                self.metrics.request_failed(err);
                debug!(operation, code = err.error_code(), error = %err, "Request failed");
            }
        }
        result
    }

    /// Open an account; a zero opening balance uses the configured default.
    pub async fn create_account(
        &self,
        owner_id: UserId,
        bank_id: BankId,
        opening_balance: Decimal,
    ) -> Result<Account> {
        let account = self
            .run(
                "create_account",
                self.ledger.create_account(owner_id, bank_id, opening_balance),
            )
            .await?;
        self.metrics.account_created();
        Ok(account)
    }

    /// Deposit into one of the caller's accounts.
    pub async fn deposit(
        &self,
        caller_id: UserId,
        account_number: &AccountNumber,
        amount: Decimal,
    ) -> Result<Account> {
        let account = self
            .run("deposit", self.ledger.deposit(caller_id, account_number, amount))
            .await?;
        self.metrics.deposit_recorded();
        Ok(account)
    }

    /// Withdraw from one of the caller's accounts.
    pub async fn withdraw(
        &self,
        caller_id: UserId,
        account_number: &AccountNumber,
        amount: Decimal,
    ) -> Result<Account> {
        let account = self
            .run("withdraw", self.ledger.withdraw(caller_id, account_number, amount))
            .await?;
        self.metrics.withdrawal_recorded();
        Ok(account)
    }

    /// Transfer from one of the caller's accounts to any active account.
    pub async fn transfer(
        &self,
        caller_id: UserId,
        from: &AccountNumber,
        to: &AccountNumber,
        amount: Decimal,
    ) -> Result<TransferReceipt> {
        let receipt = self
            .run("transfer", self.ledger.transfer(caller_id, from, to, amount))
            .await?;
        self.metrics
            .transfer_recorded(receipt.bank_transaction.is_some());
        Ok(receipt)
    }

    /// Get one of the caller's accounts with its passbook.
    pub async fn get_account(&self, caller_id: UserId, account_id: AccountId) -> Result<Account> {
        self.run("get_account", self.ledger.get_account(caller_id, account_id))
            .await
    }

    /// List the caller's live accounts.
    pub async fn list_accounts(&self, caller_id: UserId, page: PageRequest) -> Result<Page<Account>> {
        self.run("list_accounts", self.ledger.list_accounts(caller_id, page))
            .await
    }

    /// Page through a passbook by account number.
    pub async fn passbook(
        &self,
        caller_id: UserId,
        account_number: &AccountNumber,
        page: PageRequest,
    ) -> Result<Page<PassbookEntry>> {
        self.run(
            "passbook",
            self.ledger.passbook(caller_id, account_number, page),
        )
        .await
    }

    /// Page through a passbook by account ID.
    pub async fn passbook_by_id(
        &self,
        caller_id: UserId,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Page<PassbookEntry>> {
        self.run(
            "passbook_by_id",
            self.ledger.passbook_by_id(caller_id, account_id, page),
        )
        .await
    }

    /// Soft-delete one of the caller's accounts once it is empty.
    pub async fn close_account(&self, caller_id: UserId, account_id: AccountId) -> Result<Account> {
        let account = self
            .run("close_account", self.ledger.close_account(caller_id, account_id))
            .await?;
        self.metrics.account_closed();
        Ok(account)
    }

    /// Net interbank obligations; requires an active administrator.
    pub async fn settle(&self, requester_id: UserId) -> Result<NettingReport> {
        let report = self
            .run("settle", self.settlement.settle(requester_id))
            .await?;
        self.metrics.settlement_computed();
        Ok(report)
    }

    /// Audit every account and user.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        self.run("verify_integrity", self.ledger.verify_integrity())
            .await
    }
}
