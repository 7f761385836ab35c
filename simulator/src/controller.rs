//! Simulation controller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, ensure};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use passbook_common::{AccountId, AccountNumber, LedgerError, Result as LedgerResult, User, UserId};
use passbook_ledger::IntegrityReport;
use passbook_service::{LedgerService, MetricsSnapshot, ServiceConfig};
use passbook_settlement::NettingReport;
use passbook_store::{InMemoryStore, PageRequest};

use crate::bank::Directory;
use crate::metrics::SimulationMetrics;
use crate::scenario::{Condition, Operation, Scenario, ScenarioStep};

/// Account opened during a run.
#[derive(Debug, Clone)]
struct OpenedAccount {
    owner: UserId,
    id: AccountId,
    number: AccountNumber,
}

/// One randomly generated workload operation, by account index.
#[derive(Debug, Clone)]
enum WorkloadOp {
    Deposit(usize, Decimal),
    Withdraw(usize, Decimal),
    Transfer(usize, usize, Decimal),
    Passbook(usize),
}

/// Labels bound while running a scenario.
#[derive(Default)]
struct ScenarioContext {
    owners: HashMap<String, UserId>,
    accounts: HashMap<String, OpenedAccount>,
    last_settlement: Option<NettingReport>,
}

/// Final state of a run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub simulation: SimulationMetrics,
    pub service: MetricsSnapshot,
    pub settlement: NettingReport,
    pub integrity: IntegrityReport,
}

/// Controls the simulation.
pub struct SimulationController {
    store: InMemoryStore,
    service: Arc<LedgerService>,
    directory: Directory,
    /// Random number generator.
    rng: Arc<RwLock<StdRng>>,
    accounts: Arc<Vec<OpenedAccount>>,
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(config: ServiceConfig, banks: usize, customers: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let store = InMemoryStore::new();
        let service = Arc::new(LedgerService::new(config, Arc::new(store.clone())));

        Self {
            store,
            service,
            directory: Directory::generate(banks, customers),
            rng: Arc::new(RwLock::new(rng)),
            accounts: Arc::new(Vec::new()),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    /// Seed the directory and start the service.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!(
            banks = self.directory.banks.len(),
            customers = self.directory.customers.len(),
            direction = %self.service.config().settlement.direction,
            "Initializing simulation"
        );

        self.directory.seed(&self.store).await;
        self.service.start().await?;
        Ok(())
    }

    /// Open `per_customer` accounts for every customer at random banks.
    pub async fn open_accounts(&mut self, per_customer: usize) -> anyhow::Result<()> {
        ensure!(!self.directory.banks.is_empty(), "At least one bank is required");

        let mut opened = Vec::with_capacity(self.directory.customers.len() * per_customer);
        for customer in &self.directory.customers {
            for _ in 0..per_customer {
                let (bank_idx, opening) = {
                    let mut rng = self.rng.write().await;
                    let bank_idx = rng.gen_range(0..self.directory.banks.len());
                    // Zero picks the default opening balance.
                    let opening = if rng.gen_bool(0.5) {
                        Decimal::ZERO
                    } else {
                        Decimal::new(rng.gen_range(1..500_000), 2)
                    };
                    (bank_idx, opening)
                };

                let bank_id = self.directory.banks[bank_idx].bank.id;
                let account = self
                    .service
                    .create_account(customer.id, bank_id, opening)
                    .await?;
                opened.push(OpenedAccount {
                    owner: customer.id,
                    id: account.id,
                    number: account.account_number,
                });
            }
        }

        info!(accounts = opened.len(), "Accounts opened");
        self.accounts = Arc::new(opened);
        Ok(())
    }

    /// Run a random workload of `operations` spread over `concurrency` tasks.
    pub async fn run_workload(&self, operations: usize, concurrency: usize) -> anyhow::Result<()> {
        ensure!(!self.accounts.is_empty(), "No accounts to operate on");

        let plan = self.plan(operations).await;
        let workers = concurrency.max(1);
        let mut batches: Vec<Vec<WorkloadOp>> = vec![Vec::new(); workers];
        for (idx, op) in plan.into_iter().enumerate() {
            batches[idx % workers].push(op);
        }

        info!(operations, workers, "Running workload");
        let started = Instant::now();

        let handles = batches.into_iter().map(|batch| {
            let service = self.service.clone();
            let accounts = self.accounts.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                for op in batch {
                    execute(&service, &accounts, &metrics, op).await;
                }
            })
        });

        for joined in join_all(handles).await {
            joined?;
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Workload complete"
        );
        Ok(())
    }

    async fn plan(&self, operations: usize) -> Vec<WorkloadOp> {
        let mut rng = self.rng.write().await;
        let accounts = self.accounts.len();

        (0..operations)
            .map(|_| {
                let account = rng.gen_range(0..accounts);
                let amount = Decimal::new(rng.gen_range(1..100_000), 2);
                match rng.gen_range(0..10) {
                    0..=2 => WorkloadOp::Deposit(account, amount),
                    3..=5 => WorkloadOp::Withdraw(account, amount),
                    6..=8 => WorkloadOp::Transfer(account, rng.gen_range(0..accounts), amount),
                    _ => WorkloadOp::Passbook(account),
                }
            })
            .collect()
    }

    /// Run a scenario against a fresh set of labelled owners and accounts.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(scenario = %scenario.name, description = %scenario.description, "Running scenario");

        let mut ctx = ScenarioContext::default();
        for (idx, step) in scenario.steps.iter().enumerate() {
            self.execute_step(&mut ctx, step)
                .await
                .map_err(|e| anyhow!("Step {} of {} failed: {}", idx + 1, scenario.name, e))?;
        }

        info!(scenario = %scenario.name, steps = scenario.steps.len(), "Scenario passed");
        Ok(())
    }

    async fn execute_step(&self, ctx: &mut ScenarioContext, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Run(operation) => {
                self.perform(ctx, operation).await??;
            }
            ScenarioStep::Fail { operation, code } => match self.perform(ctx, operation).await? {
                Ok(()) => bail!("{operation:?} succeeded, expected {code}"),
                Err(err) if err.error_code() == code.as_str() => {
                    debug!(code = %code, "Operation failed as expected");
                }
                Err(err) => bail!("{operation:?} failed with {}, expected {code}: {err}", err.error_code()),
            },
            ScenarioStep::Expect(condition) => self.check(ctx, condition).await?,
        }
        Ok(())
    }

    /// Perform one scenario operation. The outer error covers scenario
    /// wiring problems, the inner one the ledger's answer.
    async fn perform(
        &self,
        ctx: &mut ScenarioContext,
        operation: &Operation,
    ) -> anyhow::Result<LedgerResult<()>> {
        let outcome = match operation {
            Operation::OpenAccount {
                label,
                owner,
                bank,
                opening_balance,
            } => {
                let owner_id = self.owner(ctx, owner).await;
                let bank_id = self
                    .directory
                    .bank(bank)
                    .ok_or_else(|| anyhow!("Unknown bank {bank}"))?
                    .id;
                let created = self
                    .timed(self.service.create_account(owner_id, bank_id, *opening_balance))
                    .await;
                created.map(|account| {
                    ctx.accounts.insert(
                        label.clone(),
                        OpenedAccount {
                            owner: owner_id,
                            id: account.id,
                            number: account.account_number,
                        },
                    );
                })
            }
            Operation::Deposit { account, amount } => {
                let account = labelled(ctx, account)?;
                self.timed(self.service.deposit(account.owner, &account.number, *amount))
                    .await
                    .map(|_| ())
            }
            Operation::Withdraw { account, amount } => {
                let account = labelled(ctx, account)?;
                self.timed(self.service.withdraw(account.owner, &account.number, *amount))
                    .await
                    .map(|_| ())
            }
            Operation::Transfer { from, to, amount } => {
                let sender = labelled(ctx, from)?;
                let receiver = labelled(ctx, to)?;
                self.timed(self.service.transfer(
                    sender.owner,
                    &sender.number,
                    &receiver.number,
                    *amount,
                ))
                .await
                .map(|_| ())
            }
            Operation::CloseAccount { account } => {
                let account = labelled(ctx, account)?;
                self.timed(self.service.close_account(account.owner, account.id))
                    .await
                    .map(|_| ())
            }
            Operation::Settle => {
                let report = self.timed(self.service.settle(self.directory.admin.id)).await;
                report.map(|report| {
                    ctx.last_settlement = Some(report);
                })
            }
        };
        Ok(outcome)
    }

    async fn check(&self, ctx: &ScenarioContext, condition: &Condition) -> anyhow::Result<()> {
        match condition {
            Condition::Balance { account, amount } => {
                let account = labelled(ctx, account)?;
                let stored = self.service.get_account(account.owner, account.id).await?;
                ensure!(
                    stored.balance == *amount,
                    "balance of {} is {}, expected {amount}",
                    stored.account_number,
                    stored.balance
                );
            }
            Condition::PassbookAmounts { account, amounts } => {
                let account = labelled(ctx, account)?;
                let page = self
                    .service
                    .passbook(account.owner, &account.number, PageRequest::all())
                    .await?;
                let actual: Vec<Decimal> = page.items.iter().map(|e| e.amount).collect();
                ensure!(
                    actual == *amounts,
                    "passbook of {} is {actual:?}, expected {amounts:?}",
                    account.number
                );
            }
            Condition::OwnerTotal { owner, amount } => {
                let owner_id = *ctx
                    .owners
                    .get(owner)
                    .ok_or_else(|| anyhow!("Unknown owner {owner}"))?;
                let user = self
                    .store
                    .user(owner_id)
                    .await
                    .ok_or_else(|| anyhow!("Owner {owner} missing from store"))?;
                ensure!(
                    user.total_balance == *amount,
                    "total of {owner} is {}, expected {amount}",
                    user.total_balance
                );
            }
            Condition::BankTransactionCount { count } => {
                let actual = self.store.bank_transaction_count().await;
                ensure!(actual == *count, "{actual} bank transactions, expected {count}");
            }
            Condition::InstructionCount { count } => {
                let report = last_settlement(ctx)?;
                ensure!(
                    report.instructions.len() == *count,
                    "{} instructions, expected {count}",
                    report.instructions.len()
                );
            }
            Condition::Instruction { banks, amount } => {
                let report = last_settlement(ctx)?;
                let mut pair = Vec::with_capacity(2);
                for code in banks {
                    let bank = self
                        .directory
                        .bank(code)
                        .ok_or_else(|| anyhow!("Unknown bank {code}"))?;
                    pair.push(bank.id);
                }
                let found = report.instructions.iter().find(|i| {
                    (i.payer == pair[0] && i.payee == pair[1]) || (i.payer == pair[1] && i.payee == pair[0])
                });
                match found {
                    Some(instruction) => ensure!(
                        instruction.amount == *amount,
                        "instruction between {} and {} is {}, expected {amount}",
                        banks[0],
                        banks[1],
                        instruction.amount
                    ),
                    None => bail!("no instruction between {} and {}", banks[0], banks[1]),
                }
            }
            Condition::LedgerConsistent => {
                let report = self.service.verify_integrity().await?;
                ensure!(report.is_clean(), "integrity violations: {:?}", report.violations);
            }
        }
        Ok(())
    }

    /// Resolve an owner label, creating the user on first use.
    async fn owner(&self, ctx: &mut ScenarioContext, label: &str) -> UserId {
        if let Some(id) = ctx.owners.get(label) {
            return *id;
        }
        let user = User::new();
        self.store.put_user(user.clone()).await;
        ctx.owners.insert(label.to_string(), user.id);
        user.id
    }

    async fn timed<T>(&self, fut: impl Future<Output = LedgerResult<T>>) -> LedgerResult<T> {
        let started = Instant::now();
        let result = fut.await;
        record(&self.metrics, started, &result).await;
        result
    }

    /// Settle as the administrator, audit the ledger and collect metrics.
    pub async fn finish(&self) -> anyhow::Result<SimulationReport> {
        let settlement = self.service.settle(self.directory.admin.id).await?;
        let integrity = self.service.verify_integrity().await?;
        if !integrity.is_clean() {
            warn!(violations = integrity.violations.len(), "Ledger inconsistent");
        }
        self.service.stop().await?;

        Ok(SimulationReport {
            simulation: self.metrics.read().await.clone(),
            service: self.service.metrics().snapshot(),
            settlement,
            integrity,
        })
    }
}

fn labelled<'a>(ctx: &'a ScenarioContext, label: &str) -> anyhow::Result<&'a OpenedAccount> {
    ctx.accounts
        .get(label)
        .ok_or_else(|| anyhow!("Unknown account label {label}"))
}

fn last_settlement(ctx: &ScenarioContext) -> anyhow::Result<&NettingReport> {
    ctx.last_settlement
        .as_ref()
        .ok_or_else(|| anyhow!("No settlement has run yet"))
}

async fn record<T>(
    metrics: &RwLock<SimulationMetrics>,
    started: Instant,
    result: &LedgerResult<T>,
) {
    let latency_us = started.elapsed().as_micros() as u64;
    let mut metrics = metrics.write().await;
    match result {
        Ok(_) => metrics.record_success(latency_us),
        Err(err) => metrics.record_failure(err.error_code()),
    }
}

async fn execute(
    service: &LedgerService,
    accounts: &[OpenedAccount],
    metrics: &RwLock<SimulationMetrics>,
    op: WorkloadOp,
) {
    let started = Instant::now();
    let result: LedgerResult<()> = match &op {
        WorkloadOp::Deposit(idx, amount) => {
            let account = &accounts[*idx];
            service
                .deposit(account.owner, &account.number, *amount)
                .await
                .map(|_| ())
        }
        WorkloadOp::Withdraw(idx, amount) => {
            let account = &accounts[*idx];
            service
                .withdraw(account.owner, &account.number, *amount)
                .await
                .map(|_| ())
        }
        WorkloadOp::Transfer(from, to, amount) => {
            let (sender, receiver) = (&accounts[*from], &accounts[*to]);
            service
                .transfer(sender.owner, &sender.number, &receiver.number, *amount)
                .await
                .map(|_| ())
        }
        WorkloadOp::Passbook(idx) => {
            let account = &accounts[*idx];
            service
                .passbook(account.owner, &account.number, PageRequest::default())
                .await
                .map(|_| ())
        }
    };

    if let Err(err) = &result {
        if !matches!(err, LedgerError::Validation { .. }) {
            warn!(?op, error = %err, "Workload operation failed");
        }
    }
    record(metrics, started, &result).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn controller(seed: u64) -> SimulationController {
        let config = ServiceConfig {
            rng_seed: Some(seed),
            ..ServiceConfig::default()
        };
        let mut controller = SimulationController::new(config, 3, 4, Some(seed));
        controller.initialize().await.unwrap();
        controller
    }

    #[tokio::test]
    async fn test_built_in_scenarios_pass() {
        for name in Scenario::BUILT_IN {
            let controller = controller(11).await;
            let scenario = Scenario::load(name).unwrap();
            controller.run_scenario(&scenario).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_expectation_reported() {
        let controller = controller(5).await;
        let scenario = Scenario::from_json(
            r#"{
                "name": "wrong",
                "description": "expects the wrong balance",
                "steps": [
                    {"Run": {"OpenAccount": {"label": "A", "owner": "dan", "bank": "BANK_A"}}},
                    {"Expect": {"Balance": {"account": "A", "amount": "999"}}}
                ]
            }"#,
        )
        .unwrap();

        let err = controller.run_scenario(&scenario).await.unwrap_err();
        assert!(err.to_string().contains("Step 2"));
    }

    #[tokio::test]
    async fn test_concurrent_workload_keeps_ledger_consistent() {
        let mut controller = controller(21).await;
        controller.open_accounts(2).await.unwrap();
        controller.run_workload(200, 8).await.unwrap();

        let report = controller.finish().await.unwrap();
        assert!(report.integrity.is_clean(), "{:?}", report.integrity.violations);
        assert_eq!(report.simulation.total_operations, 200);
        assert_eq!(report.service.accounts_created, 8);
        assert!(report.settlement.net_volume <= report.settlement.gross_volume);
    }
}
