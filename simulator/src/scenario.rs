//! Simulation scenarios.

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A ledger operation. Owners and accounts are referred to by labels that
/// are bound the first time they appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Open an account; a zero opening balance uses the default.
    OpenAccount {
        label: String,
        owner: String,
        bank: String,
        #[serde(default)]
        opening_balance: Decimal,
    },
    Deposit { account: String, amount: Decimal },
    Withdraw { account: String, amount: Decimal },
    /// Transfer on behalf of the owner of `from`.
    Transfer {
        from: String,
        to: String,
        amount: Decimal,
    },
    /// Close an account; its balance must be zero.
    CloseAccount { account: String },
    /// Run settlement as the administrator.
    Settle,
}

/// A step in a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Perform an operation that must succeed.
    Run(Operation),
    /// Perform an operation that must fail with `code`.
    Fail { operation: Operation, code: String },
    /// Check a condition.
    Expect(Condition),
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Balance { account: String, amount: Decimal },
    /// Signed passbook amounts in creation order.
    PassbookAmounts { account: String, amounts: Vec<Decimal> },
    OwnerTotal { owner: String, amount: Decimal },
    BankTransactionCount { count: usize },
    /// Number of instructions from the last settlement.
    InstructionCount { count: usize },
    /// The last settlement nets `banks` to `amount`, in either direction.
    Instruction { banks: [String; 2], amount: Decimal },
    /// The integrity audit finds no violation.
    LedgerConsistent,
}

impl Scenario {
    /// Names of the built-in scenarios.
    pub const BUILT_IN: [&'static str; 5] = [
        "default-opening-balance",
        "deposit",
        "overdraft",
        "cross-bank-transfer",
        "settlement-netting",
    ];

    /// Load a built-in scenario by name, or a JSON scenario from a path.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "default-opening-balance" => Ok(Self::default_opening_balance()),
            "deposit" => Ok(Self::deposit()),
            "overdraft" => Ok(Self::overdraft()),
            "cross-bank-transfer" => Ok(Self::cross_bank_transfer()),
            "settlement-netting" => Ok(Self::settlement_netting()),
            path if path.ends_with(".json") || Path::new(path).is_file() => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_json(&raw)
            }
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (built-in: {})",
                name,
                Self::BUILT_IN.join(", ")
            )),
        }
    }

    /// Parse a scenario from JSON.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    fn open(label: &str, owner: &str, bank: &str) -> ScenarioStep {
        ScenarioStep::Run(Operation::OpenAccount {
            label: label.to_string(),
            owner: owner.to_string(),
            bank: bank.to_string(),
            opening_balance: Decimal::ZERO,
        })
    }

    fn balance(account: &str, amount: i64) -> ScenarioStep {
        ScenarioStep::Expect(Condition::Balance {
            account: account.to_string(),
            amount: Decimal::from(amount),
        })
    }

    fn transfer(from: &str, to: &str, amount: i64) -> ScenarioStep {
        ScenarioStep::Run(Operation::Transfer {
            from: from.to_string(),
            to: to.to_string(),
            amount: Decimal::from(amount),
        })
    }

    /// Opening without an explicit balance uses the default.
    fn default_opening_balance() -> Self {
        Self {
            name: "default-opening-balance".to_string(),
            description: "Open an account without an opening balance".to_string(),
            steps: vec![
                Self::open("A", "alice", "BANK_A"),
                Self::balance("A", 1000),
                ScenarioStep::Expect(Condition::PassbookAmounts {
                    account: "A".to_string(),
                    amounts: vec![Decimal::from(1000)],
                }),
                ScenarioStep::Expect(Condition::OwnerTotal {
                    owner: "alice".to_string(),
                    amount: Decimal::from(1000),
                }),
            ],
        }
    }

    fn deposit() -> Self {
        Self {
            name: "deposit".to_string(),
            description: "Deposit into a freshly opened account".to_string(),
            steps: vec![
                Self::open("A", "alice", "BANK_A"),
                ScenarioStep::Run(Operation::Deposit {
                    account: "A".to_string(),
                    amount: Decimal::from(500),
                }),
                Self::balance("A", 1500),
                ScenarioStep::Expect(Condition::PassbookAmounts {
                    account: "A".to_string(),
                    amounts: vec![Decimal::from(1000), Decimal::from(500)],
                }),
            ],
        }
    }

    /// Withdrawing more than the balance fails and changes nothing.
    fn overdraft() -> Self {
        Self {
            name: "overdraft".to_string(),
            description: "Withdraw more than the balance".to_string(),
            steps: vec![
                Self::open("A", "alice", "BANK_A"),
                ScenarioStep::Run(Operation::Deposit {
                    account: "A".to_string(),
                    amount: Decimal::from(500),
                }),
                ScenarioStep::Fail {
                    operation: Operation::Withdraw {
                        account: "A".to_string(),
                        amount: Decimal::from(2000),
                    },
                    code: "VALIDATION".to_string(),
                },
                Self::balance("A", 1500),
                ScenarioStep::Expect(Condition::OwnerTotal {
                    owner: "alice".to_string(),
                    amount: Decimal::from(1500),
                }),
            ],
        }
    }

    fn cross_bank_transfer() -> Self {
        Self {
            name: "cross-bank-transfer".to_string(),
            description: "Transfer between accounts held at different banks".to_string(),
            steps: vec![
                Self::open("A", "alice", "BANK_A"),
                ScenarioStep::Run(Operation::Deposit {
                    account: "A".to_string(),
                    amount: Decimal::from(500),
                }),
                Self::open("B", "bob", "BANK_B"),
                Self::transfer("A", "B", 300),
                Self::balance("A", 1200),
                Self::balance("B", 1300),
                ScenarioStep::Expect(Condition::BankTransactionCount { count: 1 }),
                ScenarioStep::Expect(Condition::OwnerTotal {
                    owner: "alice".to_string(),
                    amount: Decimal::from(1200),
                }),
                ScenarioStep::Expect(Condition::OwnerTotal {
                    owner: "bob".to_string(),
                    amount: Decimal::from(1300),
                }),
                ScenarioStep::Expect(Condition::LedgerConsistent),
            ],
        }
    }

    /// Opposing transfers net to a single instruction.
    fn settlement_netting() -> Self {
        Self {
            name: "settlement-netting".to_string(),
            description: "Net opposing interbank transfers".to_string(),
            steps: vec![
                Self::open("A", "alice", "BANK_A"),
                Self::open("B", "bob", "BANK_B"),
                Self::transfer("A", "B", 300),
                Self::transfer("B", "A", 100),
                ScenarioStep::Run(Operation::Settle),
                ScenarioStep::Expect(Condition::InstructionCount { count: 1 }),
                ScenarioStep::Expect(Condition::Instruction {
                    banks: ["BANK_A".to_string(), "BANK_B".to_string()],
                    amount: Decimal::from(200),
                }),
                ScenarioStep::Expect(Condition::BankTransactionCount { count: 2 }),
            ],
        }
    }
}
