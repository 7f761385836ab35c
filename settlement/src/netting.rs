//! Bilateral netting of interbank flows.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use passbook_common::{BankId, BankTransaction};

/// Which bank of a pair pays the net amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NettingDirection {
    /// The bank that received more pays the bank that sent more.
    #[default]
    NetReceiverPays,
    /// The bank that sent more pays the bank that received more.
    NetSenderPays,
}

impl fmt::Display for NettingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NettingDirection::NetReceiverPays => f.write_str("net_receiver_pays"),
            NettingDirection::NetSenderPays => f.write_str("net_sender_pays"),
        }
    }
}

impl FromStr for NettingDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "net_receiver_pays" | "receiver" => Ok(NettingDirection::NetReceiverPays),
            "net_sender_pays" | "sender" => Ok(NettingDirection::NetSenderPays),
            other => Err(format!("Unknown netting direction: {other}")),
        }
    }
}

/// One net obligation between two banks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementInstruction {
    pub payer: BankId,
    pub payee: BankId,
    /// Always positive.
    pub amount: Decimal,
}

/// Output of a netting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NettingReport {
    pub direction: NettingDirection,
    pub instructions: Vec<SettlementInstruction>,
    /// Sum of all source transaction amounts.
    pub gross_volume: Decimal,
    /// Sum of instruction amounts.
    pub net_volume: Decimal,
    /// Unordered bank pairs with flow in either direction.
    pub pairs_considered: usize,
    pub source_rows: usize,
}

impl NettingReport {
    /// Fraction of gross volume removed by netting, between 0 and 1.
    pub fn reduction(&self) -> Decimal {
        if self.gross_volume.is_zero() {
            return Decimal::ZERO;
        }
        Decimal::ONE - self.net_volume / self.gross_volume
    }
}

/// Directed gross flow totals per ordered bank pair.
#[derive(Debug, Clone, Default)]
pub struct FlowMatrix {
    flows: BTreeMap<(BankId, BankId), Decimal>,
    gross_volume: Decimal,
    source_rows: usize,
}

impl FlowMatrix {
    /// Create an empty matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate every transaction.
    pub fn from_transactions<'a>(rows: impl IntoIterator<Item = &'a BankTransaction>) -> Self {
        let mut matrix = Self::new();
        for row in rows {
            matrix.record(row.sender_bank_id, row.receiver_bank_id, row.amount);
        }
        matrix
    }

    /// Add `amount` to the flow from `sender` to `receiver`.
    pub fn record(&mut self, sender: BankId, receiver: BankId, amount: Decimal) {
        *self.flows.entry((sender, receiver)).or_default() += amount;
        self.gross_volume += amount;
        self.source_rows += 1;
    }

    /// Gross flow from `from` to `to`.
    pub fn flow(&self, from: BankId, to: BankId) -> Decimal {
        self.flows.get(&(from, to)).copied().unwrap_or_default()
    }

    /// Sum of every recorded amount.
    pub fn gross_volume(&self) -> Decimal {
        self.gross_volume
    }

    /// Net each unordered bank pair exactly once.
    ///
    /// Pairs are visited in sorted key order, so the output does not depend
    /// on the order transactions were recorded in.
    pub fn net(&self, direction: NettingDirection) -> NettingReport {
        let mut processed = BTreeSet::new();
        let mut instructions = Vec::new();

        for &(a, b) in self.flows.keys() {
            if a == b {
                continue;
            }
            let pair = if a < b { (a, b) } else { (b, a) };
            if !processed.insert(pair) {
                continue;
            }

            let net = self.flow(a, b) - self.flow(b, a);
            if net.is_zero() {
                continue;
            }

            // `sender` is the bank whose customers sent more across the pair.
            let (sender, receiver) = if net > Decimal::ZERO { (a, b) } else { (b, a) };
            let (payer, payee) = match direction {
                NettingDirection::NetReceiverPays => (receiver, sender),
                NettingDirection::NetSenderPays => (sender, receiver),
            };

            instructions.push(SettlementInstruction {
                payer,
                payee,
                amount: net.abs(),
            });
        }

        let net_volume = instructions.iter().map(|i| i.amount).sum();

        NettingReport {
            direction,
            instructions,
            gross_volume: self.gross_volume(),
            net_volume,
            pairs_considered: processed.len(),
            source_rows: self.source_rows,
        }
    }
}
