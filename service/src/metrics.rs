//! Metrics collection for service monitoring.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use passbook_common::LedgerError;

/// Service metrics.
#[derive(Default)]
pub struct Metrics {
    /// Requests admitted while running.
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_failed: AtomicU64,
    /// Requests refused because the service was not running.
    pub requests_rejected: AtomicU64,
    /// Requests in progress.
    pub requests_active: AtomicU64,
    pub accounts_created: AtomicU64,
    pub accounts_closed: AtomicU64,
    pub deposits: AtomicU64,
    pub withdrawals: AtomicU64,
    pub transfers: AtomicU64,
    pub interbank_transfers: AtomicU64,
    pub settlements: AtomicU64,
    failures_by_code: DashMap<&'static str, u64>,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request arrived, admitted or not.
    pub fn request_entered(&self) {
        self.requests_active.fetch_add(1, Ordering::SeqCst);
    }

    /// A request left; returns how many are still in flight.
    pub fn request_left(&self) -> u64 {
        self.requests_active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    /// Requests currently in flight.
    pub fn in_flight(&self) -> u64 {
        self.requests_active.load(Ordering::SeqCst)
    }

    /// A request was admitted while running.
    pub fn request_started(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_succeeded(&self) {
        self.requests_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed request under its error code.
    pub fn request_failed(&self, err: &LedgerError) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        *self.failures_by_code.entry(err.error_code()).or_insert(0) += 1;
    }

    /// A request was refused because the service was not running.
    pub fn request_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// An account was opened.
    pub fn account_created(&self) {
        self.accounts_created.fetch_add(1, Ordering::Relaxed);
    }

    /// An account was closed.
    pub fn account_closed(&self) {
        self.accounts_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deposit_recorded(&self) {
        self.deposits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrawal_recorded(&self) {
        self.withdrawals.fetch_add(1, Ordering::Relaxed);
    }

    /// A transfer committed; `interbank` when the banks differ.
    pub fn transfer_recorded(&self, interbank: bool) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        if interbank {
            self.interbank_transfers.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A settlement run completed.
    pub fn settlement_computed(&self) {
        self.settlements.fetch_add(1, Ordering::Relaxed);
    }

    /// Failures recorded for one error code.
    pub fn failures(&self, code: &str) -> u64 {
        self.failures_by_code.get(code).map_or(0, |count| *count)
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_active: self.in_flight(),
            accounts_created: self.accounts_created.load(Ordering::Relaxed),
            accounts_closed: self.accounts_closed.load(Ordering::Relaxed),
            deposits: self.deposits.load(Ordering::Relaxed),
            withdrawals: self.withdrawals.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
            interbank_transfers: self.interbank_transfers.load(Ordering::Relaxed),
            settlements: self.settlements.load(Ordering::Relaxed),
            failures_by_code: self
                .failures_by_code
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let counters = [
            ("requests_total", "Requests admitted", snapshot.requests_total),
            ("requests_success", "Successful requests", snapshot.requests_success),
            ("requests_failed", "Failed requests", snapshot.requests_failed),
            ("requests_rejected", "Requests refused while not running", snapshot.requests_rejected),
            ("accounts_created", "Accounts opened", snapshot.accounts_created),
            ("accounts_closed", "Accounts closed", snapshot.accounts_closed),
            ("deposits", "Deposits recorded", snapshot.deposits),
            ("withdrawals", "Withdrawals recorded", snapshot.withdrawals),
            ("transfers", "Transfers recorded", snapshot.transfers),
            ("interbank_transfers", "Transfers between banks", snapshot.interbank_transfers),
            ("settlements", "Settlement runs", snapshot.settlements),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP passbook_{name} {help}\n# TYPE passbook_{name} counter\npassbook_{name} {value}\n\n"
            ));
        }

        out.push_str(&format!(
            "# HELP passbook_requests_active Requests in progress\n# TYPE passbook_requests_active gauge\npassbook_requests_active {}\n\n",
            snapshot.requests_active
        ));

        out.push_str("# HELP passbook_failures Failed requests by error code\n# TYPE passbook_failures counter\n");
        for (code, count) in &snapshot.failures_by_code {
            out.push_str(&format!("passbook_failures{{code=\"{code}\"}} {count}\n"));
        }

        out
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub requests_rejected: u64,
    pub requests_active: u64,
    pub accounts_created: u64,
    pub accounts_closed: u64,
    pub deposits: u64,
    pub withdrawals: u64,
    pub transfers: u64,
    pub interbank_transfers: u64,
    pub settlements: u64,
    pub failures_by_code: BTreeMap<String, u64>,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;
    use passbook_common::EntityKind;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.request_entered();
        metrics.request_started();
        metrics.request_entered();
        metrics.request_started();
        metrics.request_succeeded();
        assert_eq!(metrics.request_left(), 1);
        metrics.transfer_recorded(true);
        metrics.transfer_recorded(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.requests_success, 1);
        assert_eq!(snapshot.requests_active, 1);
        assert_eq!(snapshot.transfers, 2);
        assert_eq!(snapshot.interbank_transfers, 1);
    }

    #[test]
    fn test_failures_keyed_by_code() {
        let metrics = Metrics::new();
        for _ in 0..2 {
            metrics.request_entered();
            metrics.request_started();
            metrics.request_failed(&LedgerError::not_found(EntityKind::Account, "x"));
            metrics.request_left();
        }
        metrics.request_started();
        metrics.request_failed(&LedgerError::validation("bad"));

        assert_eq!(metrics.failures("NOT_FOUND"), 2);
        assert_eq!(metrics.failures("VALIDATION"), 1);
        assert_eq!(metrics.failures("EXHAUSTION"), 0);
        assert_eq!(metrics.snapshot().requests_active, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.deposit_recorded();
        metrics.request_started();
        metrics.request_failed(&LedgerError::Unauthorized("no".into()));

        let output = metrics.to_prometheus();
        assert!(output.contains("passbook_deposits 1"));
        assert!(output.contains("passbook_failures{code=\"UNAUTHORIZED\"} 1"));
    }
}
