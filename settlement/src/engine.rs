//! Settlement netting engine.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use passbook_common::{LedgerError, Result, UserId};
use passbook_store::{AccessMode, EntityStore};

use crate::config::SettlementConfig;
use crate::netting::{FlowMatrix, NettingReport};

/// Computes net interbank obligations from the transaction history.
///
/// Settlement is read-only: the history is never modified.
pub struct SettlementEngine {
    store: Arc<dyn EntityStore>,
    config: SettlementConfig,
}

impl SettlementEngine {
    /// Create a new settlement engine.
    pub fn new(store: Arc<dyn EntityStore>, config: SettlementConfig) -> Self {
        Self { store, config }
    }

    /// Engine configuration.
    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Net every bank pair. Only active administrators may settle.
    #[instrument(skip(self))]
    pub async fn settle(&self, requester_id: UserId) -> Result<NettingReport> {
        let mut uow = self.store.begin(AccessMode::ReadOnly).await?;

        let authorized = uow
            .get_user(requester_id)
            .await?
            .map_or(false, |user| user.is_active_admin());
        if !authorized {
            warn!(requester = %requester_id, "Settlement refused");
            return Err(LedgerError::Unauthorized(format!(
                "user {requester_id} is not an active administrator"
            )));
        }

        let history = uow.list_bank_transactions().await?;
        uow.commit().await?;

        let report = FlowMatrix::from_transactions(&history).net(self.config.direction);

        info!(
            direction = %report.direction,
            rows = report.source_rows,
            pairs = report.pairs_considered,
            instructions = report.instructions.len(),
            gross = %report.gross_volume,
            net = %report.net_volume,
            "Settlement computed"
        );

        Ok(report)
    }
}
