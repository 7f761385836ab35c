//! Settlement configuration.

use crate::netting::NettingDirection;

/// Settlement engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementConfig {
    /// Which side of a bank pair pays the net amount.
    pub direction: NettingDirection,
}

impl SettlementConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(direction) = std::env::var("PASSBOOK_SETTLEMENT_DIRECTION") {
            if let Ok(direction) = direction.parse() {
                config.direction = direction;
            }
        }

        config
    }
}
