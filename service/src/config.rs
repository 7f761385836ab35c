//! Service configuration.

use std::time::Duration;

use passbook_ledger::LedgerConfig;
use passbook_settlement::SettlementConfig;

/// Main service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Ledger engine configuration.
    pub ledger: LedgerConfig,
    /// Settlement engine configuration.
    pub settlement: SettlementConfig,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Seed for account-number generation; random when unset.
    pub rng_seed: Option<u64>,
    /// How long `stop` waits for in-flight requests (ms).
    pub drain_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            settlement: SettlementConfig::default(),
            log_level: "info".to_string(),
            rng_seed: None,
            drain_timeout_ms: 30_000,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            ledger: LedgerConfig::from_env(),
            settlement: SettlementConfig::from_env(),
            ..Self::default()
        };

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(seed) = std::env::var("PASSBOOK_RNG_SEED") {
            if let Ok(seed) = seed.parse() {
                config.rng_seed = Some(seed);
            }
        }

        if let Ok(ms) = std::env::var("PASSBOOK_DRAIN_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.drain_timeout_ms = ms;
            }
        }

        config
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.ledger.validate()?;

        if self.log_level.trim().is_empty() {
            return Err("Log level cannot be empty".to_string());
        }

        if self.drain_timeout_ms == 0 {
            return Err("Drain timeout must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rng_seed, None);
        assert_eq!(config.drain_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ServiceConfig::default();
        config.log_level = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.ledger.account_number_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.drain_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
