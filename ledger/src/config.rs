//! Ledger engine configuration.

use rust_decimal::Decimal;

use passbook_common::default_opening_balance;

/// Ledger engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// Opening balance used when account creation requests zero.
    pub default_opening_balance: Decimal,
    /// Draws allowed before account-number generation gives up.
    pub account_number_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_opening_balance: default_opening_balance(),
            account_number_attempts: 5,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(balance) = std::env::var("PASSBOOK_DEFAULT_OPENING_BALANCE") {
            if let Ok(balance) = balance.parse() {
                config.default_opening_balance = balance;
            }
        }

        if let Ok(attempts) = std::env::var("PASSBOOK_ACCOUNT_NUMBER_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse() {
                config.account_number_attempts = attempts;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_opening_balance <= Decimal::ZERO {
            return Err("Default opening balance must be positive".to_string());
        }

        if self.account_number_attempts == 0 {
            return Err("Account number attempts cannot be 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_opening_balance, dec!(1000));
        assert_eq!(config.account_number_attempts, 5);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = LedgerConfig::default();
        config.account_number_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.default_opening_balance = dec!(-1);
        assert!(config.validate().is_err());
    }
}
