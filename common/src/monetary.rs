//! Monetary helpers for ledger amounts.

use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};

/// Minor-unit precision accepted for ledger amounts.
pub const AMOUNT_DECIMAL_PLACES: u32 = 2;

/// Opening balance used when an account is created without one.
pub fn default_opening_balance() -> Decimal {
    Decimal::from(1000)
}

/// Validate an operation amount: strictly positive with at most
/// [`AMOUNT_DECIMAL_PLACES`] fractional digits.
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::validation_field(
            format!("Amount must be positive, got {amount}"),
            "amount",
        ));
    }
    check_precision(amount)?;
    Ok(amount.normalize())
}

/// Validate a requested opening balance. Zero means "use the default".
pub fn resolve_opening_balance(requested: Decimal, default: Decimal) -> Result<Decimal> {
    if requested < Decimal::ZERO {
        return Err(LedgerError::validation_field(
            format!("Opening balance cannot be negative, got {requested}"),
            "opening_balance",
        ));
    }
    if requested.is_zero() {
        return Ok(default);
    }
    check_precision(requested)?;
    Ok(requested.normalize())
}

fn check_precision(amount: Decimal) -> Result<()> {
    if amount.normalize().scale() > AMOUNT_DECIMAL_PLACES {
        return Err(LedgerError::validation_field(
            format!("Amount {amount} has more than {AMOUNT_DECIMAL_PLACES} decimal places"),
            "amount",
        ));
    }
    Ok(())
}
