//! Currency amounts in minor units.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Minor units per major unit for every supported currency.
pub const MINOR_UNITS: u64 = 100;

/// A quantity of a single currency, stored in minor units (pence, cents).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount {
    /// Quantity in minor units.
    pub quantity: u64,
    /// ISO 4217 currency code.
    pub currency: String,
}

/// Errors raised by amount arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("currency mismatch: {left} vs {right}")]
    /// The operands were denominated in different currencies.
    CurrencyMismatch {
        /// Currency of the left operand.
        left: String,
        /// Currency of the right operand.
        right: String,
    },
    #[error("amount overflow")]
    /// The sum does not fit in `u64` minor units.
    Overflow,
}

impl Amount {
    /// Creates an amount from minor units.
    pub fn new(quantity: u64, currency: impl Into<String>) -> Self {
        Self {
            quantity,
            currency: currency.into(),
        }
    }

    /// Whole pounds sterling.
    pub fn pounds(whole: u64) -> Self {
        Self::new(whole.saturating_mul(MINOR_UNITS), "GBP")
    }

    /// A zero amount in the given currency.
    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(0, currency)
    }

    /// True when the quantity is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.quantity > 0
    }

    /// Adds two amounts of the same currency.
    pub fn checked_add(&self, other: &Amount) -> Result<Amount, AmountError> {
        if self.currency != other.currency {
            return Err(AmountError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        let quantity = self
            .quantity
            .checked_add(other.quantity)
            .ok_or(AmountError::Overflow)?;
        Ok(Amount::new(quantity, self.currency.clone()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.quantity / MINOR_UNITS,
            self.quantity % MINOR_UNITS,
            self.currency
        )
    }
}
