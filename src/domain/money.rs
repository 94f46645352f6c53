use crate::error::LendingError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a strictly positive monetary amount.
///
/// This is a wrapper around `rust_decimal::Decimal` so principal, installment and
/// payment amounts can never be zero or negative once constructed. Deserialization
/// goes through the same check, which makes it part of the event schema.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, LendingError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(LendingError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LendingError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Annual interest rate expressed in percent (`10` means 10% p.a.).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct InterestRate(Decimal);

impl InterestRate {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(percent: Decimal) -> Result<Self, LendingError> {
        if percent >= Decimal::ZERO {
            Ok(Self(percent))
        } else {
            Err(LendingError::ValidationError(
                "Interest rate must not be negative".to_string(),
            ))
        }
    }

    pub fn percent(&self) -> Decimal {
        self.0
    }

    /// Monthly rate as a fraction: `annual / 12 / 100`.
    pub fn monthly_fraction(&self) -> Decimal {
        self.0 / Decimal::from(12) / Decimal::ONE_HUNDRED
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl TryFrom<Decimal> for InterestRate {
    type Error = LendingError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InterestRate> for Decimal {
    fn from(rate: InterestRate) -> Self {
        rate.0
    }
}
