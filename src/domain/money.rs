use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::MoneyError;

// ============================================================================
// Fixed-Point Money
// ============================================================================
//
// Amounts travel through the queue and the ledger as integer cents. Decimal
// values only appear at the edges: parsing a client submission and rendering
// a summary or a processor request body.
//
// ============================================================================

const SCALE: u32 = 2;

/// Monetary amount in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    pub const fn new(minor_units: i64) -> Self {
        Self(minor_units)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    /// Parse a client-supplied payment amount. Rounds half away from zero to
    /// cents and rejects anything that does not end up strictly positive.
    pub fn from_amount(amount: Decimal) -> Result<Self, MoneyError> {
        let cents = Self::from_decimal(amount)?;
        if cents.0 <= 0 {
            return Err(MoneyError::NotPositive(amount));
        }
        Ok(cents)
    }

    /// Round any decimal (including zero) to cents.
    pub fn from_decimal(amount: Decimal) -> Result<Self, MoneyError> {
        let rounded = amount.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
        let scaled = rounded
            .checked_mul(Decimal::ONE_HUNDRED)
            .ok_or(MoneyError::Overflow(amount))?;
        scaled
            .to_i64()
            .map(Self)
            .ok_or(MoneyError::Overflow(amount))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, SCALE)
    }

    /// Sum that refuses to wrap.
    pub fn checked_add(self, rhs: Cents) -> Result<Cents, MoneyError> {
        self.0
            .checked_add(rhs.0)
            .map(Cents)
            .ok_or(MoneyError::SumOverflow(self.0, rhs.0))
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

/// Serde adapter rendering `Cents` as a plain JSON number (`19.99`).
///
/// Use with `#[serde(with = "crate::domain::money::decimal_number")]`.
pub mod decimal_number {
    use super::*;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Cents, serializer: S) -> Result<S::Ok, S::Error> {
        let number = value
            .to_decimal()
            .to_f64()
            .ok_or_else(|| {
                serde::ser::Error::custom(format!("amount {value} is not representable"))
            })?;
        serializer.serialize_f64(number)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Cents, D::Error> {
        let number = f64::deserialize(deserializer)?;
        let decimal = Decimal::from_f64(number)
            .ok_or_else(|| de::Error::custom(MoneyError::NotFinite(number)))?;
        Cents::from_decimal(decimal).map_err(de::Error::custom)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
