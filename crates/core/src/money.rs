//! Monetary amounts in the smallest currency unit.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Amount in cents.
///
/// Prices and order totals are integers so that `price * quantity` is exact;
/// decimal values from binding layers go through [`Money::from_decimal`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Convert a decimal amount (e.g. `5.00`) to cents, rounding half away from zero.
    pub fn from_decimal(amount: f64) -> DomainResult<Self> {
        if !amount.is_finite() {
            return Err(DomainError::validation("amount must be a finite number"));
        }
        let cents = (amount * 100.0).round();
        if cents > i64::MAX as f64 || cents < i64::MIN as f64 {
            return Err(DomainError::validation("amount out of range"));
        }
        Ok(Self(cents as i64))
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `self * quantity`, failing on overflow.
    pub fn times(self, quantity: i64) -> DomainResult<Money> {
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or_else(|| DomainError::validation("order total overflows"))
    }

    /// Absolute difference between two amounts.
    pub fn abs_diff(self, other: Money) -> Money {
        Money(self.0.abs_diff(other.0).min(i64::MAX as u64) as i64)
    }

    /// True when `other` is within `tolerance` of `self` (inclusive).
    pub fn within(self, other: Money, tolerance: Money) -> bool {
        self.abs_diff(other) <= tolerance
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
