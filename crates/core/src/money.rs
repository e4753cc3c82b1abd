//! Monetary amounts in integer minor units (e.g. cents).
//!
//! Floating point is never used for money. Amounts are unsigned; signed
//! deltas belong to the stock/ledger layers, not to prices.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// An amount of money in the tenant's currency, in minor units.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    pub fn minor(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition; overflow is a validation failure.
    pub fn add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation("money amount overflow"))
    }

    /// Checked subtraction; going below zero is a validation failure.
    pub fn sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation("money amount underflow"))
    }

    /// Saturating subtraction (floors at zero).
    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    /// Multiply by a quantity (e.g. line total = unit price × qty).
    pub fn times(self, qty: u64) -> DomainResult<Money> {
        self.0
            .checked_mul(qty)
            .map(Money)
            .ok_or_else(|| DomainError::validation("money amount overflow"))
    }

    /// Apply a percentage expressed in basis points (1% = 100 bps).
    ///
    /// Integer arithmetic, rounded down. `bps` above 10_000 is rejected.
    pub fn percentage(self, bps: u32) -> DomainResult<Money> {
        if bps > 10_000 {
            return Err(DomainError::validation(
                "percentage cannot exceed 10000 basis points",
            ));
        }
        let scaled = (self.0 as u128) * (bps as u128) / 10_000u128;
        Ok(Money(scaled as u64))
    }
}

impl ValueObject for Money {}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn add_and_sub_round_trip() {
        let a = Money::from_minor(1099);
        let b = Money::from_minor(250);
        assert_eq!(a.add(b).unwrap().minor(), 1349);
        assert_eq!(a.add(b).unwrap().sub(b).unwrap(), a);
    }

    #[test]
    fn sub_below_zero_is_rejected() {
        let a = Money::from_minor(100);
        assert!(a.sub(Money::from_minor(101)).is_err());
        assert_eq!(a.saturating_sub(Money::from_minor(101)), Money::ZERO);
    }

    #[test]
    fn percentage_rounds_down() {
        // 8.25% of 10.99 = 0.906675 → 90 minor units.
        let price = Money::from_minor(1099);
        assert_eq!(price.percentage(825).unwrap().minor(), 90);
    }

    #[test]
    fn percentage_over_100_is_rejected() {
        assert!(Money::from_minor(100).percentage(10_001).is_err());
    }

    proptest! {
        #[test]
        fn percentage_never_exceeds_amount(minor in 0u64..=u64::MAX / 2, bps in 0u32..=10_000) {
            let m = Money::from_minor(minor);
            let d = m.percentage(bps).unwrap();
            prop_assert!(d <= m);
        }

        #[test]
        fn times_matches_repeated_add(minor in 0u64..10_000, qty in 0u64..100) {
            let unit = Money::from_minor(minor);
            let mut acc = Money::ZERO;
            for _ in 0..qty {
                acc = acc.add(unit).unwrap();
            }
            prop_assert_eq!(unit.times(qty).unwrap(), acc);
        }
    }
}
