//! Coupon eligibility engine.
//!
//! `evaluate` is a pure function: terms + usage counts + redemption context
//! in, discount amount (or a typed rejection) out. The aggregate and the
//! API both call through here so eligibility rules live in exactly one
//! place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockpile_core::{DomainError, Money};
use stockpile_parties::PartyId;

/// What a coupon takes off the order subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discount {
    /// Percentage in basis points (1% = 100 bps, capped at 10000).
    Percent(u32),
    /// Fixed amount in minor units (capped at the subtotal).
    Fixed(Money),
}

/// Immutable terms of a coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponTerms {
    pub code: String,
    pub discount: Discount,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Minimum order subtotal for the coupon to apply.
    pub min_subtotal: Money,
    /// Total redemptions across all customers (None = unlimited).
    pub max_redemptions: Option<u32>,
    /// Redemptions per customer (None = unlimited).
    pub per_customer_limit: Option<u32>,
}

impl CouponTerms {
    /// Validate terms at creation time.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.code.trim().is_empty() {
            return Err(DomainError::validation("coupon code cannot be empty"));
        }
        if self.valid_until <= self.valid_from {
            return Err(DomainError::validation(
                "coupon validity window is inverted",
            ));
        }
        match self.discount {
            Discount::Percent(bps) if bps == 0 || bps > 10_000 => Err(DomainError::validation(
                "percent discount must be between 1 and 10000 basis points",
            )),
            Discount::Fixed(amount) if amount.is_zero() => {
                Err(DomainError::validation("fixed discount must be positive"))
            }
            _ => Ok(()),
        }
    }
}

/// Usage counters the engine checks limits against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedemptionCounts {
    pub total: u32,
    pub by_customer: u32,
}

/// The order-side facts a redemption is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionContext {
    pub customer_id: PartyId,
    pub subtotal: Money,
    pub at: DateTime<Utc>,
}

/// Why a coupon did not apply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    #[error("coupon is suspended")]
    Suspended,

    #[error("coupon is not yet valid")]
    NotYetValid,

    #[error("coupon has expired")]
    Expired,

    #[error("order subtotal below coupon minimum")]
    SubtotalBelowMinimum,

    #[error("coupon redemption limit reached")]
    GlobalLimitReached,

    #[error("customer redemption limit reached")]
    CustomerLimitReached,
}

/// Evaluate a redemption, returning the discount amount it grants.
///
/// Checks run in a fixed order (state, window, subtotal, limits) so
/// rejections are deterministic. Discount math is integer-only: percent
/// discounts round down, fixed discounts are capped at the subtotal.
pub fn evaluate(
    terms: &CouponTerms,
    active: bool,
    counts: RedemptionCounts,
    ctx: &RedemptionContext,
) -> Result<Money, Ineligibility> {
    if !active {
        return Err(Ineligibility::Suspended);
    }
    if ctx.at < terms.valid_from {
        return Err(Ineligibility::NotYetValid);
    }
    if ctx.at >= terms.valid_until {
        return Err(Ineligibility::Expired);
    }
    if ctx.subtotal < terms.min_subtotal {
        return Err(Ineligibility::SubtotalBelowMinimum);
    }
    if let Some(max) = terms.max_redemptions {
        if counts.total >= max {
            return Err(Ineligibility::GlobalLimitReached);
        }
    }
    if let Some(limit) = terms.per_customer_limit {
        if counts.by_customer >= limit {
            return Err(Ineligibility::CustomerLimitReached);
        }
    }

    let discount = match terms.discount {
        // Terms are validated at creation; bps is within range here.
        Discount::Percent(bps) => ctx
            .subtotal
            .percentage(bps)
            .unwrap_or(Money::ZERO),
        Discount::Fixed(amount) => {
            if amount > ctx.subtotal {
                ctx.subtotal
            } else {
                amount
            }
        }
    };

    Ok(discount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use stockpile_core::AggregateId;

    fn terms(discount: Discount) -> CouponTerms {
        let now = Utc::now();
        CouponTerms {
            code: "SAVE10".to_string(),
            discount,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(1),
            min_subtotal: Money::from_minor(1000),
            max_redemptions: Some(100),
            per_customer_limit: Some(2),
        }
    }

    fn ctx(subtotal: u64) -> RedemptionContext {
        RedemptionContext {
            customer_id: PartyId::new(AggregateId::new()),
            subtotal: Money::from_minor(subtotal),
            at: Utc::now(),
        }
    }

    #[test]
    fn percent_discount_rounds_down() {
        let t = terms(Discount::Percent(1000)); // 10%
        let d = evaluate(&t, true, RedemptionCounts::default(), &ctx(1099)).unwrap();
        assert_eq!(d.minor(), 109);
    }

    #[test]
    fn fixed_discount_is_capped_at_subtotal() {
        let t = terms(Discount::Fixed(Money::from_minor(5000)));
        let d = evaluate(&t, true, RedemptionCounts::default(), &ctx(2000)).unwrap();
        assert_eq!(d.minor(), 2000);
    }

    #[test]
    fn rejection_order_is_state_window_subtotal_limits() {
        let t = terms(Discount::Percent(500));

        assert_eq!(
            evaluate(&t, false, RedemptionCounts::default(), &ctx(100)),
            Err(Ineligibility::Suspended)
        );

        let mut early = ctx(100);
        early.at = t.valid_from - Duration::hours(1);
        assert_eq!(
            evaluate(&t, true, RedemptionCounts::default(), &early),
            Err(Ineligibility::NotYetValid)
        );

        let mut late = ctx(100);
        late.at = t.valid_until;
        assert_eq!(
            evaluate(&t, true, RedemptionCounts::default(), &late),
            Err(Ineligibility::Expired)
        );

        assert_eq!(
            evaluate(&t, true, RedemptionCounts::default(), &ctx(999)),
            Err(Ineligibility::SubtotalBelowMinimum)
        );

        assert_eq!(
            evaluate(
                &t,
                true,
                RedemptionCounts {
                    total: 100,
                    by_customer: 0
                },
                &ctx(2000)
            ),
            Err(Ineligibility::GlobalLimitReached)
        );

        assert_eq!(
            evaluate(
                &t,
                true,
                RedemptionCounts {
                    total: 5,
                    by_customer: 2
                },
                &ctx(2000)
            ),
            Err(Ineligibility::CustomerLimitReached)
        );
    }

    #[test]
    fn terms_validation_rejects_bad_windows_and_discounts() {
        let mut t = terms(Discount::Percent(500));
        t.valid_until = t.valid_from;
        assert!(t.validate().is_err());

        let t = terms(Discount::Percent(0));
        assert!(t.validate().is_err());
        let t = terms(Discount::Percent(10_001));
        assert!(t.validate().is_err());
        let t = terms(Discount::Fixed(Money::ZERO));
        assert!(t.validate().is_err());

        assert!(terms(Discount::Percent(10_000)).validate().is_ok());
    }

    proptest! {
        /// The granted discount never exceeds the order subtotal.
        #[test]
        fn discount_never_exceeds_subtotal(
            subtotal in 1000u64..10_000_000,
            bps in 1u32..=10_000,
            fixed in 1u64..10_000_000,
            use_percent: bool,
        ) {
            let discount = if use_percent {
                Discount::Percent(bps)
            } else {
                Discount::Fixed(Money::from_minor(fixed))
            };
            let t = terms(discount);
            let c = ctx(subtotal);
            let granted = evaluate(&t, true, RedemptionCounts::default(), &c).unwrap();
            prop_assert!(granted <= c.subtotal);
        }
    }
}
