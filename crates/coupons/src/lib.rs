//! Coupons domain module (event-sourced).
//!
//! The eligibility engine in [`eligibility`] is a pure function over coupon
//! terms and redemption counts; the [`coupon`] aggregate rehydrates those
//! counts from its own events and consults the engine on every redemption.

pub mod coupon;
pub mod eligibility;

pub use coupon::{
    Coupon, CouponCommand, CouponCreated, CouponEvent, CouponId, CouponReactivated, CouponRedeemed,
    CouponSuspended, CreateCoupon, ReactivateCoupon, RedeemCoupon, SuspendCoupon,
};
pub use eligibility::{
    CouponTerms, Discount, Ineligibility, RedemptionContext, RedemptionCounts, evaluate,
};
