use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockpile_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId};
use stockpile_events::Event;
use stockpile_parties::PartyId;

use crate::eligibility::{self, CouponTerms, RedemptionContext, RedemptionCounts};

/// Coupon identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CouponId(pub AggregateId);

impl CouponId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CouponId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Coupon.
///
/// Redemption counts are part of aggregate state, rehydrated from
/// `CouponRedeemed` events, so limit checks are safe under the store's
/// optimistic concurrency (two racing redemptions of the last slot cannot
/// both commit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    id: CouponId,
    tenant_id: Option<TenantId>,
    terms: Option<CouponTerms>,
    active: bool,
    total_redemptions: u32,
    redemptions_by_customer: HashMap<PartyId, u32>,
    version: u64,
    created: bool,
}

impl Coupon {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CouponId) -> Self {
        Self {
            id,
            tenant_id: None,
            terms: None,
            active: false,
            total_redemptions: 0,
            redemptions_by_customer: HashMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CouponId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn terms(&self) -> Option<&CouponTerms> {
        self.terms.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn total_redemptions(&self) -> u32 {
        self.total_redemptions
    }

    pub fn redemptions_for(&self, customer_id: PartyId) -> u32 {
        self.redemptions_by_customer
            .get(&customer_id)
            .copied()
            .unwrap_or(0)
    }

    /// Evaluate a redemption against current state without emitting events.
    ///
    /// Used by the API to quote a discount before confirming an order.
    pub fn quote(
        &self,
        ctx: &RedemptionContext,
    ) -> Result<Money, crate::eligibility::Ineligibility> {
        let Some(terms) = &self.terms else {
            return Err(crate::eligibility::Ineligibility::Suspended);
        };
        eligibility::evaluate(
            terms,
            self.active,
            RedemptionCounts {
                total: self.total_redemptions,
                by_customer: self.redemptions_for(ctx.customer_id),
            },
            ctx,
        )
    }
}

impl AggregateRoot for Coupon {
    type Id = CouponId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateCoupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCoupon {
    pub tenant_id: TenantId,
    pub coupon_id: CouponId,
    pub terms: CouponTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SuspendCoupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendCoupon {
    pub tenant_id: TenantId,
    pub coupon_id: CouponId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReactivateCoupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactivateCoupon {
    pub tenant_id: TenantId,
    pub coupon_id: CouponId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RedeemCoupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemCoupon {
    pub tenant_id: TenantId,
    pub coupon_id: CouponId,
    pub customer_id: PartyId,
    pub order_ref: AggregateId,
    pub subtotal: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponCommand {
    CreateCoupon(CreateCoupon),
    SuspendCoupon(SuspendCoupon),
    ReactivateCoupon(ReactivateCoupon),
    RedeemCoupon(RedeemCoupon),
}

/// Event: CouponCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponCreated {
    pub tenant_id: TenantId,
    pub coupon_id: CouponId,
    pub terms: CouponTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CouponSuspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponSuspended {
    pub tenant_id: TenantId,
    pub coupon_id: CouponId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CouponReactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponReactivated {
    pub tenant_id: TenantId,
    pub coupon_id: CouponId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CouponRedeemed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponRedeemed {
    pub tenant_id: TenantId,
    pub coupon_id: CouponId,
    pub customer_id: PartyId,
    pub order_ref: AggregateId,
    pub subtotal: Money,
    pub discount: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponEvent {
    CouponCreated(CouponCreated),
    CouponSuspended(CouponSuspended),
    CouponReactivated(CouponReactivated),
    CouponRedeemed(CouponRedeemed),
}

impl Event for CouponEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CouponEvent::CouponCreated(_) => "coupons.coupon.created",
            CouponEvent::CouponSuspended(_) => "coupons.coupon.suspended",
            CouponEvent::CouponReactivated(_) => "coupons.coupon.reactivated",
            CouponEvent::CouponRedeemed(_) => "coupons.coupon.redeemed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CouponEvent::CouponCreated(e) => e.occurred_at,
            CouponEvent::CouponSuspended(e) => e.occurred_at,
            CouponEvent::CouponReactivated(e) => e.occurred_at,
            CouponEvent::CouponRedeemed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Coupon {
    type Command = CouponCommand;
    type Event = CouponEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CouponEvent::CouponCreated(e) => {
                self.id = e.coupon_id;
                self.tenant_id = Some(e.tenant_id);
                self.terms = Some(e.terms.clone());
                self.active = true;
                self.total_redemptions = 0;
                self.redemptions_by_customer.clear();
                self.created = true;
            }
            CouponEvent::CouponSuspended(_) => {
                self.active = false;
            }
            CouponEvent::CouponReactivated(_) => {
                self.active = true;
            }
            CouponEvent::CouponRedeemed(e) => {
                self.total_redemptions += 1;
                *self
                    .redemptions_by_customer
                    .entry(e.customer_id)
                    .or_insert(0) += 1;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CouponCommand::CreateCoupon(cmd) => self.handle_create(cmd),
            CouponCommand::SuspendCoupon(cmd) => self.handle_suspend(cmd),
            CouponCommand::ReactivateCoupon(cmd) => self.handle_reactivate(cmd),
            CouponCommand::RedeemCoupon(cmd) => self.handle_redeem(cmd),
        }
    }
}

impl Coupon {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateCoupon) -> Result<Vec<CouponEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("coupon already exists"));
        }
        cmd.terms.validate()?;

        let mut terms = cmd.terms.clone();
        terms.code = terms.code.trim().to_uppercase();

        Ok(vec![CouponEvent::CouponCreated(CouponCreated {
            tenant_id: cmd.tenant_id,
            coupon_id: cmd.coupon_id,
            terms,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_suspend(&self, cmd: &SuspendCoupon) -> Result<Vec<CouponEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if !self.active {
            return Err(DomainError::invariant("coupon already suspended"));
        }

        Ok(vec![CouponEvent::CouponSuspended(CouponSuspended {
            tenant_id: cmd.tenant_id,
            coupon_id: cmd.coupon_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reactivate(&self, cmd: &ReactivateCoupon) -> Result<Vec<CouponEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        if self.active {
            return Err(DomainError::invariant("coupon already active"));
        }

        Ok(vec![CouponEvent::CouponReactivated(CouponReactivated {
            tenant_id: cmd.tenant_id,
            coupon_id: cmd.coupon_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_redeem(&self, cmd: &RedeemCoupon) -> Result<Vec<CouponEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;

        let ctx = RedemptionContext {
            customer_id: cmd.customer_id,
            subtotal: cmd.subtotal,
            at: cmd.occurred_at,
        };
        let discount = self
            .quote(&ctx)
            .map_err(|e| DomainError::invariant(e.to_string()))?;

        Ok(vec![CouponEvent::CouponRedeemed(CouponRedeemed {
            tenant_id: cmd.tenant_id,
            coupon_id: cmd.coupon_id,
            customer_id: cmd.customer_id,
            order_ref: cmd.order_ref,
            subtotal: cmd.subtotal,
            discount,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::Discount;
    use chrono::Duration;
    use stockpile_events::execute;

    fn test_terms() -> CouponTerms {
        let now = Utc::now();
        CouponTerms {
            code: "save10".to_string(),
            discount: Discount::Percent(1000),
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(30),
            min_subtotal: Money::from_minor(500),
            max_redemptions: Some(2),
            per_customer_limit: Some(1),
        }
    }

    fn created_coupon(tenant_id: TenantId, coupon_id: CouponId) -> Coupon {
        let mut coupon = Coupon::empty(coupon_id);
        execute(
            &mut coupon,
            &CouponCommand::CreateCoupon(CreateCoupon {
                tenant_id,
                coupon_id,
                terms: test_terms(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        coupon
    }

    fn redeem_cmd(
        tenant_id: TenantId,
        coupon_id: CouponId,
        customer_id: PartyId,
        subtotal: u64,
    ) -> CouponCommand {
        CouponCommand::RedeemCoupon(RedeemCoupon {
            tenant_id,
            coupon_id,
            customer_id,
            order_ref: AggregateId::new(),
            subtotal: Money::from_minor(subtotal),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn create_normalizes_code() {
        let tenant_id = TenantId::new();
        let coupon_id = CouponId::new(AggregateId::new());
        let coupon = created_coupon(tenant_id, coupon_id);
        assert_eq!(coupon.terms().unwrap().code, "SAVE10");
        assert!(coupon.is_active());
    }

    #[test]
    fn redeem_computes_discount_and_counts() {
        let tenant_id = TenantId::new();
        let coupon_id = CouponId::new(AggregateId::new());
        let customer = PartyId::new(AggregateId::new());
        let mut coupon = created_coupon(tenant_id, coupon_id);

        let events = execute(
            &mut coupon,
            &redeem_cmd(tenant_id, coupon_id, customer, 2000),
        )
        .unwrap();

        let CouponEvent::CouponRedeemed(e) = &events[0] else {
            panic!("Expected CouponRedeemed event");
        };
        assert_eq!(e.discount.minor(), 200);
        assert_eq!(coupon.total_redemptions(), 1);
        assert_eq!(coupon.redemptions_for(customer), 1);
    }

    #[test]
    fn per_customer_limit_is_enforced() {
        let tenant_id = TenantId::new();
        let coupon_id = CouponId::new(AggregateId::new());
        let customer = PartyId::new(AggregateId::new());
        let mut coupon = created_coupon(tenant_id, coupon_id);

        execute(
            &mut coupon,
            &redeem_cmd(tenant_id, coupon_id, customer, 2000),
        )
        .unwrap();

        let err = coupon
            .handle(&redeem_cmd(tenant_id, coupon_id, customer, 2000))
            .unwrap_err();
        assert!(err.to_string().contains("customer redemption limit"));
    }

    #[test]
    fn global_limit_is_enforced_across_customers() {
        let tenant_id = TenantId::new();
        let coupon_id = CouponId::new(AggregateId::new());
        let mut coupon = created_coupon(tenant_id, coupon_id);

        for _ in 0..2 {
            let customer = PartyId::new(AggregateId::new());
            execute(
                &mut coupon,
                &redeem_cmd(tenant_id, coupon_id, customer, 2000),
            )
            .unwrap();
        }

        let another = PartyId::new(AggregateId::new());
        let err = coupon
            .handle(&redeem_cmd(tenant_id, coupon_id, another, 2000))
            .unwrap_err();
        assert!(err.to_string().contains("redemption limit reached"));
    }

    #[test]
    fn suspended_coupon_rejects_redemption() {
        let tenant_id = TenantId::new();
        let coupon_id = CouponId::new(AggregateId::new());
        let mut coupon = created_coupon(tenant_id, coupon_id);

        execute(
            &mut coupon,
            &CouponCommand::SuspendCoupon(SuspendCoupon {
                tenant_id,
                coupon_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let customer = PartyId::new(AggregateId::new());
        assert!(coupon
            .handle(&redeem_cmd(tenant_id, coupon_id, customer, 2000))
            .is_err());

        execute(
            &mut coupon,
            &CouponCommand::ReactivateCoupon(ReactivateCoupon {
                tenant_id,
                coupon_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(coupon
            .handle(&redeem_cmd(tenant_id, coupon_id, customer, 2000))
            .is_ok());
    }

    #[test]
    fn subtotal_below_minimum_is_rejected() {
        let tenant_id = TenantId::new();
        let coupon_id = CouponId::new(AggregateId::new());
        let coupon = created_coupon(tenant_id, coupon_id);
        let customer = PartyId::new(AggregateId::new());

        assert!(coupon
            .handle(&redeem_cmd(tenant_id, coupon_id, customer, 499))
            .is_err());
    }
}
