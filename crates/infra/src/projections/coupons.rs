use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_core::TenantId;
use stockpile_coupons::{CouponEvent, CouponId, CouponTerms};
use stockpile_events::EventEnvelope;

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable coupon row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponReadModel {
    pub coupon_id: CouponId,
    pub terms: CouponTerms,
    pub active: bool,
    pub total_redemptions: u32,
}

#[derive(Debug, Error)]
pub enum CouponProjectionError {
    #[error("failed to deserialize coupon event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Coupons projection with a code → id index for lookup by code.
#[derive(Debug)]
pub struct CouponsProjection<S>
where
    S: TenantStore<CouponId, CouponReadModel>,
{
    store: S,
    cursors: StreamCursors,
    codes: RwLock<HashMap<(TenantId, String), CouponId>>,
}

impl<S> CouponsProjection<S>
where
    S: TenantStore<CouponId, CouponReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
            codes: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, coupon_id: &CouponId) -> Option<CouponReadModel> {
        self.store.get(tenant_id, coupon_id)
    }

    pub fn get_by_code(&self, tenant_id: TenantId, code: &str) -> Option<CouponReadModel> {
        let id = {
            let codes = self.codes.read().ok()?;
            *codes.get(&(tenant_id, code.trim().to_uppercase()))?
        };
        self.store.get(tenant_id, &id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<CouponReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.terms.code.cmp(&b.terms.code));
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), CouponProjectionError> {
        if envelope.aggregate_type() != "coupons.coupon" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(CouponProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: CouponEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CouponProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, coupon_id) = match &ev {
            CouponEvent::CouponCreated(e) => (e.tenant_id, e.coupon_id),
            CouponEvent::CouponSuspended(e) => (e.tenant_id, e.coupon_id),
            CouponEvent::CouponReactivated(e) => (e.tenant_id, e.coupon_id),
            CouponEvent::CouponRedeemed(e) => (e.tenant_id, e.coupon_id),
        };

        if event_tenant != tenant_id {
            return Err(CouponProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if coupon_id.0 != aggregate_id {
            return Err(CouponProjectionError::TenantIsolation(
                "event coupon_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            CouponEvent::CouponCreated(e) => {
                if let Ok(mut codes) = self.codes.write() {
                    codes.insert((tenant_id, e.terms.code.clone()), e.coupon_id);
                }
                self.store.upsert(
                    tenant_id,
                    e.coupon_id,
                    CouponReadModel {
                        coupon_id: e.coupon_id,
                        terms: e.terms,
                        active: true,
                        total_redemptions: 0,
                    },
                );
            }
            CouponEvent::CouponSuspended(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.coupon_id) {
                    rm.active = false;
                    self.store.upsert(tenant_id, e.coupon_id, rm);
                }
            }
            CouponEvent::CouponReactivated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.coupon_id) {
                    rm.active = true;
                    self.store.upsert(tenant_id, e.coupon_id, rm);
                }
            }
            CouponEvent::CouponRedeemed(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.coupon_id) {
                    rm.total_redemptions += 1;
                    self.store.upsert(tenant_id, e.coupon_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), CouponProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.cursors.clear_tenant(t);
                if let Ok(mut codes) = self.codes.write() {
                    codes.retain(|(ct, _), _| *ct != t);
                }
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
