use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_core::{Money, TenantId};
use stockpile_events::EventEnvelope;
use stockpile_inventory::LocationId;
use stockpile_parties::PartyId;
use stockpile_sales::{OrderLine, SalesOrderEvent, SalesOrderId, SalesOrderStatus};

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable sales order row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrderReadModel {
    pub order_id: SalesOrderId,
    pub customer_id: PartyId,
    pub status: SalesOrderStatus,
    pub lines: Vec<OrderLine>,
    pub location_id: Option<LocationId>,
    pub coupon_code: Option<String>,
    pub subtotal: Money,
    pub discount: Money,
    pub grand_total: Money,
    pub paid_total: Money,
}

#[derive(Debug, Error)]
pub enum SalesOrderProjectionError {
    #[error("failed to deserialize sales order event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Sales orders projection.
#[derive(Debug)]
pub struct SalesOrdersProjection<S>
where
    S: TenantStore<SalesOrderId, SalesOrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SalesOrdersProjection<S>
where
    S: TenantStore<SalesOrderId, SalesOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, order_id: &SalesOrderId) -> Option<SalesOrderReadModel> {
        self.store.get(tenant_id, order_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<SalesOrderReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by_key(|r| *r.order_id.0.as_uuid());
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), SalesOrderProjectionError> {
        if envelope.aggregate_type() != "sales.order" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(SalesOrderProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: SalesOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| SalesOrderProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, order_id) = match &ev {
            SalesOrderEvent::SalesOrderCreated(e) => (e.tenant_id, e.order_id),
            SalesOrderEvent::LineAdded(e) => (e.tenant_id, e.order_id),
            SalesOrderEvent::LineRemoved(e) => (e.tenant_id, e.order_id),
            SalesOrderEvent::OrderConfirmed(e) => (e.tenant_id, e.order_id),
            SalesOrderEvent::PaymentRegistered(e) => (e.tenant_id, e.order_id),
            SalesOrderEvent::OrderPaid(e) => (e.tenant_id, e.order_id),
            SalesOrderEvent::OrderDispatched(e) => (e.tenant_id, e.order_id),
            SalesOrderEvent::OrderDelivered(e) => (e.tenant_id, e.order_id),
            SalesOrderEvent::OrderCancelled(e) => (e.tenant_id, e.order_id),
        };

        if event_tenant != tenant_id {
            return Err(SalesOrderProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if order_id.0 != aggregate_id {
            return Err(SalesOrderProjectionError::TenantIsolation(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            SalesOrderEvent::SalesOrderCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.order_id,
                    SalesOrderReadModel {
                        order_id: e.order_id,
                        customer_id: e.customer_id,
                        status: SalesOrderStatus::Draft,
                        lines: vec![],
                        location_id: None,
                        coupon_code: None,
                        subtotal: Money::ZERO,
                        discount: Money::ZERO,
                        grand_total: Money::ZERO,
                        paid_total: Money::ZERO,
                    },
                );
            }
            SalesOrderEvent::LineAdded(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.lines.push(OrderLine {
                        line_no: e.line_no,
                        product_id: e.product_id,
                        quantity: e.quantity,
                        unit_price: e.unit_price,
                    });
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            SalesOrderEvent::LineRemoved(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.lines.retain(|l| l.line_no != e.line_no);
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            SalesOrderEvent::OrderConfirmed(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.status = SalesOrderStatus::Confirmed;
                    rm.location_id = Some(e.location_id);
                    rm.coupon_code = e.coupon_code;
                    rm.subtotal = e.subtotal;
                    rm.discount = e.discount;
                    rm.grand_total = e.grand_total;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            SalesOrderEvent::PaymentRegistered(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.paid_total = e.new_paid_total;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            SalesOrderEvent::OrderPaid(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.status = SalesOrderStatus::Paid;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            SalesOrderEvent::OrderDispatched(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.status = SalesOrderStatus::Dispatched;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            SalesOrderEvent::OrderDelivered(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.status = SalesOrderStatus::Delivered;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            SalesOrderEvent::OrderCancelled(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.status = SalesOrderStatus::Cancelled;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), SalesOrderProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.cursors.clear_tenant(t);
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
