use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_core::TenantId;
use stockpile_events::EventEnvelope;
use stockpile_inventory::LocationId;
use stockpile_parties::PartyId;
use stockpile_purchasing::{OrderLine, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderStatus};

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable purchase order row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrderReadModel {
    pub order_id: PurchaseOrderId,
    pub supplier_id: PartyId,
    pub location_id: LocationId,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<OrderLine>,
}

#[derive(Debug, Error)]
pub enum PurchaseOrderProjectionError {
    #[error("failed to deserialize purchase order event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Purchase orders projection.
#[derive(Debug)]
pub struct PurchaseOrdersProjection<S>
where
    S: TenantStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PurchaseOrdersProjection<S>
where
    S: TenantStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(
        &self,
        tenant_id: TenantId,
        order_id: &PurchaseOrderId,
    ) -> Option<PurchaseOrderReadModel> {
        self.store.get(tenant_id, order_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<PurchaseOrderReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by_key(|r| *r.order_id.0.as_uuid());
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), PurchaseOrderProjectionError> {
        if envelope.aggregate_type() != "purchasing.order" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(PurchaseOrderProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: PurchaseOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| PurchaseOrderProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, order_id) = match &ev {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderSubmitted(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderApproved(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::GoodsReceiptRecorded(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => (e.tenant_id, e.order_id),
        };

        if event_tenant != tenant_id {
            return Err(PurchaseOrderProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if order_id.0 != aggregate_id {
            return Err(PurchaseOrderProjectionError::TenantIsolation(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.order_id,
                    PurchaseOrderReadModel {
                        order_id: e.order_id,
                        supplier_id: e.supplier_id,
                        location_id: e.location_id,
                        status: PurchaseOrderStatus::Draft,
                        lines: vec![],
                    },
                );
            }
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.lines.push(OrderLine {
                        line_no: e.line_no,
                        product_id: e.product_id,
                        quantity: e.quantity,
                        unit_cost: e.unit_cost,
                        received: 0,
                    });
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            PurchaseOrderEvent::PurchaseOrderSubmitted(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.status = PurchaseOrderStatus::Submitted;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            PurchaseOrderEvent::PurchaseOrderApproved(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.status = PurchaseOrderStatus::Approved;
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            PurchaseOrderEvent::GoodsReceiptRecorded(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    for r in &e.received {
                        if let Some(line) = rm.lines.iter_mut().find(|l| l.line_no == r.line_no) {
                            line.received += r.quantity;
                        }
                    }
                    rm.status = if e.completed {
                        PurchaseOrderStatus::Received
                    } else {
                        PurchaseOrderStatus::PartiallyReceived
                    };
                    self.store.upsert(tenant_id, e.order_id, rm);
                }
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.order_id) {
                    rm.status = PurchaseOrderStatus::Cancelled;
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
    ) -> Result<(), PurchaseOrderProjectionError> {
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
