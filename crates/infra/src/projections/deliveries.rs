use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_core::TenantId;
use stockpile_events::EventEnvelope;
use stockpile_sales::{DeliveryEvent, DeliveryId, DeliveryStatus, SalesOrderId};

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable delivery row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReadModel {
    pub delivery_id: DeliveryId,
    pub sales_order_id: SalesOrderId,
    pub status: DeliveryStatus,
    pub address: String,
    pub carrier: Option<String>,
    pub tracking_ref: Option<String>,
    pub attempts: u32,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum DeliveryProjectionError {
    #[error("failed to deserialize delivery event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Deliveries projection.
#[derive(Debug)]
pub struct DeliveriesProjection<S>
where
    S: TenantStore<DeliveryId, DeliveryReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> DeliveriesProjection<S>
where
    S: TenantStore<DeliveryId, DeliveryReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, delivery_id: &DeliveryId) -> Option<DeliveryReadModel> {
        self.store.get(tenant_id, delivery_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<DeliveryReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by_key(|r| *r.delivery_id.0.as_uuid());
        rows
    }

    /// The delivery attached to a sales order, if any.
    pub fn for_order(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Option<DeliveryReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|r| r.sales_order_id == order_id)
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), DeliveryProjectionError> {
        if envelope.aggregate_type() != "sales.delivery" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(DeliveryProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: DeliveryEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| DeliveryProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, delivery_id) = match &ev {
            DeliveryEvent::DeliveryScheduled(e) => (e.tenant_id, e.delivery_id),
            DeliveryEvent::DeliveryStarted(e) => (e.tenant_id, e.delivery_id),
            DeliveryEvent::DeliveryCompleted(e) => (e.tenant_id, e.delivery_id),
            DeliveryEvent::DeliveryFailed(e) => (e.tenant_id, e.delivery_id),
        };

        if event_tenant != tenant_id {
            return Err(DeliveryProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if delivery_id.0 != aggregate_id {
            return Err(DeliveryProjectionError::TenantIsolation(
                "event delivery_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            DeliveryEvent::DeliveryScheduled(e) => {
                self.store.upsert(
                    tenant_id,
                    e.delivery_id,
                    DeliveryReadModel {
                        delivery_id: e.delivery_id,
                        sales_order_id: e.sales_order_id,
                        status: DeliveryStatus::Scheduled,
                        address: e.address,
                        carrier: None,
                        tracking_ref: None,
                        attempts: 0,
                        failure_reason: None,
                    },
                );
            }
            DeliveryEvent::DeliveryStarted(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.delivery_id) {
                    rm.status = DeliveryStatus::InTransit;
                    rm.carrier = Some(e.carrier);
                    rm.tracking_ref = Some(e.tracking_ref);
                    rm.attempts = e.attempt;
                    rm.failure_reason = None;
                    self.store.upsert(tenant_id, e.delivery_id, rm);
                }
            }
            DeliveryEvent::DeliveryCompleted(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.delivery_id) {
                    rm.status = DeliveryStatus::Delivered;
                    self.store.upsert(tenant_id, e.delivery_id, rm);
                }
            }
            DeliveryEvent::DeliveryFailed(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.delivery_id) {
                    rm.status = DeliveryStatus::Failed;
                    rm.failure_reason = Some(e.reason);
                    self.store.upsert(tenant_id, e.delivery_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), DeliveryProjectionError> {
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
