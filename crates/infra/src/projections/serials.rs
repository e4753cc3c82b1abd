use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_catalog::ProductId;
use stockpile_core::{AggregateId, TenantId};
use stockpile_events::EventEnvelope;
use stockpile_inventory::{LocationId, SerialEvent, SerialState, SerialUnitId};

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable serial unit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialReadModel {
    pub unit_id: SerialUnitId,
    pub serial_no: String,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub state: SerialState,
    pub order_ref: Option<AggregateId>,
}

#[derive(Debug, Error)]
pub enum SerialProjectionError {
    #[error("failed to deserialize serial event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Serial units projection.
#[derive(Debug)]
pub struct SerialsProjection<S>
where
    S: TenantStore<SerialUnitId, SerialReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SerialsProjection<S>
where
    S: TenantStore<SerialUnitId, SerialReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, unit_id: &SerialUnitId) -> Option<SerialReadModel> {
        self.store.get(tenant_id, unit_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<SerialReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.serial_no.cmp(&b.serial_no));
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), SerialProjectionError> {
        if envelope.aggregate_type() != "inventory.serial" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(SerialProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: SerialEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| SerialProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, unit_id) = match &ev {
            SerialEvent::SerialRegistered(e) => (e.tenant_id, e.unit_id),
            SerialEvent::SerialStateChanged(e) => (e.tenant_id, e.unit_id),
        };

        if event_tenant != tenant_id {
            return Err(SerialProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if unit_id.0 != aggregate_id {
            return Err(SerialProjectionError::TenantIsolation(
                "event unit_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            SerialEvent::SerialRegistered(e) => {
                self.store.upsert(
                    tenant_id,
                    e.unit_id,
                    SerialReadModel {
                        unit_id: e.unit_id,
                        serial_no: e.serial_no,
                        product_id: e.product_id,
                        location_id: e.location_id,
                        state: SerialState::Received,
                        order_ref: None,
                    },
                );
            }
            SerialEvent::SerialStateChanged(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.unit_id) {
                    rm.state = e.to;
                    rm.order_ref = e.order_ref;
                    self.store.upsert(tenant_id, e.unit_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), SerialProjectionError> {
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
