use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_core::TenantId;
use stockpile_events::EventEnvelope;
use stockpile_inventory::{LocationEvent, LocationId, LocationKind};

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable location row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationReadModel {
    pub location_id: LocationId,
    pub kind: LocationKind,
    pub name: String,
    pub closed: bool,
}

#[derive(Debug, Error)]
pub enum LocationProjectionError {
    #[error("failed to deserialize location event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Locations projection (warehouses and stores).
#[derive(Debug)]
pub struct LocationsProjection<S>
where
    S: TenantStore<LocationId, LocationReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> LocationsProjection<S>
where
    S: TenantStore<LocationId, LocationReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, location_id: &LocationId) -> Option<LocationReadModel> {
        self.store.get(tenant_id, location_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<LocationReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), LocationProjectionError> {
        if envelope.aggregate_type() != "inventory.location" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(LocationProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: LocationEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| LocationProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, location_id) = match &ev {
            LocationEvent::LocationCreated(e) => (e.tenant_id, e.location_id),
            LocationEvent::LocationRenamed(e) => (e.tenant_id, e.location_id),
            LocationEvent::LocationClosed(e) => (e.tenant_id, e.location_id),
        };

        if event_tenant != tenant_id {
            return Err(LocationProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if location_id.0 != aggregate_id {
            return Err(LocationProjectionError::TenantIsolation(
                "event location_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            LocationEvent::LocationCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.location_id,
                    LocationReadModel {
                        location_id: e.location_id,
                        kind: e.kind,
                        name: e.name,
                        closed: false,
                    },
                );
            }
            LocationEvent::LocationRenamed(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.location_id) {
                    rm.name = e.name;
                    self.store.upsert(tenant_id, e.location_id, rm);
                }
            }
            LocationEvent::LocationClosed(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.location_id) {
                    rm.closed = true;
                    self.store.upsert(tenant_id, e.location_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), LocationProjectionError> {
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
