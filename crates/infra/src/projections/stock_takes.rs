use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_core::TenantId;
use stockpile_events::EventEnvelope;
use stockpile_inventory::{
    CountLine, LocationId, StockTakeEvent, StockTakeId, StockTakeStatus, VarianceLine,
};

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable stock take row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockTakeReadModel {
    pub take_id: StockTakeId,
    pub location_id: LocationId,
    pub status: StockTakeStatus,
    pub counts: Vec<CountLine>,
    /// Set once posted.
    pub variances: Vec<VarianceLine>,
}

#[derive(Debug, Error)]
pub enum StockTakeProjectionError {
    #[error("failed to deserialize stock take event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Stock takes projection.
#[derive(Debug)]
pub struct StockTakesProjection<S>
where
    S: TenantStore<StockTakeId, StockTakeReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockTakesProjection<S>
where
    S: TenantStore<StockTakeId, StockTakeReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, take_id: &StockTakeId) -> Option<StockTakeReadModel> {
        self.store.get(tenant_id, take_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<StockTakeReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by_key(|r| *r.take_id.0.as_uuid());
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockTakeProjectionError> {
        if envelope.aggregate_type() != "inventory.stock_take" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(StockTakeProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: StockTakeEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockTakeProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, take_id) = match &ev {
            StockTakeEvent::StockTakeOpened(e) => (e.tenant_id, e.take_id),
            StockTakeEvent::CountRecorded(e) => (e.tenant_id, e.take_id),
            StockTakeEvent::StockTakePosted(e) => (e.tenant_id, e.take_id),
            StockTakeEvent::StockTakeCancelled(e) => (e.tenant_id, e.take_id),
        };

        if event_tenant != tenant_id {
            return Err(StockTakeProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if take_id.0 != aggregate_id {
            return Err(StockTakeProjectionError::TenantIsolation(
                "event take_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            StockTakeEvent::StockTakeOpened(e) => {
                self.store.upsert(
                    tenant_id,
                    e.take_id,
                    StockTakeReadModel {
                        take_id: e.take_id,
                        location_id: e.location_id,
                        status: StockTakeStatus::Open,
                        counts: vec![],
                        variances: vec![],
                    },
                );
            }
            StockTakeEvent::CountRecorded(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.take_id) {
                    // Recount overwrites the previous line for the product.
                    rm.counts.retain(|c| c.product_id != e.line.product_id);
                    rm.counts.push(e.line);
                    self.store.upsert(tenant_id, e.take_id, rm);
                }
            }
            StockTakeEvent::StockTakePosted(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.take_id) {
                    rm.status = StockTakeStatus::Posted;
                    rm.variances = e.variances;
                    self.store.upsert(tenant_id, e.take_id, rm);
                }
            }
            StockTakeEvent::StockTakeCancelled(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.take_id) {
                    rm.status = StockTakeStatus::Cancelled;
                    self.store.upsert(tenant_id, e.take_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockTakeProjectionError> {
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
