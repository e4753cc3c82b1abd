//! Stock level read model: one row per (product, location) bucket.
//!
//! This projection also feeds the low-stock alert runner via
//! `ReadModelReader<StockSnapshot>`.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_alerts::{ReadModelReader, StockBucketSnapshot, StockSnapshot};
use stockpile_catalog::ProductId;
use stockpile_core::{AggregateId, TenantId};
use stockpile_events::EventEnvelope;
use stockpile_inventory::{LocationId, StockEvent, StockItemId};

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Key of one stock bucket row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StockBucketKey {
    pub item_id: StockItemId,
    pub location_id: LocationId,
}

/// Queryable stock row: current counters per product and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevelRow {
    pub item_id: StockItemId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub on_hand: i64,
    pub reserved: i64,
    pub reorder_point: i64,
}

impl StockLevelRow {
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }
}

#[derive(Debug, Error)]
pub enum StockProjectionError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("stock event for untracked item {0}")]
    UntrackedItem(StockItemId),
}

/// Stock levels projection.
///
/// Consumes published envelopes (JSON payloads) and maintains a
/// tenant-isolated read model. Rows are disposable and rebuildable from
/// the event stream.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: TenantStore<StockBucketKey, StockLevelRow>,
{
    store: S,
    cursors: StreamCursors,
    /// Item → product mapping, learned from `ProductTracked`.
    products: RwLock<HashMap<(TenantId, StockItemId), ProductId>>,
}

impl<S> StockLevelsProjection<S>
where
    S: TenantStore<StockBucketKey, StockLevelRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
            products: RwLock::new(HashMap::new()),
        }
    }

    /// Query one bucket.
    pub fn get(
        &self,
        tenant_id: TenantId,
        item_id: StockItemId,
        location_id: LocationId,
    ) -> Option<StockLevelRow> {
        self.store.get(
            tenant_id,
            &StockBucketKey {
                item_id,
                location_id,
            },
        )
    }

    /// All buckets of one item (one row per location).
    pub fn list_item(&self, tenant_id: TenantId, item_id: StockItemId) -> Vec<StockLevelRow> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|r| r.item_id == item_id)
            .collect();
        rows.sort_by_key(|r| *r.location_id.0.as_uuid());
        rows
    }

    /// All buckets for a tenant.
    pub fn list(&self, tenant_id: TenantId) -> Vec<StockLevelRow> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by_key(|r| (*r.item_id.0.as_uuid(), *r.location_id.0.as_uuid()));
        rows
    }

    /// The product an item tracks, if known to the read model.
    pub fn product_of(&self, tenant_id: TenantId, item_id: StockItemId) -> Option<ProductId> {
        self.products
            .read()
            .ok()?
            .get(&(tenant_id, item_id))
            .copied()
    }

    /// Resolve the stock item tracking a product (reverse lookup).
    pub fn item_of(&self, tenant_id: TenantId, product_id: ProductId) -> Option<StockItemId> {
        let products = self.products.read().ok()?;
        products
            .iter()
            .find(|((t, _), p)| *t == tenant_id && **p == product_id)
            .map(|((_, item), _)| *item)
    }

    fn mutate_bucket(
        &self,
        tenant_id: TenantId,
        item_id: StockItemId,
        location_id: LocationId,
        f: impl FnOnce(&mut StockLevelRow),
    ) -> Result<(), StockProjectionError> {
        let product_id = self
            .product_of(tenant_id, item_id)
            .ok_or(StockProjectionError::UntrackedItem(item_id))?;

        let key = StockBucketKey {
            item_id,
            location_id,
        };
        let mut row = self.store.get(tenant_id, &key).unwrap_or(StockLevelRow {
            item_id,
            product_id,
            location_id,
            on_hand: 0,
            reserved: 0,
            reorder_point: 0,
        });
        f(&mut row);
        self.store.upsert(tenant_id, key, row);
        Ok(())
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces tenant isolation
    /// - Enforces monotonic sequence per (tenant, aggregate) stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockProjectionError> {
        if envelope.aggregate_type() != "inventory.stock" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(StockProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, item_id) = match &ev {
            StockEvent::ProductTracked(e) => (e.tenant_id, e.item_id),
            StockEvent::StockReceived(e) => (e.tenant_id, e.item_id),
            StockEvent::StockAdjusted(e) => (e.tenant_id, e.item_id),
            StockEvent::StockTransferred(e) => (e.tenant_id, e.item_id),
            StockEvent::StockReserved(e) => (e.tenant_id, e.item_id),
            StockEvent::ReservationReleased(e) => (e.tenant_id, e.item_id),
            StockEvent::ReservationCommitted(e) => (e.tenant_id, e.item_id),
            StockEvent::ReorderPointSet(e) => (e.tenant_id, e.item_id),
        };

        if event_tenant != tenant_id {
            return Err(StockProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if item_id.0 != aggregate_id {
            return Err(StockProjectionError::TenantIsolation(
                "event item_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            StockEvent::ProductTracked(e) => {
                if let Ok(mut products) = self.products.write() {
                    products.insert((tenant_id, e.item_id), e.product_id);
                }
            }
            StockEvent::StockReceived(e) => {
                self.mutate_bucket(tenant_id, e.item_id, e.location_id, |row| {
                    row.on_hand += e.quantity;
                })?;
            }
            StockEvent::StockAdjusted(e) => {
                self.mutate_bucket(tenant_id, e.item_id, e.location_id, |row| {
                    row.on_hand += e.delta;
                })?;
            }
            StockEvent::StockTransferred(e) => {
                self.mutate_bucket(tenant_id, e.item_id, e.from, |row| {
                    row.on_hand -= e.quantity;
                })?;
                self.mutate_bucket(tenant_id, e.item_id, e.to, |row| {
                    row.on_hand += e.quantity;
                })?;
            }
            StockEvent::StockReserved(e) => {
                self.mutate_bucket(tenant_id, e.item_id, e.location_id, |row| {
                    row.reserved += e.quantity;
                })?;
            }
            StockEvent::ReservationReleased(e) => {
                self.mutate_bucket(tenant_id, e.item_id, e.location_id, |row| {
                    row.reserved -= e.quantity;
                })?;
            }
            StockEvent::ReservationCommitted(e) => {
                self.mutate_bucket(tenant_id, e.item_id, e.location_id, |row| {
                    row.on_hand -= e.quantity;
                    row.reserved -= e.quantity;
                })?;
            }
            StockEvent::ReorderPointSet(e) => {
                self.mutate_bucket(tenant_id, e.item_id, e.location_id, |row| {
                    row.reorder_point = e.quantity;
                })?;
            }
        }

        // Advance cursor after successful apply.
        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.cursors.clear_tenant(t);
                if let Ok(mut products) = self.products.write() {
                    products.retain(|(pt, _), _| *pt != t);
                }
            }
        }

        // Deterministic replay order: tenant, aggregate, sequence.
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

#[derive(Debug)]
pub enum StockSnapshotError {
    Unavailable,
}

impl<S> ReadModelReader<StockSnapshot> for StockLevelsProjection<S>
where
    S: TenantStore<StockBucketKey, StockLevelRow>,
{
    type Error = StockSnapshotError;

    fn get_snapshot(&self, tenant_id: TenantId) -> Result<StockSnapshot, Self::Error> {
        let buckets = self
            .list(tenant_id)
            .into_iter()
            .map(|row| StockBucketSnapshot {
                product_id: row.product_id.to_string(),
                location_id: row.location_id.to_string(),
                on_hand: row.on_hand,
                reserved: row.reserved,
                reorder_point: row.reorder_point,
            })
            .collect();

        Ok(StockSnapshot { tenant_id, buckets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryTenantStore;
    use chrono::Utc;
    use std::sync::Arc;
    use stockpile_events::Event;
    use stockpile_inventory::{ProductTracked, StockReceived, StockTransferred};
    use uuid::Uuid;

    type TestProjection =
        StockLevelsProjection<Arc<InMemoryTenantStore<StockBucketKey, StockLevelRow>>>;

    fn projection() -> TestProjection {
        StockLevelsProjection::new(Arc::new(InMemoryTenantStore::new()))
    }

    fn envelope(tenant: TenantId, item: StockItemId, seq: u64, ev: &StockEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant,
            item.0,
            "inventory.stock",
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn tracked(tenant: TenantId, item: StockItemId, product: ProductId) -> StockEvent {
        StockEvent::ProductTracked(ProductTracked {
            tenant_id: tenant,
            item_id: item,
            product_id: product,
            occurred_at: Utc::now(),
        })
    }

    fn received(tenant: TenantId, item: StockItemId, loc: LocationId, qty: i64) -> StockEvent {
        StockEvent::StockReceived(StockReceived {
            tenant_id: tenant,
            item_id: item,
            location_id: loc,
            quantity: qty,
            reference: "PO".to_string(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn receive_then_transfer_updates_both_buckets() {
        let p = projection();
        let tenant = TenantId::new();
        let item = StockItemId::new(AggregateId::new());
        let product = ProductId::new(AggregateId::new());
        let warehouse = LocationId::new(AggregateId::new());
        let store_loc = LocationId::new(AggregateId::new());

        p.apply_envelope(&envelope(tenant, item, 1, &tracked(tenant, item, product)))
            .unwrap();
        p.apply_envelope(&envelope(tenant, item, 2, &received(tenant, item, warehouse, 30)))
            .unwrap();

        let transfer = StockEvent::StockTransferred(StockTransferred {
            tenant_id: tenant,
            item_id: item,
            from: warehouse,
            to: store_loc,
            quantity: 10,
            occurred_at: Utc::now(),
        });
        p.apply_envelope(&envelope(tenant, item, 3, &transfer)).unwrap();

        assert_eq!(p.get(tenant, item, warehouse).unwrap().on_hand, 20);
        assert_eq!(p.get(tenant, item, store_loc).unwrap().on_hand, 10);
        assert_eq!(p.product_of(tenant, item), Some(product));
        assert_eq!(p.item_of(tenant, product), Some(item));
    }

    #[test]
    fn duplicate_envelopes_are_ignored() {
        let p = projection();
        let tenant = TenantId::new();
        let item = StockItemId::new(AggregateId::new());
        let product = ProductId::new(AggregateId::new());
        let loc = LocationId::new(AggregateId::new());

        p.apply_envelope(&envelope(tenant, item, 1, &tracked(tenant, item, product)))
            .unwrap();
        let env = envelope(tenant, item, 2, &received(tenant, item, loc, 5));
        p.apply_envelope(&env).unwrap();
        p.apply_envelope(&env).unwrap();

        assert_eq!(p.get(tenant, item, loc).unwrap().on_hand, 5);
    }

    #[test]
    fn sequence_gap_is_rejected() {
        let p = projection();
        let tenant = TenantId::new();
        let item = StockItemId::new(AggregateId::new());
        let product = ProductId::new(AggregateId::new());
        let loc = LocationId::new(AggregateId::new());

        p.apply_envelope(&envelope(tenant, item, 1, &tracked(tenant, item, product)))
            .unwrap();
        let err = p
            .apply_envelope(&envelope(tenant, item, 3, &received(tenant, item, loc, 5)))
            .unwrap_err();
        assert!(matches!(
            err,
            StockProjectionError::NonMonotonicSequence { last: 1, found: 3 }
        ));
    }

    #[test]
    fn mismatched_event_tenant_is_rejected() {
        let p = projection();
        let tenant = TenantId::new();
        let other = TenantId::new();
        let item = StockItemId::new(AggregateId::new());
        let product = ProductId::new(AggregateId::new());

        // Envelope says `tenant`, payload says `other`.
        let ev = tracked(other, item, product);
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            tenant,
            item.0,
            "inventory.stock",
            1,
            serde_json::to_value(&ev).unwrap(),
        );
        assert!(matches!(
            p.apply_envelope(&env),
            Err(StockProjectionError::TenantIsolation(_))
        ));
    }

    #[test]
    fn foreign_aggregate_types_are_skipped() {
        let p = projection();
        let env = EventEnvelope::new(
            Uuid::now_v7(),
            TenantId::new(),
            AggregateId::new(),
            "sales.order",
            1,
            serde_json::json!({"anything": true}),
        );
        assert!(p.apply_envelope(&env).is_ok());
    }

    #[test]
    fn rebuild_replays_deterministically() {
        let p = projection();
        let tenant = TenantId::new();
        let item = StockItemId::new(AggregateId::new());
        let product = ProductId::new(AggregateId::new());
        let loc = LocationId::new(AggregateId::new());

        let envs = vec![
            envelope(tenant, item, 2, &received(tenant, item, loc, 5)),
            envelope(tenant, item, 1, &tracked(tenant, item, product)),
        ];

        // Out-of-order input is fine: rebuild sorts by stream + sequence.
        p.rebuild_from_scratch(envs).unwrap();
        assert_eq!(p.get(tenant, item, loc).unwrap().on_hand, 5);
    }

    #[test]
    fn snapshot_feeds_alert_reader() {
        let p = projection();
        let tenant = TenantId::new();
        let item = StockItemId::new(AggregateId::new());
        let product = ProductId::new(AggregateId::new());
        let loc = LocationId::new(AggregateId::new());

        p.apply_envelope(&envelope(tenant, item, 1, &tracked(tenant, item, product)))
            .unwrap();
        p.apply_envelope(&envelope(tenant, item, 2, &received(tenant, item, loc, 5)))
            .unwrap();

        let snapshot = p.get_snapshot(tenant).unwrap();
        assert_eq!(snapshot.buckets.len(), 1);
        assert_eq!(snapshot.buckets[0].on_hand, 5);

        // Event trait is exercised through the payload round trip.
        assert_eq!(
            received(tenant, item, loc, 1).event_type(),
            "inventory.stock.received"
        );
    }
}
