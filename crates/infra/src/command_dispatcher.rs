//! Command execution pipeline (application-level orchestration).
//!
//! The dispatcher runs the same lifecycle for every aggregate:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events (append-only, optimistic concurrency)
//!   ↓
//! 5. Publish events to the bus (projections, runners, realtime)
//! ```
//!
//! Events are stored **before** publication; a publish failure after a
//! successful append surfaces as `DispatchError::Publish` and retrying is
//! safe (at-least-once delivery, idempotent consumers).

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockpile_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use stockpile_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version).
    Concurrency(String),
    /// Tenant isolation violation (cross-tenant or cross-aggregate stream mixing).
    TenantIsolation(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Domain invariant failure (deterministic).
    InvariantViolation(String),
    /// Domain authorization failure.
    Unauthorized,
    /// Domain-level not found.
    NotFound,
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run fully in-memory and
/// production can swap in Postgres/Redis without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// `make_aggregate` constructs a fresh instance for rehydration (e.g.
    /// `StockItem::empty(..)`); the dispatcher stays ignorant of aggregate
    /// construction details.
    ///
    /// Returns the committed `StoredEvent`s (with assigned sequence
    /// numbers). On a concurrency conflict the caller may reload and retry
    /// the command or surface the conflict.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockpile_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (tenant-scoped)
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant data.
    // Also ensure the stream is monotonically increasing by sequence number.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use chrono::Utc;
    use std::sync::Arc;
    use stockpile_events::InMemoryEventBus;
    use stockpile_inventory::{
        ReceiveStock, StockCommand, StockItem, StockItemId, TrackProduct,
    };

    type TestDispatcher = CommandDispatcher<
        Arc<InMemoryEventStore>,
        Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    >;

    fn dispatcher() -> (
        TestDispatcher,
        Arc<InMemoryEventStore>,
        Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
    ) {
        let store = Arc::new(InMemoryEventStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        (
            CommandDispatcher::new(store.clone(), bus.clone()),
            store,
            bus,
        )
    }

    fn track_cmd(tenant_id: TenantId, agg: AggregateId) -> StockCommand {
        StockCommand::TrackProduct(TrackProduct {
            tenant_id,
            item_id: StockItemId::new(agg),
            product_id: stockpile_catalog::ProductId::new(AggregateId::new()),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_and_publishes() {
        let (dispatcher, store, bus) = dispatcher();
        let tenant_id = TenantId::new();
        let agg = AggregateId::new();
        let sub = bus.subscribe();

        let committed = dispatcher
            .dispatch::<StockItem>(
                tenant_id,
                agg,
                "inventory.stock",
                track_cmd(tenant_id, agg),
                |_t, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();

        assert_eq!(committed.len(), 1);
        assert_eq!(store.load_stream(tenant_id, agg).unwrap().len(), 1);

        let env = sub.try_recv().unwrap();
        assert_eq!(env.tenant_id(), tenant_id);
        assert_eq!(env.aggregate_type(), "inventory.stock");
        assert_eq!(env.sequence_number(), 1);
    }

    #[test]
    fn dispatch_rehydrates_across_calls() {
        let (dispatcher, _store, _bus) = dispatcher();
        let tenant_id = TenantId::new();
        let agg = AggregateId::new();
        let item_id = StockItemId::new(agg);
        let location = stockpile_inventory::LocationId::new(AggregateId::new());

        dispatcher
            .dispatch::<StockItem>(
                tenant_id,
                agg,
                "inventory.stock",
                track_cmd(tenant_id, agg),
                |_t, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();

        // Second command only succeeds if the first one is replayed.
        let committed = dispatcher
            .dispatch::<StockItem>(
                tenant_id,
                agg,
                "inventory.stock",
                StockCommand::ReceiveStock(ReceiveStock {
                    tenant_id,
                    item_id,
                    location_id: location,
                    quantity: 5,
                    reference: "PO-9".to_string(),
                    occurred_at: Utc::now(),
                }),
                |_t, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();

        assert_eq!(committed[0].sequence_number, 2);
    }

    #[test]
    fn domain_rejections_map_to_dispatch_errors() {
        let (dispatcher, _store, _bus) = dispatcher();
        let tenant_id = TenantId::new();
        let agg = AggregateId::new();

        dispatcher
            .dispatch::<StockItem>(
                tenant_id,
                agg,
                "inventory.stock",
                track_cmd(tenant_id, agg),
                |_t, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();

        // Tracking twice is a domain conflict.
        let err = dispatcher
            .dispatch::<StockItem>(
                tenant_id,
                agg,
                "inventory.stock",
                track_cmd(tenant_id, agg),
                |_t, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
    }

    #[test]
    fn cross_tenant_stream_access_is_isolated() {
        let (dispatcher, _store, _bus) = dispatcher();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let agg = AggregateId::new();

        dispatcher
            .dispatch::<StockItem>(
                tenant_a,
                agg,
                "inventory.stock",
                track_cmd(tenant_a, agg),
                |_t, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();

        // Tenant B sees an empty stream for the same aggregate id, so its
        // own TrackProduct succeeds independently.
        let committed = dispatcher
            .dispatch::<StockItem>(
                tenant_b,
                agg,
                "inventory.stock",
                track_cmd(tenant_b, agg),
                |_t, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();
        assert_eq!(committed[0].sequence_number, 1);
    }
}
