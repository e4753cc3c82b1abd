//! Dispatch pipeline benchmarks over the in-memory store.
//!
//! Measures the full command path (load → rehydrate → handle → append →
//! publish) and rehydration cost as stream length grows.

use std::sync::Arc;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use stockpile_catalog::ProductId;
use stockpile_core::{AggregateId, TenantId};
use stockpile_events::{EventEnvelope, InMemoryEventBus};
use stockpile_infra::command_dispatcher::CommandDispatcher;
use stockpile_infra::event_store::InMemoryEventStore;
use stockpile_inventory::{
    AdjustStock, AdjustmentReason, LocationId, ReceiveStock, StockCommand, StockItem, StockItemId,
    TrackProduct,
};

type Dispatcher = CommandDispatcher<
    Arc<InMemoryEventStore>,
    Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>,
>;

fn dispatcher() -> Dispatcher {
    CommandDispatcher::new(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
    )
}

fn seed_item(dispatcher: &Dispatcher, tenant_id: TenantId) -> (AggregateId, LocationId) {
    let agg = AggregateId::new();
    let location = LocationId::new(AggregateId::new());

    dispatcher
        .dispatch::<StockItem>(
            tenant_id,
            agg,
            "inventory.stock",
            StockCommand::TrackProduct(TrackProduct {
                tenant_id,
                item_id: StockItemId::new(agg),
                product_id: ProductId::new(AggregateId::new()),
                occurred_at: Utc::now(),
            }),
            |_t, id| StockItem::empty(StockItemId::new(id)),
        )
        .unwrap();

    dispatcher
        .dispatch::<StockItem>(
            tenant_id,
            agg,
            "inventory.stock",
            StockCommand::ReceiveStock(ReceiveStock {
                tenant_id,
                item_id: StockItemId::new(agg),
                location_id: location,
                quantity: 1_000_000,
                reference: "SEED".to_string(),
                occurred_at: Utc::now(),
            }),
            |_t, id| StockItem::empty(StockItemId::new(id)),
        )
        .unwrap();

    (agg, location)
}

fn adjust_cmd(tenant_id: TenantId, agg: AggregateId, location: LocationId) -> StockCommand {
    StockCommand::AdjustStock(AdjustStock {
        tenant_id,
        item_id: StockItemId::new(agg),
        location_id: location,
        delta: -1,
        reason: AdjustmentReason::Correction,
        occurred_at: Utc::now(),
    })
}

fn bench_dispatch_throughput(c: &mut Criterion) {
    let d = dispatcher();
    let tenant_id = TenantId::new();
    let (agg, location) = seed_item(&d, tenant_id);

    c.bench_function("dispatch_adjust_stock", |b| {
        b.iter(|| {
            d.dispatch::<StockItem>(
                tenant_id,
                agg,
                "inventory.stock",
                adjust_cmd(tenant_id, agg, location),
                |_t, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap()
        })
    });
}

fn bench_rehydration_by_stream_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("rehydration_stream_length");

    for &events in &[10u64, 100, 1000] {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let (agg, location) = seed_item(&d, tenant_id);

        for _ in 0..events {
            d.dispatch::<StockItem>(
                tenant_id,
                agg,
                "inventory.stock",
                adjust_cmd(tenant_id, agg, location),
                |_t, id| StockItem::empty(StockItemId::new(id)),
            )
            .unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(events), &events, |b, _| {
            b.iter(|| {
                d.dispatch::<StockItem>(
                    tenant_id,
                    agg,
                    "inventory.stock",
                    adjust_cmd(tenant_id, agg, location),
                    |_t, id| StockItem::empty(StockItemId::new(id)),
                )
                .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch_throughput,
    bench_rehydration_by_stream_length
);
criterion_main!(benches);
