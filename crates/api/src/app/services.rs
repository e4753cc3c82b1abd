use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use stockpile_alerts::AlertReport;
use stockpile_auth::UserId;
use stockpile_core::{AggregateId, DomainError, TenantId};
use stockpile_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stockpile_infra::{
    alerts::{AlertSink, LowStockRunner, LowStockRunnerHandle},
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{
        EventFilter, EventQuery, EventQueryResult, InMemoryEventStore, Pagination, StoredEvent,
    },
    projections::{
        catalog::{ProductCatalogProjection, ProductReadModel},
        coupons::{CouponReadModel, CouponsProjection},
        deliveries::{DeliveriesProjection, DeliveryReadModel},
        locations::{LocationReadModel, LocationsProjection},
        parties::{PartyDirectoryProjection, PartyReadModel},
        purchase_orders::{PurchaseOrderReadModel, PurchaseOrdersProjection},
        sales_orders::{SalesOrderReadModel, SalesOrdersProjection},
        serials::{SerialReadModel, SerialsProjection},
        settings::{SettingsProjection, SettingsReadModel},
        stock_levels::{StockBucketKey, StockLevelRow, StockLevelsProjection},
        stock_takes::{StockTakeReadModel, StockTakesProjection},
        users::{UserReadModel, UsersProjection},
    },
    read_model::{InMemoryTenantStore, TenantStore},
};

#[cfg(feature = "persistent")]
use sqlx::PgPool;
#[cfg(feature = "persistent")]
use stockpile_infra::{
    event_bus::RedisStreamsEventBus, event_store::PostgresEventStore, read_model::PostgresStockStore,
};

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: serde_json::Value,
}

/// API-local alert sink that stores reports and broadcasts low-stock
/// notifications to the tenant's realtime stream.
#[derive(Debug)]
pub struct ApiAlertSink {
    inner: Mutex<Vec<(TenantId, AlertReport)>>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

impl ApiAlertSink {
    pub fn new(realtime_tx: broadcast::Sender<RealtimeMessage>) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            realtime_tx,
        }
    }

    pub fn all(&self) -> Vec<(TenantId, AlertReport)> {
        self.inner.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// The most recent report per tenant is the current alert state.
    pub fn latest_for(&self, tenant_id: TenantId) -> Option<AlertReport> {
        self.all()
            .into_iter()
            .rev()
            .find(|(t, _)| *t == tenant_id)
            .map(|(_, r)| r)
    }
}

impl AlertSink for ApiAlertSink {
    fn emit(&self, tenant_id: TenantId, report: AlertReport) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.push((tenant_id, report.clone()));
        }

        // Broadcast alert availability (lossy; no backpressure on core).
        let _ = self.realtime_tx.send(RealtimeMessage {
            tenant_id,
            topic: "alerts.low_stock".to_string(),
            payload: serde_json::json!({
                "kind": "alert_report",
                "fired": report.fired,
                "metadata": report.metadata,
            }),
        });
    }
}

type Mem<K, V> = Arc<InMemoryTenantStore<K, V>>;

/// Stock rows can live in memory (dev/test) or Postgres (persistent mode);
/// the projection is generic over the store, so the rest of the API only
/// sees this erased alias.
pub type DynStockStore = Arc<dyn TenantStore<StockBucketKey, StockLevelRow>>;

type InMemoryDispatcher = CommandDispatcher<
    Arc<InMemoryEventStore>,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
>;

#[cfg(feature = "persistent")]
type PersistentDispatcher = CommandDispatcher<Arc<PostgresEventStore>, Arc<RedisStreamsEventBus>>;

enum Dispatchers {
    InMemory(Arc<InMemoryDispatcher>),
    #[cfg(feature = "persistent")]
    Persistent(Arc<PersistentDispatcher>),
}

/// Every projection the API serves reads from.
#[derive(Clone)]
pub struct Projections {
    pub stock: Arc<StockLevelsProjection<DynStockStore>>,
    pub catalog: Arc<ProductCatalogProjection<Mem<stockpile_catalog::ProductId, ProductReadModel>>>,
    pub locations: Arc<LocationsProjection<Mem<stockpile_inventory::LocationId, LocationReadModel>>>,
    pub parties: Arc<PartyDirectoryProjection<Mem<stockpile_parties::PartyId, PartyReadModel>>>,
    pub purchases:
        Arc<PurchaseOrdersProjection<Mem<stockpile_purchasing::PurchaseOrderId, PurchaseOrderReadModel>>>,
    pub sales: Arc<SalesOrdersProjection<Mem<stockpile_sales::SalesOrderId, SalesOrderReadModel>>>,
    pub deliveries: Arc<DeliveriesProjection<Mem<stockpile_sales::DeliveryId, DeliveryReadModel>>>,
    pub coupons: Arc<CouponsProjection<Mem<stockpile_coupons::CouponId, CouponReadModel>>>,
    pub stock_takes:
        Arc<StockTakesProjection<Mem<stockpile_inventory::StockTakeId, StockTakeReadModel>>>,
    pub serials: Arc<SerialsProjection<Mem<stockpile_inventory::SerialUnitId, SerialReadModel>>>,
    pub users: Arc<UsersProjection<Mem<UserId, UserReadModel>>>,
    pub settings:
        Arc<SettingsProjection<Mem<stockpile_settings::TenantSettingsId, SettingsReadModel>>>,
}

impl Projections {
    fn new(stock_store: DynStockStore) -> Self {
        Self {
            stock: Arc::new(StockLevelsProjection::new(stock_store)),
            catalog: Arc::new(ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new()))),
            locations: Arc::new(LocationsProjection::new(Arc::new(InMemoryTenantStore::new()))),
            parties: Arc::new(PartyDirectoryProjection::new(Arc::new(InMemoryTenantStore::new()))),
            purchases: Arc::new(PurchaseOrdersProjection::new(Arc::new(InMemoryTenantStore::new()))),
            sales: Arc::new(SalesOrdersProjection::new(Arc::new(InMemoryTenantStore::new()))),
            deliveries: Arc::new(DeliveriesProjection::new(Arc::new(InMemoryTenantStore::new()))),
            coupons: Arc::new(CouponsProjection::new(Arc::new(InMemoryTenantStore::new()))),
            stock_takes: Arc::new(StockTakesProjection::new(Arc::new(InMemoryTenantStore::new()))),
            serials: Arc::new(SerialsProjection::new(Arc::new(InMemoryTenantStore::new()))),
            users: Arc::new(UsersProjection::new(Arc::new(InMemoryTenantStore::new()))),
            settings: Arc::new(SettingsProjection::new(Arc::new(InMemoryTenantStore::new()))),
        }
    }

    /// Apply one published envelope to whichever projection owns it.
    fn apply(&self, env: &EventEnvelope<JsonValue>) -> Result<(), String> {
        match env.aggregate_type() {
            "inventory.stock" => self.stock.apply_envelope(env).map_err(|e| e.to_string()),
            "inventory.location" => self.locations.apply_envelope(env).map_err(|e| e.to_string()),
            "inventory.stock_take" => {
                self.stock_takes.apply_envelope(env).map_err(|e| e.to_string())
            }
            "inventory.serial" => self.serials.apply_envelope(env).map_err(|e| e.to_string()),
            "catalog.product" => self.catalog.apply_envelope(env).map_err(|e| e.to_string()),
            "parties.party" => self.parties.apply_envelope(env).map_err(|e| e.to_string()),
            "purchasing.order" => self.purchases.apply_envelope(env).map_err(|e| e.to_string()),
            "sales.order" => self.sales.apply_envelope(env).map_err(|e| e.to_string()),
            "sales.delivery" => self.deliveries.apply_envelope(env).map_err(|e| e.to_string()),
            "coupons.coupon" => self.coupons.apply_envelope(env).map_err(|e| e.to_string()),
            "settings.tenant" => self.settings.apply_envelope(env).map_err(|e| e.to_string()),
            "auth.user" => self.users.apply_envelope(env).map_err(|e| e.to_string()),
            _ => Ok(()),
        }
    }
}

/// All wiring the route handlers need.
pub struct AppServices {
    dispatcher: Dispatchers,
    event_query: Arc<dyn EventQuery>,
    pub projections: Projections,
    alert_sink: Arc<ApiAlertSink>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        #[cfg(feature = "persistent")]
        {
            return build_persistent_services().await;
        }
        #[cfg(not(feature = "persistent"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but persistent feature not enabled, falling back to in-memory"
            );
        }
    }

    build_in_memory_services()
}

fn spawn_projection_worker(
    sub: stockpile_events::Subscription<EventEnvelope<JsonValue>>,
    projections: Projections,
    alert_sink: Arc<ApiAlertSink>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
) {
    let runners: Arc<Mutex<HashMap<TenantId, LowStockRunnerHandle>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let runner_cfg = LowStockRunner::default();

    tokio::task::spawn_blocking(move || {
        loop {
            match sub.recv() {
                Ok(env) => {
                    let at = env.aggregate_type().to_string();

                    if let Err(e) = projections.apply(&env) {
                        tracing::warn!("projection apply failed: {e}");
                        continue;
                    }

                    // Broadcast projection update (lossy; no backpressure on core).
                    let _ = realtime_tx.send(RealtimeMessage {
                        tenant_id: env.tenant_id(),
                        topic: format!("{at}.projection_updated"),
                        payload: serde_json::json!({
                            "kind": "projection_update",
                            "aggregate_type": at,
                            "aggregate_id": env.aggregate_id().to_string(),
                            "sequence_number": env.sequence_number(),
                        }),
                    });

                    // Event-triggered low-stock evaluation for stock updates.
                    if at == "inventory.stock" {
                        let tenant_id = env.tenant_id();
                        if let Ok(mut runners) = runners.lock() {
                            let handle = runners.entry(tenant_id).or_insert_with(|| {
                                runner_cfg.spawn_for_tenant(
                                    "alerts.low_stock",
                                    tenant_id,
                                    projections.stock.clone(),
                                    alert_sink.clone(),
                                )
                            });
                            handle.trigger();
                        }
                    }
                }
                Err(_) => break,
            }
        }
    });
}

fn build_in_memory_services() -> AppServices {
    // In-memory infra wiring (dev/test): store + bus + projections.
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());

    let stock_store: DynStockStore = Arc::new(InMemoryTenantStore::new());
    let projections = Projections::new(stock_store);

    // Realtime channel (SSE): lossy broadcast, tenant-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);
    let alert_sink = Arc::new(ApiAlertSink::new(realtime_tx.clone()));

    spawn_projection_worker(
        bus.subscribe(),
        projections.clone(),
        alert_sink.clone(),
        realtime_tx.clone(),
    );

    let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), bus));

    AppServices {
        dispatcher: Dispatchers::InMemory(dispatcher),
        event_query: store,
        projections,
        alert_sink,
        realtime_tx,
    }
}

#[cfg(feature = "persistent")]
async fn build_persistent_services() -> AppServices {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    let store = Arc::new(PostgresEventStore::new(pool.clone()));
    let bus = Arc::new(
        RedisStreamsEventBus::new(&redis_url, None, None)
            .expect("Failed to create Redis Streams event bus"),
    );
    bus.ensure_consumer_group("projections")
        .expect("Failed to create consumer group");

    let stock_store: DynStockStore = Arc::new(PostgresStockStore::new(pool));
    let projections = Projections::new(stock_store);

    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);
    let alert_sink = Arc::new(ApiAlertSink::new(realtime_tx.clone()));

    let sub = bus.subscribe_with_group(
        "projections",
        &format!("consumer-{}", uuid::Uuid::now_v7()),
        None,
    );
    spawn_projection_worker(sub, projections.clone(), alert_sink.clone(), realtime_tx.clone());

    let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), bus));

    AppServices {
        dispatcher: Dispatchers::Persistent(dispatcher),
        event_query: store,
        projections,
        alert_sink,
        realtime_tx,
    }
}

impl AppServices {
    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    pub fn alert_sink(&self) -> &Arc<ApiAlertSink> {
        &self.alert_sink
    }

    /// Dispatch a command through the configured pipeline.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: stockpile_core::Aggregate<Error = DomainError>,
        A::Event: stockpile_events::Event + Serialize + DeserializeOwned,
    {
        match &self.dispatcher {
            Dispatchers::InMemory(d) => d.dispatch::<A>(
                tenant_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
            #[cfg(feature = "persistent")]
            Dispatchers::Persistent(d) => d.dispatch::<A>(
                tenant_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
        }
    }

    /// Query events with filters and pagination.
    pub async fn query_events(
        &self,
        tenant_id: TenantId,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, stockpile_infra::event_store::EventStoreError> {
        self.event_query
            .query_events(tenant_id, filter, pagination)
            .await
    }

    /// Get events for a specific aggregate.
    pub async fn get_aggregate_events(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        pagination: Option<Pagination>,
    ) -> Result<EventQueryResult, stockpile_infra::event_store::EventStoreError> {
        self.event_query
            .get_aggregate_events(tenant_id, aggregate_id, pagination)
            .await
    }

    /// Get a single event by its ID.
    pub async fn get_event_by_id(
        &self,
        tenant_id: TenantId,
        event_id: uuid::Uuid,
    ) -> Result<Option<StoredEvent>, stockpile_infra::event_store::EventStoreError> {
        self.event_query.get_event_by_id(tenant_id, event_id).await
    }
}

/// Build an SSE stream for a tenant (used by `/stream`).
pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
