//! Postgres-backed event store (`postgres` feature).
//!
//! Storage schema (one table, append-only):
//!
//! ```sql
//! CREATE TABLE events (
//!     event_id        UUID PRIMARY KEY,
//!     tenant_id       UUID NOT NULL,
//!     aggregate_id    UUID NOT NULL,
//!     aggregate_type  TEXT NOT NULL,
//!     sequence_number BIGINT NOT NULL CHECK (sequence_number > 0),
//!     event_type      TEXT NOT NULL,
//!     event_version   INT NOT NULL,
//!     occurred_at     TIMESTAMPTZ NOT NULL,
//!     payload         JSONB NOT NULL,
//!     created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     UNIQUE (tenant_id, aggregate_id, sequence_number)
//! );
//! ```
//!
//! Optimistic concurrency rides on the unique constraint: a racing append
//! that wins the version check still fails on insert with a unique
//! violation, which maps to `EventStoreError::Concurrency`.

use sqlx::{PgPool, Row};
use std::sync::Arc;

use stockpile_core::{AggregateId, ExpectedVersion, TenantId};

use super::query::{EventFilter, EventQuery, EventQueryResult, Pagination};
use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Postgres-backed append-only event store.
///
/// Every query carries `tenant_id` in its WHERE clause; cross-tenant reads
/// are structurally impossible. The sync `EventStore` impl bridges into the
/// async pool via `block_in_place`, so it must run on a multi-threaded
/// tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn load_stream_async(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, tenant_id, aggregate_id, aggregate_type,
                   sequence_number, event_type, event_version, occurred_at, payload
            FROM events
            WHERE tenant_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter().map(row_to_stored).collect()
    }

    pub async fn append_async(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let tenant_id = events[0].tenant_id;
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id != tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch contains multiple tenant_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(sequence_number), 0) AS version,
                   MAX(aggregate_type) AS aggregate_type
            FROM events
            WHERE tenant_id = $1 AND aggregate_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("stream_version", e))?;

        let current: i64 = row
            .try_get("version")
            .map_err(|e| EventStoreError::Backend(e.to_string()))?;
        let existing_type: Option<String> = row
            .try_get("aggregate_type")
            .map_err(|e| EventStoreError::Backend(e.to_string()))?;

        if let Some(existing) = existing_type {
            if existing != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
                )));
            }
        }

        if !expected_version.matches(current as u64) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        let mut committed = Vec::with_capacity(events.len());
        let mut next = (current as u64) + 1;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id, tenant_id, aggregate_id, aggregate_type,
                    sequence_number, event_type, event_version, occurred_at, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(event.event_id)
            .bind(tenant_id.as_uuid())
            .bind(aggregate_id.as_uuid())
            .bind(&aggregate_type)
            .bind(next as i64)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency(format!(
                        "concurrent append detected: sequence_number {next} already exists"
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            committed.push(StoredEvent {
                event_id: event.event_id,
                tenant_id,
                aggregate_id,
                aggregate_type: aggregate_type.clone(),
                sequence_number: next,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            });
            next += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(committed)
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, EventStoreError>
    where
        F: std::future::Future<Output = Result<T, EventStoreError>>,
    {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| EventStoreError::Backend("no tokio runtime available".to_string()))?;
        tokio::task::block_in_place(|| handle.block_on(fut))
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.block_on(self.append_async(events, expected_version))
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.block_on(self.load_stream_async(tenant_id, aggregate_id))
    }
}

#[async_trait::async_trait]
impl EventQuery for PostgresEventStore {
    async fn query_events(
        &self,
        tenant_id: TenantId,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError> {
        // Filters are applied in SQL; the shared `EventFilter::matches` is
        // kept for the in-memory store.
        let rows = sqlx::query(
            r#"
            SELECT event_id, tenant_id, aggregate_id, aggregate_type,
                   sequence_number, event_type, event_version, occurred_at, payload,
                   COUNT(*) OVER () AS total
            FROM events
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR aggregate_id = $2)
              AND ($3::text IS NULL OR aggregate_type = $3)
              AND ($4::text IS NULL OR event_type = $4)
              AND ($5::timestamptz IS NULL OR occurred_at > $5)
              AND ($6::timestamptz IS NULL OR occurred_at < $6)
            ORDER BY occurred_at DESC, sequence_number ASC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(filter.aggregate_id.map(|a| *a.as_uuid()))
        .bind(filter.aggregate_type.clone())
        .bind(filter.event_type.clone())
        .bind(filter.occurred_after)
        .bind(filter.occurred_before)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_events", e))?;

        let total: u64 = rows
            .first()
            .and_then(|r| r.try_get::<i64, _>("total").ok())
            .unwrap_or(0) as u64;
        let events: Vec<StoredEvent> = rows
            .iter()
            .map(row_to_stored)
            .collect::<Result<_, _>>()?;
        let has_more = (pagination.offset as u64 + events.len() as u64) < total;

        Ok(EventQueryResult {
            events,
            total,
            pagination,
            has_more,
        })
    }

    async fn get_event_by_id(
        &self,
        tenant_id: TenantId,
        event_id: uuid::Uuid,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT event_id, tenant_id, aggregate_id, aggregate_type,
                   sequence_number, event_type, event_version, occurred_at, payload
            FROM events
            WHERE tenant_id = $1 AND event_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(event_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_event_by_id", e))?;

        row.as_ref().map(row_to_stored).transpose()
    }
}

fn row_to_stored(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let to_err = |e: sqlx::Error| EventStoreError::Backend(e.to_string());

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(to_err)?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(to_err)?),
        aggregate_id: AggregateId::from_uuid(row.try_get("aggregate_id").map_err(to_err)?),
        aggregate_type: row.try_get("aggregate_type").map_err(to_err)?,
        sequence_number: row.try_get::<i64, _>("sequence_number").map_err(to_err)? as u64,
        event_type: row.try_get("event_type").map_err(to_err)?,
        event_version: row.try_get::<i32, _>("event_version").map_err(to_err)? as u32,
        occurred_at: row.try_get("occurred_at").map_err(to_err)?,
        payload: row.try_get("payload").map_err(to_err)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

fn map_sqlx_error(op: &str, err: sqlx::Error) -> EventStoreError {
    EventStoreError::Backend(format!("{op}: {err}"))
}
