//! Postgres-backed read-model store for stock levels (`postgres` feature).
//!
//! Table:
//!
//! ```sql
//! CREATE TABLE stock_levels (
//!     tenant_id     UUID NOT NULL,
//!     item_id       UUID NOT NULL,
//!     location_id   UUID NOT NULL,
//!     product_id    UUID NOT NULL,
//!     on_hand       BIGINT NOT NULL,
//!     reserved      BIGINT NOT NULL,
//!     reorder_point BIGINT NOT NULL,
//!     updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     PRIMARY KEY (tenant_id, item_id, location_id)
//! );
//! ```
//!
//! Rows are disposable: `clear_tenant` + replay rebuilds the table from the
//! event stream.

use std::sync::Arc;

use sqlx::{PgPool, Row};

use stockpile_catalog::ProductId;
use stockpile_core::{AggregateId, TenantId};
use stockpile_inventory::{LocationId, StockItemId};

use crate::projections::stock_levels::{StockBucketKey, StockLevelRow};
use crate::read_model::TenantStore;

/// Postgres-backed tenant store for the stock-levels read model.
///
/// Bridges into async sqlx via `block_in_place`; requires a multi-threaded
/// tokio runtime (same constraint as the Postgres event store).
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn block_on<F, T>(&self, default: T, fut: F) -> T
    where
        F: std::future::Future<Output = Option<T>>,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tokio::task::block_in_place(|| handle.block_on(fut)).unwrap_or(default)
            }
            Err(_) => default,
        }
    }
}

fn row_to_level(row: &sqlx::postgres::PgRow) -> Option<StockLevelRow> {
    let item_id: uuid::Uuid = row.try_get("item_id").ok()?;
    let location_id: uuid::Uuid = row.try_get("location_id").ok()?;
    let product_id: uuid::Uuid = row.try_get("product_id").ok()?;

    Some(StockLevelRow {
        item_id: StockItemId(AggregateId::from_uuid(item_id)),
        product_id: ProductId(AggregateId::from_uuid(product_id)),
        location_id: LocationId(AggregateId::from_uuid(location_id)),
        on_hand: row.try_get("on_hand").ok()?,
        reserved: row.try_get("reserved").ok()?,
        reorder_point: row.try_get("reorder_point").ok()?,
    })
}

impl TenantStore<StockBucketKey, StockLevelRow> for PostgresStockStore {
    fn get(&self, tenant_id: TenantId, key: &StockBucketKey) -> Option<StockLevelRow> {
        let pool = self.pool.clone();
        let tenant = *tenant_id.as_uuid();
        let item = *key.item_id.0.as_uuid();
        let location = *key.location_id.0.as_uuid();

        self.block_on(None, async move {
            let row = sqlx::query(
                r#"
                SELECT item_id, location_id, product_id, on_hand, reserved, reorder_point
                FROM stock_levels
                WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3
                "#,
            )
            .bind(tenant)
            .bind(item)
            .bind(location)
            .fetch_optional(&*pool)
            .await
            .ok()??;

            Some(row_to_level(&row))
        })
    }

    fn upsert(&self, tenant_id: TenantId, key: StockBucketKey, value: StockLevelRow) {
        let pool = self.pool.clone();
        let tenant = *tenant_id.as_uuid();

        self.block_on((), async move {
            let _ = sqlx::query(
                r#"
                INSERT INTO stock_levels (
                    tenant_id, item_id, location_id, product_id,
                    on_hand, reserved, reorder_point
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (tenant_id, item_id, location_id)
                DO UPDATE SET
                    on_hand = EXCLUDED.on_hand,
                    reserved = EXCLUDED.reserved,
                    reorder_point = EXCLUDED.reorder_point,
                    updated_at = NOW()
                "#,
            )
            .bind(tenant)
            .bind(*key.item_id.0.as_uuid())
            .bind(*key.location_id.0.as_uuid())
            .bind(*value.product_id.0.as_uuid())
            .bind(value.on_hand)
            .bind(value.reserved)
            .bind(value.reorder_point)
            .execute(&*pool)
            .await;
            Some(())
        })
    }

    fn remove(&self, tenant_id: TenantId, key: &StockBucketKey) {
        let pool = self.pool.clone();
        let tenant = *tenant_id.as_uuid();
        let item = *key.item_id.0.as_uuid();
        let location = *key.location_id.0.as_uuid();

        self.block_on((), async move {
            let _ = sqlx::query(
                "DELETE FROM stock_levels WHERE tenant_id = $1 AND item_id = $2 AND location_id = $3",
            )
            .bind(tenant)
            .bind(item)
            .bind(location)
            .execute(&*pool)
            .await;
            Some(())
        })
    }

    fn list(&self, tenant_id: TenantId) -> Vec<StockLevelRow> {
        let pool = self.pool.clone();
        let tenant = *tenant_id.as_uuid();

        self.block_on(vec![], async move {
            let rows = sqlx::query(
                r#"
                SELECT item_id, location_id, product_id, on_hand, reserved, reorder_point
                FROM stock_levels
                WHERE tenant_id = $1
                ORDER BY item_id, location_id
                "#,
            )
            .bind(tenant)
            .fetch_all(&*pool)
            .await
            .ok()?;

            Some(rows.iter().filter_map(row_to_level).collect())
        })
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        let pool = self.pool.clone();
        let tenant = *tenant_id.as_uuid();

        self.block_on((), async move {
            let _ = sqlx::query("DELETE FROM stock_levels WHERE tenant_id = $1")
                .bind(tenant)
                .execute(&*pool)
                .await;
            Some(())
        })
    }
}
