use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_catalog::{ProductEvent, ProductId, ProductStatus, Variant};
use stockpile_core::{Money, TenantId};
use stockpile_events::EventEnvelope;

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable product catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub status: ProductStatus,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Error)]
pub enum CatalogProjectionError {
    #[error("failed to deserialize product event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Product catalog projection.
#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(tenant_id, product_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.sku.cmp(&b.sku));
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), CatalogProjectionError> {
        if envelope.aggregate_type() != "catalog.product" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(CatalogProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: ProductEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CatalogProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, product_id) = match &ev {
            ProductEvent::ProductCreated(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductActivated(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductArchived(e) => (e.tenant_id, e.product_id),
            ProductEvent::PriceChanged(e) => (e.tenant_id, e.product_id),
            ProductEvent::VariantDefined(e) => (e.tenant_id, e.product_id),
        };

        if event_tenant != tenant_id {
            return Err(CatalogProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if product_id.0 != aggregate_id {
            return Err(CatalogProjectionError::TenantIsolation(
                "event product_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            ProductEvent::ProductCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.product_id,
                    ProductReadModel {
                        product_id: e.product_id,
                        sku: e.sku,
                        name: e.name,
                        price: e.price,
                        status: ProductStatus::Draft,
                        variants: vec![],
                    },
                );
            }
            ProductEvent::ProductActivated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.product_id) {
                    rm.status = ProductStatus::Active;
                    self.store.upsert(tenant_id, e.product_id, rm);
                }
            }
            ProductEvent::ProductArchived(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.product_id) {
                    rm.status = ProductStatus::Archived;
                    self.store.upsert(tenant_id, e.product_id, rm);
                }
            }
            ProductEvent::PriceChanged(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.product_id) {
                    rm.price = e.price;
                    self.store.upsert(tenant_id, e.product_id, rm);
                }
            }
            ProductEvent::VariantDefined(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.product_id) {
                    rm.variants.push(e.variant);
                    self.store.upsert(tenant_id, e.product_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), CatalogProjectionError> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryTenantStore;
    use chrono::Utc;
    use std::sync::Arc;
    use stockpile_catalog::{PriceChanged, ProductCreated};
    use stockpile_core::AggregateId;
    use uuid::Uuid;

    fn envelope(tenant: TenantId, product: ProductId, seq: u64, ev: &ProductEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant,
            product.0,
            "catalog.product",
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    #[test]
    fn created_then_repriced() {
        let p = ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new()));
        let tenant = TenantId::new();
        let product = ProductId::new(AggregateId::new());

        p.apply_envelope(&envelope(
            tenant,
            product,
            1,
            &ProductEvent::ProductCreated(ProductCreated {
                tenant_id: tenant,
                product_id: product,
                sku: "TEE-001".to_string(),
                name: "Plain Tee".to_string(),
                price: Money::from_minor(1999),
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        p.apply_envelope(&envelope(
            tenant,
            product,
            2,
            &ProductEvent::PriceChanged(PriceChanged {
                tenant_id: tenant,
                product_id: product,
                price: Money::from_minor(1499),
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        let rm = p.get(tenant, &product).unwrap();
        assert_eq!(rm.price.minor(), 1499);
        assert_eq!(rm.status, ProductStatus::Draft);
        assert!(p.get(TenantId::new(), &product).is_none());
    }
}
