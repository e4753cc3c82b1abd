use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_core::TenantId;
use stockpile_events::EventEnvelope;
use stockpile_settings::{SettingsEvent, TenantSettingsId};

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable tenant settings row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsReadModel {
    pub settings_id: TenantSettingsId,
    pub currency: String,
    pub low_stock_default: i64,
    pub allow_backorders: bool,
}

#[derive(Debug, Error)]
pub enum SettingsProjectionError {
    #[error("failed to deserialize settings event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Tenant settings projection (singleton row per tenant).
#[derive(Debug)]
pub struct SettingsProjection<S>
where
    S: TenantStore<TenantSettingsId, SettingsReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SettingsProjection<S>
where
    S: TenantStore<TenantSettingsId, SettingsReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId) -> Option<SettingsReadModel> {
        self.store
            .get(tenant_id, &TenantSettingsId::for_tenant(tenant_id))
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), SettingsProjectionError> {
        if envelope.aggregate_type() != "settings.tenant" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(SettingsProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: SettingsEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| SettingsProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, settings_id) = match &ev {
            SettingsEvent::SettingsInitialized(e) => (e.tenant_id, e.settings_id),
            SettingsEvent::SettingsUpdated(e) => (e.tenant_id, e.settings_id),
            SettingsEvent::CurrencyChanged(e) => (e.tenant_id, e.settings_id),
        };

        if event_tenant != tenant_id {
            return Err(SettingsProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if settings_id.0 != aggregate_id {
            return Err(SettingsProjectionError::TenantIsolation(
                "event settings_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            SettingsEvent::SettingsInitialized(e) => {
                self.store.upsert(
                    tenant_id,
                    e.settings_id,
                    SettingsReadModel {
                        settings_id: e.settings_id,
                        currency: e.currency,
                        low_stock_default: e.low_stock_default,
                        allow_backorders: e.allow_backorders,
                    },
                );
            }
            SettingsEvent::SettingsUpdated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.settings_id) {
                    rm.low_stock_default = e.low_stock_default;
                    rm.allow_backorders = e.allow_backorders;
                    self.store.upsert(tenant_id, e.settings_id, rm);
                }
            }
            SettingsEvent::CurrencyChanged(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.settings_id) {
                    rm.currency = e.currency;
                    self.store.upsert(tenant_id, e.settings_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), SettingsProjectionError> {
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
