use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_core::TenantId;
use stockpile_events::EventEnvelope;
use stockpile_parties::{PartyEvent, PartyId, PartyKind, PartyStatus};

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable party directory row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyReadModel {
    pub party_id: PartyId,
    pub kind: PartyKind,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: PartyStatus,
}

#[derive(Debug, Error)]
pub enum PartyProjectionError {
    #[error("failed to deserialize party event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Party directory projection (customers + suppliers).
#[derive(Debug)]
pub struct PartyDirectoryProjection<S>
where
    S: TenantStore<PartyId, PartyReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PartyDirectoryProjection<S>
where
    S: TenantStore<PartyId, PartyReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, party_id: &PartyId) -> Option<PartyReadModel> {
        self.store.get(tenant_id, party_id)
    }

    pub fn list(&self, tenant_id: TenantId, kind: Option<PartyKind>) -> Vec<PartyReadModel> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|r| kind.is_none_or(|k| r.kind == k))
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), PartyProjectionError> {
        if envelope.aggregate_type() != "parties.party" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(PartyProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: PartyEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| PartyProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, party_id) = match &ev {
            PartyEvent::PartyRegistered(e) => (e.tenant_id, e.party_id),
            PartyEvent::PartyUpdated(e) => (e.tenant_id, e.party_id),
            PartyEvent::PartySuspended(e) => (e.tenant_id, e.party_id),
            PartyEvent::PartyReactivated(e) => (e.tenant_id, e.party_id),
        };

        if event_tenant != tenant_id {
            return Err(PartyProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if party_id.0 != aggregate_id {
            return Err(PartyProjectionError::TenantIsolation(
                "event party_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            PartyEvent::PartyRegistered(e) => {
                self.store.upsert(
                    tenant_id,
                    e.party_id,
                    PartyReadModel {
                        party_id: e.party_id,
                        kind: e.kind,
                        name: e.name,
                        email: e.contact.email,
                        phone: e.contact.phone,
                        status: PartyStatus::Active,
                    },
                );
            }
            PartyEvent::PartyUpdated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.party_id) {
                    rm.name = e.name;
                    rm.email = e.contact.email;
                    rm.phone = e.contact.phone;
                    self.store.upsert(tenant_id, e.party_id, rm);
                }
            }
            PartyEvent::PartySuspended(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.party_id) {
                    rm.status = PartyStatus::Suspended;
                    self.store.upsert(tenant_id, e.party_id, rm);
                }
            }
            PartyEvent::PartyReactivated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.party_id) {
                    rm.status = PartyStatus::Active;
                    self.store.upsert(tenant_id, e.party_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), PartyProjectionError> {
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
    use stockpile_core::AggregateId;
    use stockpile_parties::{ContactInfo, PartyRegistered, PartySuspended};
    use uuid::Uuid;

    #[test]
    fn kind_filter_separates_customers_and_suppliers() {
        let p = PartyDirectoryProjection::new(Arc::new(InMemoryTenantStore::new()));
        let tenant = TenantId::new();

        for (kind, name) in [
            (PartyKind::Customer, "Jane"),
            (PartyKind::Supplier, "Acme"),
        ] {
            let party = PartyId::new(AggregateId::new());
            let ev = PartyEvent::PartyRegistered(PartyRegistered {
                tenant_id: tenant,
                party_id: party,
                kind,
                name: name.to_string(),
                contact: ContactInfo::default(),
                occurred_at: Utc::now(),
            });
            p.apply_envelope(&EventEnvelope::new(
                Uuid::now_v7(),
                tenant,
                party.0,
                "parties.party",
                1,
                serde_json::to_value(&ev).unwrap(),
            ))
            .unwrap();
        }

        assert_eq!(p.list(tenant, Some(PartyKind::Customer)).len(), 1);
        assert_eq!(p.list(tenant, Some(PartyKind::Supplier)).len(), 1);
        assert_eq!(p.list(tenant, None).len(), 2);
    }

    #[test]
    fn suspension_reflects_in_read_model() {
        let p = PartyDirectoryProjection::new(Arc::new(InMemoryTenantStore::new()));
        let tenant = TenantId::new();
        let party = PartyId::new(AggregateId::new());

        let registered = PartyEvent::PartyRegistered(PartyRegistered {
            tenant_id: tenant,
            party_id: party,
            kind: PartyKind::Customer,
            name: "Jane".to_string(),
            contact: ContactInfo::default(),
            occurred_at: Utc::now(),
        });
        let suspended = PartyEvent::PartySuspended(PartySuspended {
            tenant_id: tenant,
            party_id: party,
            reason: None,
            occurred_at: Utc::now(),
        });

        for (seq, ev) in [(1, &registered), (2, &suspended)] {
            p.apply_envelope(&EventEnvelope::new(
                Uuid::now_v7(),
                tenant,
                party.0,
                "parties.party",
                seq,
                serde_json::to_value(ev).unwrap(),
            ))
            .unwrap();
        }

        assert_eq!(p.get(tenant, &party).unwrap().status, PartyStatus::Suspended);
    }
}
