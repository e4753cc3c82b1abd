use std::collections::BTreeSet;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockpile_auth::{Role, UserEvent, UserId, UserStatus};
use stockpile_core::TenantId;
use stockpile_events::EventEnvelope;

use crate::projections::cursor::{CursorCheck, StreamCursors};
use crate::read_model::TenantStore;

/// Queryable user row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserReadModel {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub roles: Vec<Role>,
    pub status: UserStatus,
}

/// Resolved permission view for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePermissions {
    pub user_id: UserId,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub has_wildcard: bool,
}

#[derive(Debug, Error)]
pub enum UserProjectionError {
    #[error("failed to deserialize user event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Users projection.
#[derive(Debug)]
pub struct UsersProjection<S>
where
    S: TenantStore<UserId, UserReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> UsersProjection<S>
where
    S: TenantStore<UserId, UserReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, user_id: &UserId) -> Option<UserReadModel> {
        self.store.get(tenant_id, user_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<UserReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.email.cmp(&b.email));
        rows
    }

    /// Resolve a user's effective permissions through a role→permission
    /// policy function (the API supplies the retail policy).
    pub fn effective_permissions<F>(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
        role_permissions: F,
    ) -> Option<EffectivePermissions>
    where
        F: Fn(&str) -> Vec<String>,
    {
        let rm = self.get(tenant_id, user_id)?;

        let mut permissions: BTreeSet<String> = BTreeSet::new();
        for role in &rm.roles {
            for perm in role_permissions(role.as_str()) {
                permissions.insert(perm);
            }
        }
        let has_wildcard = permissions.contains("*");

        Some(EffectivePermissions {
            user_id: rm.user_id,
            roles: rm.roles.iter().map(|r| r.as_str().to_string()).collect(),
            permissions: permissions.into_iter().collect(),
            has_wildcard,
        })
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), UserProjectionError> {
        if envelope.aggregate_type() != "auth.user" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        match self.cursors.check(tenant_id, aggregate_id, seq) {
            Ok(CursorCheck::Duplicate) => return Ok(()),
            Ok(CursorCheck::Apply) => {}
            Err(gap) => {
                return Err(UserProjectionError::NonMonotonicSequence {
                    last: gap.last,
                    found: gap.found,
                });
            }
        }

        let ev: UserEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| UserProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, user_id) = match &ev {
            UserEvent::Created(e) => (e.tenant_id, e.user_id),
            UserEvent::RoleAssigned(e) => (e.tenant_id, e.user_id),
            UserEvent::RoleRevoked(e) => (e.tenant_id, e.user_id),
            UserEvent::Suspended(e) => (e.tenant_id, e.user_id),
            UserEvent::Activated(e) => (e.tenant_id, e.user_id),
        };

        if event_tenant != tenant_id {
            return Err(UserProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if *user_id.as_uuid() != *aggregate_id.as_uuid() {
            return Err(UserProjectionError::TenantIsolation(
                "event user_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            UserEvent::Created(e) => {
                self.store.upsert(
                    tenant_id,
                    e.user_id,
                    UserReadModel {
                        user_id: e.user_id,
                        email: e.email,
                        display_name: e.display_name,
                        roles: e.initial_roles,
                        status: UserStatus::Active,
                    },
                );
            }
            UserEvent::RoleAssigned(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.user_id) {
                    rm.roles.push(e.role);
                    self.store.upsert(tenant_id, e.user_id, rm);
                }
            }
            UserEvent::RoleRevoked(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.user_id) {
                    rm.roles.retain(|r| r.as_str() != e.role.as_str());
                    self.store.upsert(tenant_id, e.user_id, rm);
                }
            }
            UserEvent::Suspended(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.user_id) {
                    rm.status = UserStatus::Suspended;
                    self.store.upsert(tenant_id, e.user_id, rm);
                }
            }
            UserEvent::Activated(e) => {
                if let Some(mut rm) = self.store.get(tenant_id, &e.user_id) {
                    rm.status = UserStatus::Active;
                    self.store.upsert(tenant_id, e.user_id, rm);
                }
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), UserProjectionError> {
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
    use stockpile_auth::user::UserCreated;
    use uuid::Uuid;

    #[test]
    fn effective_permissions_resolve_through_policy() {
        let p = UsersProjection::new(Arc::new(InMemoryTenantStore::new()));
        let tenant = TenantId::new();
        let user = UserId::new();

        let ev = UserEvent::Created(UserCreated {
            tenant_id: tenant,
            user_id: user,
            email: "w@example.com".to_string(),
            display_name: "W".to_string(),
            initial_roles: vec![Role::new("warehouse")],
            occurred_at: Utc::now(),
        });
        p.apply_envelope(&EventEnvelope::new(
            Uuid::now_v7(),
            tenant,
            stockpile_core::AggregateId::from(user),
            "auth.user",
            1,
            serde_json::to_value(&ev).unwrap(),
        ))
        .unwrap();

        let eff = p
            .effective_permissions(tenant, &user, |role| match role {
                "warehouse" => vec!["inventory.stock.receive".to_string()],
                _ => vec![],
            })
            .unwrap();
        assert_eq!(eff.permissions, vec!["inventory.stock.receive".to_string()]);
        assert!(!eff.has_wildcard);
    }
}
