use std::collections::HashSet;

use thiserror::Error;

use stockpile_core::TenantId;

use crate::{Permission, PrincipalId, TenantMembership};

/// A fully resolved principal for authorization decisions.
///
/// Construction of this object is intentionally decoupled from storage and
/// transport: API/workers can derive memberships from claims and a policy source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Command-side authorization contract (checked at the command boundary).
///
/// Implement this on commands that require permissions.
/// The API layer should enforce these requirements before dispatching.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Authorize a principal within its active tenant context.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let perms: HashSet<&str> = principal
        .membership
        .permissions
        .iter()
        .map(|p| p.as_str())
        .collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    fn principal(tenant: TenantId, perms: Vec<Permission>) -> Principal {
        Principal {
            principal_id: PrincipalId::new(),
            active_tenant_id: tenant,
            membership: TenantMembership {
                tenant_id: tenant,
                roles: vec![Role::new("cashier")],
                permissions: perms,
            },
        }
    }

    #[test]
    fn wildcard_grants_everything() {
        let p = principal(TenantId::new(), vec![Permission::new("*")]);
        assert!(authorize(&p, &Permission::new("sales.orders.create")).is_ok());
    }

    #[test]
    fn explicit_permission_grants() {
        let p = principal(TenantId::new(), vec![Permission::new("sales.orders.create")]);
        assert!(authorize(&p, &Permission::new("sales.orders.create")).is_ok());
        assert!(matches!(
            authorize(&p, &Permission::new("inventory.stock.adjust")),
            Err(AuthzError::Forbidden(_))
        ));
    }

    #[test]
    fn tenant_mismatch_is_rejected() {
        let mut p = principal(TenantId::new(), vec![Permission::new("*")]);
        p.active_tenant_id = TenantId::new();
        assert_eq!(
            authorize(&p, &Permission::new("sales.orders.create")),
            Err(AuthzError::TenantMismatch)
        );
    }
}
