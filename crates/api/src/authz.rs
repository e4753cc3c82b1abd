//! API-side authorization guard for commands.
//!
//! Enforces authorization at the command boundary (before dispatch), while
//! keeping domain aggregates and infra auth-agnostic. Reads are tenant-
//! scoped but not permission-gated.

use stockpile_auth::{
    AuthzError, CommandAuthorization, Permission, Principal, TenantMembership, authorize,
};

use crate::context::{PrincipalContext, TenantContext};

/// Check authorization for a command in the current request context.
///
/// This is intended to be called **before** dispatching a command.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let membership = TenantMembership {
        tenant_id: tenant.tenant_id(),
        roles: principal.roles().to_vec(),
        permissions: permissions_from_roles(principal.roles()),
    };

    let principal = Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership,
    };

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

/// Fixed retail role→permission policy.
///
/// Kept in code until a policy store exists. Reads are not listed here;
/// only command permissions are enforced.
pub fn permissions_from_roles(roles: &[stockpile_auth::Role]) -> Vec<Permission> {
    let mut perms: Vec<Permission> = Vec::new();

    for role in roles {
        match role.as_str() {
            // Admin gets everything in the current tenant.
            "admin" => return vec![Permission::new("*")],
            "manager" => {
                perms.extend(
                    [
                        "catalog.products.create",
                        "catalog.products.manage",
                        "inventory.locations.manage",
                        "inventory.stock.track",
                        "inventory.stock.adjust",
                        "inventory.stock.transfer",
                        "inventory.stock.manage",
                        "inventory.takes.manage",
                        "purchasing.orders.create",
                        "purchasing.orders.approve",
                        "sales.orders.create",
                        "sales.orders.confirm",
                        "sales.orders.payment",
                        "sales.orders.cancel",
                        "coupons.manage",
                        "parties.customers.manage",
                        "parties.suppliers.manage",
                        "settings.manage",
                    ]
                    .map(Permission::new),
                );
            }
            "cashier" => {
                perms.extend(
                    [
                        "sales.orders.create",
                        "sales.orders.confirm",
                        "sales.orders.payment",
                        "parties.customers.manage",
                    ]
                    .map(Permission::new),
                );
            }
            "warehouse" => {
                perms.extend(
                    [
                        "inventory.stock.track",
                        "inventory.stock.receive",
                        "inventory.stock.adjust",
                        "inventory.stock.transfer",
                        "inventory.stock.manage",
                        "inventory.takes.manage",
                        "inventory.serials.manage",
                        "purchasing.orders.receive",
                        "sales.orders.dispatch",
                        "deliveries.manage",
                    ]
                    .map(Permission::new),
                );
            }
            _ => {}
        }
    }

    perms
}

/// Role→permission mapping as plain strings (used by admin views).
pub fn role_permission_strings(role: &str) -> Vec<String> {
    permissions_from_roles(&[stockpile_auth::Role::new(role.to_string())])
        .into_iter()
        .map(|p| p.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_auth::{PrincipalId, Role};
    use stockpile_core::TenantId;

    struct TestCmd {
        required: Vec<Permission>,
    }

    impl CommandAuthorization for TestCmd {
        fn required_permissions(&self) -> &[Permission] {
            &self.required
        }
    }

    fn ctx(roles: Vec<Role>) -> (TenantContext, PrincipalContext) {
        (
            TenantContext::new(TenantId::new()),
            PrincipalContext::new(PrincipalId::new(), roles),
        )
    }

    #[test]
    fn admin_passes_any_command() {
        let (tenant, principal) = ctx(vec![Role::new("admin")]);
        let cmd = TestCmd {
            required: vec![Permission::new("settings.manage")],
        };
        assert!(authorize_command(&tenant, &principal, &cmd).is_ok());
    }

    #[test]
    fn cashier_cannot_adjust_stock() {
        let (tenant, principal) = ctx(vec![Role::new("cashier")]);
        let cmd = TestCmd {
            required: vec![Permission::new("inventory.stock.adjust")],
        };
        assert!(authorize_command(&tenant, &principal, &cmd).is_err());
    }

    #[test]
    fn warehouse_can_receive_purchases() {
        let (tenant, principal) = ctx(vec![Role::new("warehouse")]);
        let cmd = TestCmd {
            required: vec![Permission::new("purchasing.orders.receive")],
        };
        assert!(authorize_command(&tenant, &principal, &cmd).is_ok());
    }

    #[test]
    fn roles_accumulate() {
        let (tenant, principal) = ctx(vec![Role::new("cashier"), Role::new("warehouse")]);
        for perm in ["sales.orders.payment", "inventory.stock.receive"] {
            let cmd = TestCmd {
                required: vec![Permission::new(perm)],
            };
            assert!(authorize_command(&tenant, &principal, &cmd).is_ok());
        }
    }
}
