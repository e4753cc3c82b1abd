use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::Utc;

use stockpile_auth::{
    Role, User, UserCommand, UserId,
    user::{ActivateUser, AssignRole, CreateUser, RevokeRole, SuspendUser},
};
use stockpile_core::AggregateId;

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route("/users/:id", get(get_user))
        .route("/users/:id/roles", post(assign_role))
        .route("/users/:id/roles/:role", delete(revoke_role))
        .route("/users/:id/suspend", post(suspend_user))
        .route("/users/:id/activate", post(activate_user))
        .route("/users/:id/permissions", get(user_permissions))
}

fn dispatch_user(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    user_id: UserId,
    cmd: UserCommand,
) -> Result<(), axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, "admin.users.manage");

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<User>(
            tenant.tenant_id(),
            AggregateId::from(user_id),
            "auth.user",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| User::empty(UserId::from(aggregate_id)),
        )
        .map(|_| ())
        .map_err(errors::dispatch_error_to_response)
}

pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateUserRequest>,
) -> axum::response::Response {
    let user_id = UserId::new();
    let cmd = UserCommand::Create(CreateUser {
        tenant_id: tenant.tenant_id(),
        user_id,
        email: body.email,
        display_name: body.display_name,
        initial_roles: body.roles.into_iter().map(Role::new).collect(),
        occurred_at: Utc::now(),
    });

    match dispatch_user(&services, &tenant, &principal, user_id, cmd) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": user_id.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let users = services
        .projections
        .users
        .list(tenant.tenant_id())
        .into_iter()
        .map(dto::user_to_json)
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "users": users }))).into_response()
}

fn parse_user_id(id: &str) -> Result<UserId, axum::response::Response> {
    errors::parse_id(id, "user").map(UserId::from)
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let user_id = match parse_user_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.projections.users.get(tenant.tenant_id(), &user_id) {
        Some(rm) => (StatusCode::OK, Json(dto::user_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
    }
}

pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AssignRoleRequest>,
) -> axum::response::Response {
    let user_id = match parse_user_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = UserCommand::AssignRole(AssignRole {
        tenant_id: tenant.tenant_id(),
        user_id,
        role: Role::new(body.role),
        actor_roles: principal.roles().to_vec(),
        occurred_at: Utc::now(),
    });

    match dispatch_user(&services, &tenant, &principal, user_id, cmd) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": user_id.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, role)): Path<(String, String)>,
) -> axum::response::Response {
    let user_id = match parse_user_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = UserCommand::RevokeRole(RevokeRole {
        tenant_id: tenant.tenant_id(),
        user_id,
        role: Role::new(role),
        occurred_at: Utc::now(),
    });

    match dispatch_user(&services, &tenant, &principal, user_id, cmd) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": user_id.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn suspend_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SuspendUserRequest>,
) -> axum::response::Response {
    let user_id = match parse_user_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = UserCommand::Suspend(SuspendUser {
        tenant_id: tenant.tenant_id(),
        user_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    match dispatch_user(&services, &tenant, &principal, user_id, cmd) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": user_id.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn activate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let user_id = match parse_user_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = UserCommand::Activate(ActivateUser {
        tenant_id: tenant.tenant_id(),
        user_id,
        occurred_at: Utc::now(),
    });

    match dispatch_user(&services, &tenant, &principal, user_id, cmd) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": user_id.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn user_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let user_id = match parse_user_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.projections.users.effective_permissions(
        tenant.tenant_id(),
        &user_id,
        crate::authz::role_permission_strings,
    ) {
        Some(eff) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "user_id": eff.user_id.to_string(),
                "roles": eff.roles,
                "permissions": eff.permissions,
                "has_wildcard": eff.has_wildcard,
            })),
        )
            .into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
    }
}
