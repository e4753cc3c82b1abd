use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use stockpile_core::AggregateId;
use stockpile_inventory::{
    CloseLocation, CreateLocation, Location, LocationCommand, LocationId, RenameLocation,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_location).get(list_locations))
        .route("/:id", get(get_location))
        .route("/:id/rename", post(rename_location))
        .route("/:id/close", post(close_location))
}

fn dispatch_location(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: LocationCommand,
) -> Result<(), axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, "inventory.locations.manage");

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<Location>(
            tenant.tenant_id(),
            agg,
            "inventory.location",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| Location::empty(LocationId::new(aggregate_id)),
        )
        .map(|_| ())
        .map_err(errors::dispatch_error_to_response)
}

pub async fn create_location(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateLocationRequest>,
) -> axum::response::Response {
    let Some(kind) = dto::parse_location_kind(&body.kind) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_kind",
            "kind must be one of: warehouse, store",
        );
    };

    let agg = AggregateId::new();
    let cmd = LocationCommand::CreateLocation(CreateLocation {
        tenant_id: tenant.tenant_id(),
        location_id: LocationId::new(agg),
        kind,
        name: body.name,
        occurred_at: Utc::now(),
    });

    match dispatch_location(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": agg.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_locations(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let locations = services
        .projections
        .locations
        .list(tenant.tenant_id())
        .into_iter()
        .map(dto::location_to_json)
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "locations": locations }))).into_response()
}

pub async fn get_location(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .projections
        .locations
        .get(tenant.tenant_id(), &LocationId::new(agg))
    {
        Some(rm) => (StatusCode::OK, Json(dto::location_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "location not found"),
    }
}

pub async fn rename_location(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RenameLocationRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = LocationCommand::RenameLocation(RenameLocation {
        tenant_id: tenant.tenant_id(),
        location_id: LocationId::new(agg),
        name: body.name,
        occurred_at: Utc::now(),
    });

    match dispatch_location(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn close_location(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = LocationCommand::CloseLocation(CloseLocation {
        tenant_id: tenant.tenant_id(),
        location_id: LocationId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_location(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}
