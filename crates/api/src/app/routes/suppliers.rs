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
use stockpile_parties::{
    Party, PartyCommand, PartyId, PartyKind, ReactivateParty, RegisterParty, SuspendParty,
    UpdateDetails,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

const PERMISSION: &str = "parties.suppliers.manage";

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_supplier).get(list_suppliers))
        .route("/:id", get(get_supplier).patch(update_supplier))
        .route("/:id/suspend", post(suspend_supplier))
        .route("/:id/reactivate", post(reactivate_supplier))
}

fn dispatch_supplier(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: PartyCommand,
) -> Result<(), axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, PERMISSION);

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<Party>(
            tenant.tenant_id(),
            agg,
            "parties.party",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| Party::empty(PartyId::new(aggregate_id)),
        )
        .map(|_| ())
        .map_err(errors::dispatch_error_to_response)
}

/// Guard: the addressed party must exist and be a supplier.
fn require_supplier(
    services: &AppServices,
    tenant: &TenantContext,
    party_id: PartyId,
) -> Result<(), axum::response::Response> {
    match services.projections.parties.get(tenant.tenant_id(), &party_id) {
        Some(rm) if rm.kind == PartyKind::Supplier => Ok(()),
        _ => Err(errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "supplier not found",
        )),
    }
}

pub async fn register_supplier(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::RegisterPartyRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();
    let cmd = PartyCommand::RegisterParty(RegisterParty {
        tenant_id: tenant.tenant_id(),
        party_id: PartyId::new(agg),
        kind: PartyKind::Supplier,
        name: body.name,
        contact: body.contact,
        occurred_at: Utc::now(),
    });

    match dispatch_supplier(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": agg.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_suppliers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let suppliers = services
        .projections
        .parties
        .list(tenant.tenant_id(), Some(PartyKind::Supplier))
        .into_iter()
        .map(dto::party_to_json)
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "suppliers": suppliers }))).into_response()
}

pub async fn get_supplier(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "supplier") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let party_id = PartyId::new(agg);

    if let Err(resp) = require_supplier(&services, &tenant, party_id) {
        return resp;
    }

    match services.projections.parties.get(tenant.tenant_id(), &party_id) {
        Some(rm) => (StatusCode::OK, Json(dto::party_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "supplier not found"),
    }
}

pub async fn update_supplier(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdatePartyRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "supplier") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let party_id = PartyId::new(agg);

    if let Err(resp) = require_supplier(&services, &tenant, party_id) {
        return resp;
    }

    let cmd = PartyCommand::UpdateDetails(UpdateDetails {
        tenant_id: tenant.tenant_id(),
        party_id,
        name: body.name,
        contact: body.contact,
        occurred_at: Utc::now(),
    });

    match dispatch_supplier(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn suspend_supplier(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SuspendRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "supplier") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let party_id = PartyId::new(agg);

    if let Err(resp) = require_supplier(&services, &tenant, party_id) {
        return resp;
    }

    let cmd = PartyCommand::SuspendParty(SuspendParty {
        tenant_id: tenant.tenant_id(),
        party_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    match dispatch_supplier(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn reactivate_supplier(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "supplier") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let party_id = PartyId::new(agg);

    if let Err(resp) = require_supplier(&services, &tenant, party_id) {
        return resp;
    }

    let cmd = PartyCommand::ReactivateParty(ReactivateParty {
        tenant_id: tenant.tenant_id(),
        party_id,
        occurred_at: Utc::now(),
    });

    match dispatch_supplier(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}
