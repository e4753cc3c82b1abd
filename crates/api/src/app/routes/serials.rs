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
    AcceptReturn, LocationId, MarkSold, PutInStock, RegisterSerial, ReserveSerial, RestockSerial,
    ScrapSerial, SerialCommand, SerialUnit, SerialUnitId,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_serial))
        .route("/:id", get(get_serial))
        .route("/:id/stock", post(put_in_stock))
        .route("/:id/reserve", post(reserve_serial))
        .route("/:id/sell", post(mark_sold))
        .route("/:id/return", post(accept_return))
        .route("/:id/restock", post(restock_serial))
        .route("/:id/scrap", post(scrap_serial))
}

fn dispatch_serial(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: SerialCommand,
) -> Result<(), axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, "inventory.serials.manage");

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<SerialUnit>(
            tenant.tenant_id(),
            agg,
            "inventory.serial",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| SerialUnit::empty(SerialUnitId::new(aggregate_id)),
        )
        .map(|_| ())
        .map_err(errors::dispatch_error_to_response)
}

fn ok_response(agg: AggregateId) -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response()
}

pub async fn register_serial(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::RegisterSerialRequest>,
) -> axum::response::Response {
    let product = match errors::parse_id(&body.product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let location = match errors::parse_id(&body.location_id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let agg = AggregateId::new();
    let cmd = SerialCommand::RegisterSerial(RegisterSerial {
        tenant_id: tenant.tenant_id(),
        unit_id: SerialUnitId::new(agg),
        serial_no: body.serial_no,
        product_id: stockpile_catalog::ProductId::new(product),
        location_id: LocationId::new(location),
        occurred_at: Utc::now(),
    });

    match dispatch_serial(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": agg.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_serial(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "serial unit") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .projections
        .serials
        .get(tenant.tenant_id(), &SerialUnitId::new(agg))
    {
        Some(rm) => (StatusCode::OK, Json(dto::serial_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "serial unit not found"),
    }
}

pub async fn put_in_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "serial unit") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SerialCommand::PutInStock(PutInStock {
        tenant_id: tenant.tenant_id(),
        unit_id: SerialUnitId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_serial(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => ok_response(agg),
        Err(resp) => resp,
    }
}

pub async fn reserve_serial(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReserveSerialRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "serial unit") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order = match errors::parse_id(&body.sales_order_id, "sales order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SerialCommand::ReserveSerial(ReserveSerial {
        tenant_id: tenant.tenant_id(),
        unit_id: SerialUnitId::new(agg),
        order_ref: order,
        occurred_at: Utc::now(),
    });

    match dispatch_serial(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => ok_response(agg),
        Err(resp) => resp,
    }
}

pub async fn mark_sold(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "serial unit") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SerialCommand::MarkSold(MarkSold {
        tenant_id: tenant.tenant_id(),
        unit_id: SerialUnitId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_serial(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => ok_response(agg),
        Err(resp) => resp,
    }
}

pub async fn accept_return(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "serial unit") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SerialCommand::AcceptReturn(AcceptReturn {
        tenant_id: tenant.tenant_id(),
        unit_id: SerialUnitId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_serial(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => ok_response(agg),
        Err(resp) => resp,
    }
}

pub async fn restock_serial(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "serial unit") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SerialCommand::RestockSerial(RestockSerial {
        tenant_id: tenant.tenant_id(),
        unit_id: SerialUnitId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_serial(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => ok_response(agg),
        Err(resp) => resp,
    }
}

pub async fn scrap_serial(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ScrapSerialRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "serial unit") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SerialCommand::ScrapSerial(ScrapSerial {
        tenant_id: tenant.tenant_id(),
        unit_id: SerialUnitId::new(agg),
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    match dispatch_serial(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => ok_response(agg),
        Err(resp) => resp,
    }
}
