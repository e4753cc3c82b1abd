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
use stockpile_sales::{
    CompleteDelivery, Delivery, DeliveryCommand, DeliveryId, FailDelivery, MarkDelivered,
    RetryDelivery, SalesOrder, SalesOrderCommand, SalesOrderId, StartDelivery,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_delivery))
        .route("/:id/start", post(start_delivery))
        .route("/:id/complete", post(complete_delivery))
        .route("/:id/fail", post(fail_delivery))
        .route("/:id/retry", post(retry_delivery))
}

fn dispatch_delivery(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: DeliveryCommand,
) -> Result<(), axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, "deliveries.manage");

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<Delivery>(
            tenant.tenant_id(),
            agg,
            "sales.delivery",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| Delivery::empty(DeliveryId::new(aggregate_id)),
        )
        .map(|_| ())
        .map_err(errors::dispatch_error_to_response)
}

pub async fn get_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "delivery") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .projections
        .deliveries
        .get(tenant.tenant_id(), &DeliveryId::new(agg))
    {
        Some(rm) => (StatusCode::OK, Json(dto::delivery_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "delivery not found"),
    }
}

pub async fn start_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::StartDeliveryRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "delivery") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = DeliveryCommand::StartDelivery(StartDelivery {
        tenant_id: tenant.tenant_id(),
        delivery_id: DeliveryId::new(agg),
        carrier: body.carrier,
        tracking_ref: body.tracking_ref,
        occurred_at: Utc::now(),
    });

    match dispatch_delivery(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

/// Completing a delivery also marks the owning order delivered.
pub async fn complete_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "delivery") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let delivery_id = DeliveryId::new(agg);

    let order_id = services
        .projections
        .deliveries
        .get(tenant.tenant_id(), &delivery_id)
        .map(|rm| rm.sales_order_id);

    let cmd = DeliveryCommand::CompleteDelivery(CompleteDelivery {
        tenant_id: tenant.tenant_id(),
        delivery_id,
        occurred_at: Utc::now(),
    });
    if let Err(resp) = dispatch_delivery(&services, &tenant, &principal, agg, cmd) {
        return resp;
    }

    if let Some(order_id) = order_id {
        let mark = SalesOrderCommand::MarkDelivered(MarkDelivered {
            tenant_id: tenant.tenant_id(),
            order_id,
            occurred_at: Utc::now(),
        });
        let cmd_auth = CmdAuth::new(mark, "deliveries.manage");
        if crate::authz::authorize_command(&tenant, &principal, &cmd_auth).is_ok() {
            if let Err(e) = services.dispatch::<SalesOrder>(
                tenant.tenant_id(),
                order_id.0,
                "sales.order",
                cmd_auth.inner,
                |_tenant_id, aggregate_id| SalesOrder::empty(SalesOrderId::new(aggregate_id)),
            ) {
                tracing::warn!("delivery completed but order update failed: {e:?}");
            }
        }
    }

    (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response()
}

pub async fn fail_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::FailDeliveryRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "delivery") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = DeliveryCommand::FailDelivery(FailDelivery {
        tenant_id: tenant.tenant_id(),
        delivery_id: DeliveryId::new(agg),
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    match dispatch_delivery(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn retry_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::StartDeliveryRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "delivery") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = DeliveryCommand::RetryDelivery(RetryDelivery {
        tenant_id: tenant.tenant_id(),
        delivery_id: DeliveryId::new(agg),
        carrier: body.carrier,
        tracking_ref: body.tracking_ref,
        occurred_at: Utc::now(),
    });

    match dispatch_delivery(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}
