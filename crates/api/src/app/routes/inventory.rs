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
    AdjustStock, LocationId, ReceiveStock, SetReorderPoint, StockCommand, StockItem, StockItemId,
    TrackProduct, TransferStock,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .nest("/takes", super::stock_takes::router())
        .nest("/serials", super::serials::router())
        .route("/items", post(track_product))
        .route("/items/:id", get(get_item))
        .route("/items/:id/receive", post(receive_stock))
        .route("/items/:id/adjust", post(adjust_stock))
        .route("/items/:id/transfer", post(transfer_stock))
        .route("/items/:id/reorder-point", post(set_reorder_point))
        .route("/stock", get(list_stock))
        .route("/alerts", get(low_stock_alerts))
}

pub(crate) fn dispatch_stock(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: StockCommand,
    permission: &'static str,
) -> Result<Vec<stockpile_infra::event_store::StoredEvent>, axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, permission);

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<StockItem>(
            tenant.tenant_id(),
            agg,
            "inventory.stock",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| StockItem::empty(StockItemId::new(aggregate_id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

pub async fn track_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::TrackProductRequest>,
) -> axum::response::Response {
    let product_agg = match errors::parse_id(&body.product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product_id = stockpile_catalog::ProductId::new(product_agg);

    // One stock stream per product.
    if let Some(existing) = services
        .projections
        .stock
        .item_of(tenant.tenant_id(), product_id)
    {
        return errors::json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("product already tracked as item {existing}"),
        );
    }

    let agg = AggregateId::new();
    let cmd = StockCommand::TrackProduct(TrackProduct {
        tenant_id: tenant.tenant_id(),
        item_id: StockItemId::new(agg),
        product_id,
        occurred_at: Utc::now(),
    });

    match dispatch_stock(&services, &tenant, &principal, agg, cmd, "inventory.stock.track") {
        Ok(committed) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "product_id": product_id.0.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "item") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let item_id = StockItemId::new(agg);

    let rows = services
        .projections
        .stock
        .list_item(tenant.tenant_id(), item_id);
    if rows.is_empty() && services.projections.stock.product_of(tenant.tenant_id(), item_id).is_none() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "item not found");
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "item_id": agg.to_string(),
            "product_id": services
                .projections
                .stock
                .product_of(tenant.tenant_id(), item_id)
                .map(|p| p.0.to_string()),
            "buckets": rows.into_iter().map(dto::stock_row_to_json).collect::<Vec<_>>(),
        })),
    )
        .into_response()
}

pub async fn list_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let rows = services
        .projections
        .stock
        .list(tenant.tenant_id())
        .into_iter()
        .map(dto::stock_row_to_json)
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "stock": rows }))).into_response()
}

pub async fn receive_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReceiveStockRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "item") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let location = match errors::parse_id(&body.location_id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = StockCommand::ReceiveStock(ReceiveStock {
        tenant_id: tenant.tenant_id(),
        item_id: StockItemId::new(agg),
        location_id: LocationId::new(location),
        quantity: body.quantity,
        reference: body.reference.unwrap_or_else(|| "manual".to_string()),
        occurred_at: Utc::now(),
    });

    match dispatch_stock(&services, &tenant, &principal, agg, cmd, "inventory.stock.receive") {
        Ok(committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": committed.len(),
                "stream_version": committed.last().map(|e| e.sequence_number).unwrap_or(0),
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AdjustStockRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "item") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let location = match errors::parse_id(&body.location_id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(reason) = dto::parse_adjustment_reason(&body.reason) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_reason",
            "reason must be one of: recount, damage, loss, correction, stock_take",
        );
    };

    let cmd = StockCommand::AdjustStock(AdjustStock {
        tenant_id: tenant.tenant_id(),
        item_id: StockItemId::new(agg),
        location_id: LocationId::new(location),
        delta: body.delta,
        reason,
        occurred_at: Utc::now(),
    });

    match dispatch_stock(&services, &tenant, &principal, agg, cmd, "inventory.stock.adjust") {
        Ok(committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": committed.len(),
                "stream_version": committed.last().map(|e| e.sequence_number).unwrap_or(0),
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn transfer_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::TransferStockRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "item") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let from = match errors::parse_id(&body.from, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to = match errors::parse_id(&body.to, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = StockCommand::TransferStock(TransferStock {
        tenant_id: tenant.tenant_id(),
        item_id: StockItemId::new(agg),
        from: LocationId::new(from),
        to: LocationId::new(to),
        quantity: body.quantity,
        occurred_at: Utc::now(),
    });

    match dispatch_stock(&services, &tenant, &principal, agg, cmd, "inventory.stock.transfer") {
        Ok(committed) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn set_reorder_point(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReorderPointRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "item") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let location = match errors::parse_id(&body.location_id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = StockCommand::SetReorderPoint(SetReorderPoint {
        tenant_id: tenant.tenant_id(),
        item_id: StockItemId::new(agg),
        location_id: LocationId::new(location),
        quantity: body.quantity,
        occurred_at: Utc::now(),
    });

    match dispatch_stock(&services, &tenant, &principal, agg, cmd, "inventory.stock.manage") {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn low_stock_alerts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let report = services.alert_sink().latest_for(tenant.tenant_id());

    let (fired, alerts) = match &report {
        Some(r) => (
            r.fired,
            r.metadata
                .get("alerts")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
        ),
        None => (0, vec![]),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "kind": "low_stock",
            "fired": fired,
            "alerts": alerts,
        })),
    )
        .into_response()
}
