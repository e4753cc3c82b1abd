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
    AdjustStock, AdjustmentReason, CancelStockTake, LocationId, OpenStockTake, PostStockTake,
    RecordCount, StockCommand, StockTake, StockTakeCommand, StockTakeId,
};

use crate::app::routes::common::CmdAuth;
use crate::app::routes::inventory::dispatch_stock;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_take))
        .route("/:id", get(get_take))
        .route("/:id/counts", post(record_count))
        .route("/:id/post", post(post_take))
        .route("/:id/cancel", post(cancel_take))
}

fn dispatch_take(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: StockTakeCommand,
) -> Result<Vec<stockpile_infra::event_store::StoredEvent>, axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, "inventory.takes.manage");

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<StockTake>(
            tenant.tenant_id(),
            agg,
            "inventory.stock_take",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| StockTake::empty(StockTakeId::new(aggregate_id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

pub async fn open_take(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::OpenStockTakeRequest>,
) -> axum::response::Response {
    let location = match errors::parse_id(&body.location_id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let agg = AggregateId::new();
    let cmd = StockTakeCommand::OpenStockTake(OpenStockTake {
        tenant_id: tenant.tenant_id(),
        take_id: StockTakeId::new(agg),
        location_id: LocationId::new(location),
        occurred_at: Utc::now(),
    });

    match dispatch_take(&services, &tenant, &principal, agg, cmd) {
        Ok(_) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": agg.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_take(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "stock take") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .projections
        .stock_takes
        .get(tenant.tenant_id(), &StockTakeId::new(agg))
    {
        Some(rm) => (StatusCode::OK, Json(dto::stock_take_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "stock take not found"),
    }
}

pub async fn record_count(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordCountRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "stock take") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product_agg = match errors::parse_id(&body.product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product_id = stockpile_catalog::ProductId::new(product_agg);

    // Expected quantity comes from the stock read model at counting time.
    let Some(take) = services
        .projections
        .stock_takes
        .get(tenant.tenant_id(), &StockTakeId::new(agg))
    else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "stock take not found");
    };
    let expected_qty = services
        .projections
        .stock
        .item_of(tenant.tenant_id(), product_id)
        .and_then(|item| {
            services
                .projections
                .stock
                .get(tenant.tenant_id(), item, take.location_id)
        })
        .map(|row| row.on_hand)
        .unwrap_or(0);

    let cmd = StockTakeCommand::RecordCount(RecordCount {
        tenant_id: tenant.tenant_id(),
        take_id: StockTakeId::new(agg),
        product_id,
        counted_qty: body.counted_qty,
        expected_qty,
        occurred_at: Utc::now(),
    });

    match dispatch_take(&services, &tenant, &principal, agg, cmd) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "expected_qty": expected_qty,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn post_take(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "stock take") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = StockTakeCommand::PostStockTake(PostStockTake {
        tenant_id: tenant.tenant_id(),
        take_id: StockTakeId::new(agg),
        occurred_at: Utc::now(),
    });

    let committed = match dispatch_take(&services, &tenant, &principal, agg, cmd) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Apply the posted variances to the stock items (reason: stock take).
    let mut applied = 0usize;
    let mut skipped: Vec<String> = Vec::new();
    for stored in &committed {
        let Ok(ev) =
            serde_json::from_value::<stockpile_inventory::StockTakeEvent>(stored.payload.clone())
        else {
            continue;
        };
        let stockpile_inventory::StockTakeEvent::StockTakePosted(posted) = ev else {
            continue;
        };

        for variance in posted.variances {
            let Some(item) = services
                .projections
                .stock
                .item_of(tenant.tenant_id(), variance.product_id)
            else {
                skipped.push(variance.product_id.to_string());
                continue;
            };

            let adjust = StockCommand::AdjustStock(AdjustStock {
                tenant_id: tenant.tenant_id(),
                item_id: item,
                location_id: posted.location_id,
                delta: variance.delta,
                reason: AdjustmentReason::StockTake,
                occurred_at: Utc::now(),
            });

            match dispatch_stock(
                &services,
                &tenant,
                &principal,
                item.0,
                adjust,
                "inventory.takes.manage",
            ) {
                Ok(_) => applied += 1,
                Err(_) => {
                    tracing::warn!(
                        "stock take variance for product {} could not be applied",
                        variance.product_id
                    );
                    skipped.push(variance.product_id.to_string());
                }
            }
        }
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "variances_applied": applied,
            "variances_skipped": skipped,
        })),
    )
        .into_response()
}

pub async fn cancel_take(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "stock take") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = StockTakeCommand::CancelStockTake(CancelStockTake {
        tenant_id: tenant.tenant_id(),
        take_id: StockTakeId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_take(&services, &tenant, &principal, agg, cmd) {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}
