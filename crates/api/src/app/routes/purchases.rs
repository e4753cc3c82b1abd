use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use stockpile_core::{AggregateId, Money};
use stockpile_inventory::{LocationId, ReceiveStock, StockCommand};
use stockpile_parties::PartyId;
use stockpile_purchasing::{
    AddLine, ApproveOrder, CancelOrder, CreatePurchaseOrder, PurchaseOrder, PurchaseOrderCommand,
    PurchaseOrderId, ReceiptLine, RecordGoodsReceipt, SubmitOrder,
};

use crate::app::routes::common::CmdAuth;
use crate::app::routes::inventory::dispatch_stock;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/submit", post(submit_order))
        .route("/:id/approve", post(approve_order))
        .route("/:id/receipts", post(record_receipt))
        .route("/:id/cancel", post(cancel_order))
}

fn dispatch_po(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: PurchaseOrderCommand,
    permission: &'static str,
) -> Result<Vec<stockpile_infra::event_store::StoredEvent>, axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, permission);

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<PurchaseOrder>(
            tenant.tenant_id(),
            agg,
            "purchasing.order",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| PurchaseOrder::empty(PurchaseOrderId::new(aggregate_id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreatePurchaseOrderRequest>,
) -> axum::response::Response {
    let supplier = match errors::parse_id(&body.supplier_id, "supplier") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let location = match errors::parse_id(&body.location_id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Suspended suppliers cannot take new orders.
    if let Some(supplier_rm) = services
        .projections
        .parties
        .get(tenant.tenant_id(), &PartyId::new(supplier))
    {
        if supplier_rm.status == stockpile_parties::PartyStatus::Suspended {
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invariant_violation",
                "supplier is suspended",
            );
        }
    }

    let agg = AggregateId::new();
    let order_id = PurchaseOrderId::new(agg);

    let create = PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
        tenant_id: tenant.tenant_id(),
        order_id,
        supplier_id: PartyId::new(supplier),
        location_id: LocationId::new(location),
        occurred_at: Utc::now(),
    });
    if let Err(resp) = dispatch_po(&services, &tenant, &principal, agg, create, "purchasing.orders.create")
    {
        return resp;
    }

    for line in body.lines {
        let product = match errors::parse_id(&line.product_id, "product") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let add = PurchaseOrderCommand::AddLine(AddLine {
            tenant_id: tenant.tenant_id(),
            order_id,
            product_id: stockpile_catalog::ProductId::new(product),
            quantity: line.quantity,
            unit_cost: Money::from_minor(line.unit_cost),
            occurred_at: Utc::now(),
        });
        if let Err(resp) =
            dispatch_po(&services, &tenant, &principal, agg, add, "purchasing.orders.create")
        {
            return resp;
        }
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": agg.to_string() })),
    )
        .into_response()
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let orders = services
        .projections
        .purchases
        .list(tenant.tenant_id())
        .into_iter()
        .map(dto::purchase_order_to_json)
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "orders": orders }))).into_response()
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "purchase order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .projections
        .purchases
        .get(tenant.tenant_id(), &PurchaseOrderId::new(agg))
    {
        Some(rm) => (StatusCode::OK, Json(dto::purchase_order_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "purchase order not found"),
    }
}

pub async fn submit_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "purchase order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = PurchaseOrderCommand::SubmitOrder(SubmitOrder {
        tenant_id: tenant.tenant_id(),
        order_id: PurchaseOrderId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_po(&services, &tenant, &principal, agg, cmd, "purchasing.orders.create") {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn approve_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "purchase order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = PurchaseOrderCommand::ApproveOrder(ApproveOrder {
        tenant_id: tenant.tenant_id(),
        order_id: PurchaseOrderId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_po(&services, &tenant, &principal, agg, cmd, "purchasing.orders.approve") {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn record_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordReceiptRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "purchase order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order_id = PurchaseOrderId::new(agg);

    let cmd = PurchaseOrderCommand::RecordGoodsReceipt(RecordGoodsReceipt {
        tenant_id: tenant.tenant_id(),
        order_id,
        lines: body
            .lines
            .iter()
            .map(|l| ReceiptLine {
                line_no: l.line_no,
                quantity: l.quantity,
            })
            .collect(),
        occurred_at: Utc::now(),
    });

    let committed = match dispatch_po(&services, &tenant, &principal, agg, cmd, "purchasing.orders.receive")
    {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Push the received quantities into the stock items.
    let mut pushed = 0usize;
    let mut untracked: Vec<String> = Vec::new();
    for stored in &committed {
        let Ok(ev) =
            serde_json::from_value::<stockpile_purchasing::PurchaseOrderEvent>(stored.payload.clone())
        else {
            continue;
        };
        let stockpile_purchasing::PurchaseOrderEvent::GoodsReceiptRecorded(receipt) = ev else {
            continue;
        };

        for line in receipt.received {
            let Some(item) = services
                .projections
                .stock
                .item_of(tenant.tenant_id(), line.product_id)
            else {
                untracked.push(line.product_id.to_string());
                continue;
            };

            let receive = StockCommand::ReceiveStock(ReceiveStock {
                tenant_id: tenant.tenant_id(),
                item_id: item,
                location_id: receipt.location_id,
                quantity: line.quantity,
                reference: format!("PO {order_id}"),
                occurred_at: Utc::now(),
            });

            match dispatch_stock(
                &services,
                &tenant,
                &principal,
                item.0,
                receive,
                "purchasing.orders.receive",
            ) {
                Ok(_) => pushed += 1,
                Err(_) => {
                    tracing::warn!("received stock for product {} could not be pushed", line.product_id);
                    untracked.push(line.product_id.to_string());
                }
            }
        }
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "stock_updates": pushed,
            "untracked_products": untracked,
        })),
    )
        .into_response()
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "purchase order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = PurchaseOrderCommand::CancelOrder(CancelOrder {
        tenant_id: tenant.tenant_id(),
        order_id: PurchaseOrderId::new(agg),
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    match dispatch_po(&services, &tenant, &principal, agg, cmd, "purchasing.orders.create") {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}
