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
use stockpile_coupons::{Coupon, CouponCommand, CouponId, RedeemCoupon};
use stockpile_inventory::{
    CommitReservation, ReleaseReservation, ReserveStock, StockCommand, StockItemId,
};
use stockpile_parties::PartyId;
use stockpile_sales::{
    AddLine, CancelOrder, ConfirmOrder, CreateSalesOrder, Delivery, DeliveryCommand, DeliveryId,
    DispatchOrder, MarkPaid, RegisterPayment, RemoveLine, SalesOrder, SalesOrderCommand,
    SalesOrderId, ScheduleDelivery,
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
        .route("/:id/lines", post(add_line))
        .route("/:id/lines/:line_no", axum::routing::delete(remove_line))
        .route("/:id/confirm", post(confirm_order))
        .route("/:id/payments", post(register_payment))
        .route("/:id/mark-paid", post(mark_paid))
        .route("/:id/dispatch", post(dispatch_order))
        .route("/:id/cancel", post(cancel_order))
}

fn dispatch_sales(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: SalesOrderCommand,
    permission: &'static str,
) -> Result<Vec<stockpile_infra::event_store::StoredEvent>, axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, permission);

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<SalesOrder>(
            tenant.tenant_id(),
            agg,
            "sales.order",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| SalesOrder::empty(SalesOrderId::new(aggregate_id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

/// Reservations held by an order, resolved through the stock read model.
fn order_reservations(
    services: &AppServices,
    tenant: &TenantContext,
    order: &stockpile_infra::projections::sales_orders::SalesOrderReadModel,
) -> Vec<(StockItemId, i64)> {
    order
        .lines
        .iter()
        .filter_map(|line| {
            services
                .projections
                .stock
                .item_of(tenant.tenant_id(), line.product_id)
                .map(|item| (item, line.quantity))
        })
        .collect()
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateSalesOrderRequest>,
) -> axum::response::Response {
    let customer = match errors::parse_id(&body.customer_id, "customer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Suspended customers cannot open new orders.
    if let Some(customer_rm) = services
        .projections
        .parties
        .get(tenant.tenant_id(), &PartyId::new(customer))
    {
        if customer_rm.status == stockpile_parties::PartyStatus::Suspended {
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invariant_violation",
                "customer is suspended",
            );
        }
    }

    let agg = AggregateId::new();
    let cmd = SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
        tenant_id: tenant.tenant_id(),
        order_id: SalesOrderId::new(agg),
        customer_id: PartyId::new(customer),
        occurred_at: Utc::now(),
    });

    match dispatch_sales(&services, &tenant, &principal, agg, cmd, "sales.orders.create") {
        Ok(_) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": agg.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let orders = services
        .projections
        .sales
        .list(tenant.tenant_id())
        .into_iter()
        .map(dto::sales_order_to_json)
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "orders": orders }))).into_response()
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "sales order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .projections
        .sales
        .get(tenant.tenant_id(), &SalesOrderId::new(agg))
    {
        Some(rm) => (StatusCode::OK, Json(dto::sales_order_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "sales order not found"),
    }
}

pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SalesOrderLineRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "sales order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product = match errors::parse_id(&body.product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product_id = stockpile_catalog::ProductId::new(product);

    // Only active catalog products can be sold.
    match services
        .projections
        .catalog
        .get(tenant.tenant_id(), &product_id)
    {
        Some(p) if p.status == stockpile_catalog::ProductStatus::Active => {}
        Some(_) => {
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invariant_violation",
                "product is not active",
            );
        }
        None => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found");
        }
    }

    let cmd = SalesOrderCommand::AddLine(AddLine {
        tenant_id: tenant.tenant_id(),
        order_id: SalesOrderId::new(agg),
        product_id,
        quantity: body.quantity,
        unit_price: Money::from_minor(body.unit_price),
        occurred_at: Utc::now(),
    });

    match dispatch_sales(&services, &tenant, &principal, agg, cmd, "sales.orders.create") {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn remove_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, line_no)): Path<(String, u32)>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "sales order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SalesOrderCommand::RemoveLine(RemoveLine {
        tenant_id: tenant.tenant_id(),
        order_id: SalesOrderId::new(agg),
        line_no,
        occurred_at: Utc::now(),
    });

    match dispatch_sales(&services, &tenant, &principal, agg, cmd, "sales.orders.create") {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

/// Confirm flow: reserve stock for every line, then redeem the coupon (if
/// any), then freeze the order. Reservations are rolled back if a later
/// step fails; a consumed redemption on a failed confirm is surfaced as an
/// error and logged.
pub async fn confirm_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ConfirmOrderRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "sales order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order_id = SalesOrderId::new(agg);
    let location = match errors::parse_id(&body.location_id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let location_id = stockpile_inventory::LocationId::new(location);

    let Some(order) = services.projections.sales.get(tenant.tenant_id(), &order_id) else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "sales order not found");
    };
    if order.lines.is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "cannot confirm order without lines",
        );
    }

    let subtotal = order
        .lines
        .iter()
        .fold(Money::ZERO, |acc, l| {
            acc.add(Money::from_minor(l.unit_price.minor() * l.quantity as u64))
                .unwrap_or(acc)
        });

    // 1) Reserve stock for every line; roll back on the first failure.
    let mut reserved: Vec<StockItemId> = Vec::new();
    for line in &order.lines {
        let Some(item) = services
            .projections
            .stock
            .item_of(tenant.tenant_id(), line.product_id)
        else {
            release_reservations(&services, &tenant, &principal, agg, &reserved);
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invariant_violation",
                format!("product {} is not stock-tracked", line.product_id),
            );
        };

        let reserve = StockCommand::ReserveStock(ReserveStock {
            tenant_id: tenant.tenant_id(),
            item_id: item,
            location_id,
            quantity: line.quantity,
            order_ref: agg,
            occurred_at: Utc::now(),
        });
        match dispatch_stock(&services, &tenant, &principal, item.0, reserve, "sales.orders.confirm")
        {
            Ok(_) => reserved.push(item),
            Err(resp) => {
                release_reservations(&services, &tenant, &principal, agg, &reserved);
                return resp;
            }
        }
    }

    // 2) Redeem the coupon against the authoritative aggregate.
    let mut discount = Money::ZERO;
    if let Some(code) = &body.coupon_code {
        let Some(coupon) = services
            .projections
            .coupons
            .get_by_code(tenant.tenant_id(), code)
        else {
            release_reservations(&services, &tenant, &principal, agg, &reserved);
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "coupon not found");
        };

        let redeem = CouponCommand::RedeemCoupon(RedeemCoupon {
            tenant_id: tenant.tenant_id(),
            coupon_id: coupon.coupon_id,
            customer_id: order.customer_id,
            order_ref: agg,
            subtotal,
            occurred_at: Utc::now(),
        });
        let cmd_auth = CmdAuth::new(redeem, "sales.orders.confirm");
        if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
            release_reservations(&services, &tenant, &principal, agg, &reserved);
            return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
        }

        let committed = match services.dispatch::<Coupon>(
            tenant.tenant_id(),
            coupon.coupon_id.0,
            "coupons.coupon",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| Coupon::empty(CouponId::new(aggregate_id)),
        ) {
            Ok(c) => c,
            Err(e) => {
                release_reservations(&services, &tenant, &principal, agg, &reserved);
                return errors::dispatch_error_to_response(e);
            }
        };

        for stored in &committed {
            if let Ok(stockpile_coupons::CouponEvent::CouponRedeemed(e)) =
                serde_json::from_value(stored.payload.clone())
            {
                discount = e.discount;
            }
        }
    }

    // 3) Freeze the order.
    let confirm = SalesOrderCommand::ConfirmOrder(ConfirmOrder {
        tenant_id: tenant.tenant_id(),
        order_id,
        location_id,
        coupon_code: body.coupon_code.clone(),
        discount,
        occurred_at: Utc::now(),
    });

    match dispatch_sales(&services, &tenant, &principal, agg, confirm, "sales.orders.confirm") {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "subtotal": subtotal.minor(),
                "discount": discount.minor(),
                "grand_total": subtotal.saturating_sub(discount).minor(),
            })),
        )
            .into_response(),
        Err(resp) => {
            // The coupon redemption (if any) is already committed; the
            // reservation rollback keeps stock consistent.
            tracing::warn!("order confirm failed after reservation/redemption; rolling back reservations");
            release_reservations(&services, &tenant, &principal, agg, &reserved);
            resp
        }
    }
}

fn release_reservations(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    order_ref: AggregateId,
    items: &[StockItemId],
) {
    for item in items {
        let release = StockCommand::ReleaseReservation(ReleaseReservation {
            tenant_id: tenant.tenant_id(),
            item_id: *item,
            order_ref,
            occurred_at: Utc::now(),
        });
        if dispatch_stock(services, tenant, principal, item.0, release, "sales.orders.confirm")
            .is_err()
        {
            tracing::warn!("failed to release reservation on item {item}");
        }
    }
}

pub async fn register_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RegisterPaymentRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "sales order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(method) = dto::parse_payment_method(&body.method) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_method",
            "method must be one of: cash, card, transfer, store_credit",
        );
    };

    let cmd = SalesOrderCommand::RegisterPayment(RegisterPayment {
        tenant_id: tenant.tenant_id(),
        order_id: SalesOrderId::new(agg),
        amount: Money::from_minor(body.amount),
        method,
        occurred_at: Utc::now(),
    });

    match dispatch_sales(&services, &tenant, &principal, agg, cmd, "sales.orders.payment") {
        Ok(committed) => {
            let fully_paid = committed
                .iter()
                .any(|e| e.event_type == "sales.order.paid");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "id": agg.to_string(),
                    "events_committed": committed.len(),
                    "fully_paid": fully_paid,
                })),
            )
                .into_response()
        }
        Err(resp) => resp,
    }
}

pub async fn mark_paid(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "sales order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SalesOrderCommand::MarkPaid(MarkPaid {
        tenant_id: tenant.tenant_id(),
        order_id: SalesOrderId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_sales(&services, &tenant, &principal, agg, cmd, "sales.orders.payment") {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

/// Dispatch flow: move the order to Dispatched, commit the stock
/// reservations (units leave the building), and schedule the delivery.
pub async fn dispatch_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::DispatchOrderRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "sales order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order_id = SalesOrderId::new(agg);

    let Some(order) = services.projections.sales.get(tenant.tenant_id(), &order_id) else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "sales order not found");
    };

    let cmd = SalesOrderCommand::DispatchOrder(DispatchOrder {
        tenant_id: tenant.tenant_id(),
        order_id,
        occurred_at: Utc::now(),
    });
    if let Err(resp) = dispatch_sales(&services, &tenant, &principal, agg, cmd, "sales.orders.dispatch")
    {
        return resp;
    }

    // Commit reservations for every line item.
    for (item, _qty) in order_reservations(&services, &tenant, &order) {
        let commit = StockCommand::CommitReservation(CommitReservation {
            tenant_id: tenant.tenant_id(),
            item_id: item,
            order_ref: agg,
            occurred_at: Utc::now(),
        });
        if dispatch_stock(&services, &tenant, &principal, item.0, commit, "sales.orders.dispatch")
            .is_err()
        {
            tracing::warn!("failed to commit reservation on item {item}");
        }
    }

    // Schedule the delivery.
    let delivery_agg = AggregateId::new();
    let schedule = DeliveryCommand::ScheduleDelivery(ScheduleDelivery {
        tenant_id: tenant.tenant_id(),
        delivery_id: DeliveryId::new(delivery_agg),
        sales_order_id: order_id,
        address: body.delivery_address,
        occurred_at: Utc::now(),
    });
    let cmd_auth = CmdAuth::new(schedule, "sales.orders.dispatch");
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }
    if let Err(e) = services.dispatch::<Delivery>(
        tenant.tenant_id(),
        delivery_agg,
        "sales.delivery",
        cmd_auth.inner,
        |_tenant_id, aggregate_id| Delivery::empty(DeliveryId::new(aggregate_id)),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "delivery_id": delivery_agg.to_string(),
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
    let agg = match errors::parse_id(&id, "sales order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order_id = SalesOrderId::new(agg);

    let order = services.projections.sales.get(tenant.tenant_id(), &order_id);

    let cmd = SalesOrderCommand::CancelOrder(CancelOrder {
        tenant_id: tenant.tenant_id(),
        order_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    let committed = match dispatch_sales(&services, &tenant, &principal, agg, cmd, "sales.orders.cancel")
    {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Release reservations held by confirmed orders.
    let had_reservation = committed.iter().any(|stored| {
        matches!(
            serde_json::from_value::<stockpile_sales::SalesOrderEvent>(stored.payload.clone()),
            Ok(stockpile_sales::SalesOrderEvent::OrderCancelled(e)) if e.had_reservation
        )
    });
    if had_reservation {
        if let Some(order) = order {
            let items: Vec<StockItemId> = order_reservations(&services, &tenant, &order)
                .into_iter()
                .map(|(item, _)| item)
                .collect();
            release_reservations(&services, &tenant, &principal, agg, &items);
        }
    }

    (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response()
}
