use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};

use stockpile_core::{AggregateId, Money};
use stockpile_coupons::{
    Coupon, CouponCommand, CouponId, CouponTerms, CreateCoupon, Discount, ReactivateCoupon,
    SuspendCoupon,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_coupon).get(list_coupons))
        .route("/:code", get(get_coupon))
        .route("/:code/suspend", post(suspend_coupon))
        .route("/:code/reactivate", post(reactivate_coupon))
}

fn dispatch_coupon(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: CouponCommand,
) -> Result<(), axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, "coupons.manage");

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<Coupon>(
            tenant.tenant_id(),
            agg,
            "coupons.coupon",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| Coupon::empty(CouponId::new(aggregate_id)),
        )
        .map(|_| ())
        .map_err(errors::dispatch_error_to_response)
}

fn parse_rfc3339(s: &str, field: &'static str) -> Result<DateTime<Utc>, axum::response::Response> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_timestamp",
                format!("{field} must be RFC3339"),
            )
        })
}

pub async fn create_coupon(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateCouponRequest>,
) -> axum::response::Response {
    let valid_from = match parse_rfc3339(&body.valid_from, "valid_from") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let valid_until = match parse_rfc3339(&body.valid_until, "valid_until") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let discount = match body.discount_kind.as_str() {
        "percent" => Discount::Percent(body.discount_value as u32),
        "fixed" => Discount::Fixed(Money::from_minor(body.discount_value)),
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_discount_kind",
                "discount_kind must be one of: percent, fixed",
            );
        }
    };

    if services
        .projections
        .coupons
        .get_by_code(tenant.tenant_id(), &body.code)
        .is_some()
    {
        return errors::json_error(StatusCode::CONFLICT, "conflict", "coupon code already exists");
    }

    let agg = AggregateId::new();
    let cmd = CouponCommand::CreateCoupon(CreateCoupon {
        tenant_id: tenant.tenant_id(),
        coupon_id: CouponId::new(agg),
        terms: CouponTerms {
            code: body.code,
            discount,
            valid_from,
            valid_until,
            min_subtotal: Money::from_minor(body.min_subtotal),
            max_redemptions: body.max_redemptions,
            per_customer_limit: body.per_customer_limit,
        },
        occurred_at: Utc::now(),
    });

    match dispatch_coupon(&services, &tenant, &principal, agg, cmd) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": agg.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_coupons(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let coupons = services
        .projections
        .coupons
        .list(tenant.tenant_id())
        .into_iter()
        .map(dto::coupon_to_json)
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "coupons": coupons }))).into_response()
}

pub async fn get_coupon(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(code): Path<String>,
) -> axum::response::Response {
    match services
        .projections
        .coupons
        .get_by_code(tenant.tenant_id(), &code)
    {
        Some(rm) => (StatusCode::OK, Json(dto::coupon_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "coupon not found"),
    }
}

pub async fn suspend_coupon(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(code): Path<String>,
) -> axum::response::Response {
    let Some(rm) = services
        .projections
        .coupons
        .get_by_code(tenant.tenant_id(), &code)
    else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "coupon not found");
    };

    let cmd = CouponCommand::SuspendCoupon(SuspendCoupon {
        tenant_id: tenant.tenant_id(),
        coupon_id: rm.coupon_id,
        occurred_at: Utc::now(),
    });

    match dispatch_coupon(&services, &tenant, &principal, rm.coupon_id.0, cmd) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": rm.coupon_id.0.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn reactivate_coupon(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(code): Path<String>,
) -> axum::response::Response {
    let Some(rm) = services
        .projections
        .coupons
        .get_by_code(tenant.tenant_id(), &code)
    else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "coupon not found");
    };

    let cmd = CouponCommand::ReactivateCoupon(ReactivateCoupon {
        tenant_id: tenant.tenant_id(),
        coupon_id: rm.coupon_id,
        occurred_at: Utc::now(),
    });

    match dispatch_coupon(&services, &tenant, &principal, rm.coupon_id.0, cmd) {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": rm.coupon_id.0.to_string() })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}
