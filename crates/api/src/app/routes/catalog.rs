use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use stockpile_catalog::{
    ActivateProduct, ArchiveProduct, ChangePrice, CreateProduct, DefineVariant, Product,
    ProductCommand, ProductId,
};
use stockpile_core::{AggregateId, Money};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/products", post(create_product).get(list_products))
        .route("/products/:id", get(get_product))
        .route("/products/:id/activate", post(activate_product))
        .route("/products/:id/archive", post(archive_product))
        .route("/products/:id/price", post(change_price))
        .route("/products/:id/variants", post(define_variant))
}

fn dispatch_product(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: ProductCommand,
    permission: &'static str,
) -> Result<Vec<stockpile_infra::event_store::StoredEvent>, axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, permission);

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    services
        .dispatch::<Product>(
            tenant.tenant_id(),
            agg,
            "catalog.product",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
        )
        .map_err(errors::dispatch_error_to_response)
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();
    let cmd = ProductCommand::CreateProduct(CreateProduct {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        sku: body.sku,
        name: body.name,
        price: Money::from_minor(body.price),
        occurred_at: Utc::now(),
    });

    match dispatch_product(&services, &tenant, &principal, agg, cmd, "catalog.products.create") {
        Ok(committed) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let products = services
        .projections
        .catalog
        .list(tenant.tenant_id())
        .into_iter()
        .map(dto::product_to_json)
        .collect::<Vec<_>>();

    (StatusCode::OK, Json(serde_json::json!({ "products": products }))).into_response()
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .projections
        .catalog
        .get(tenant.tenant_id(), &ProductId::new(agg))
    {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn activate_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::ActivateProduct(ActivateProduct {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_product(&services, &tenant, &principal, agg, cmd, "catalog.products.manage") {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::ArchiveProduct(ArchiveProduct {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        occurred_at: Utc::now(),
    });

    match dispatch_product(&services, &tenant, &principal, agg, cmd, "catalog.products.manage") {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn change_price(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangePriceRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::ChangePrice(ChangePrice {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        price: Money::from_minor(body.price),
        occurred_at: Utc::now(),
    });

    match dispatch_product(&services, &tenant, &principal, agg, cmd, "catalog.products.manage") {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "id": agg.to_string() }))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn define_variant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::DefineVariantRequest>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::DefineVariant(DefineVariant {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        name: body.name,
        sku_suffix: body.sku_suffix,
        price_delta: body.price_delta,
        occurred_at: Utc::now(),
    });

    match dispatch_product(&services, &tenant, &principal, agg, cmd, "catalog.products.manage") {
        Ok(committed) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}
