use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use stockpile_settings::{
    ChangeCurrency, InitializeSettings, SettingsCommand, TenantSettings, TenantSettingsId,
    UpdateSettings,
};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route(
            "/",
            get(get_settings)
                .post(initialize_settings)
                .patch(update_settings),
        )
        .route("/currency", post(change_currency))
}

fn dispatch_settings(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    cmd: SettingsCommand,
) -> Result<(), axum::response::Response> {
    let cmd_auth = CmdAuth::new(cmd, "settings.manage");

    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()));
    }

    let settings_id = TenantSettingsId::for_tenant(tenant.tenant_id());
    services
        .dispatch::<TenantSettings>(
            tenant.tenant_id(),
            settings_id.0,
            "settings.tenant",
            cmd_auth.inner,
            |_tenant_id, aggregate_id| TenantSettings::empty(TenantSettingsId::new(aggregate_id)),
        )
        .map(|_| ())
        .map_err(errors::dispatch_error_to_response)
}

pub async fn get_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.projections.settings.get(tenant.tenant_id()) {
        Some(rm) => (StatusCode::OK, Json(dto::settings_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "settings not initialized"),
    }
}

pub async fn initialize_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::InitializeSettingsRequest>,
) -> axum::response::Response {
    let cmd = SettingsCommand::InitializeSettings(InitializeSettings {
        tenant_id: tenant.tenant_id(),
        settings_id: TenantSettingsId::for_tenant(tenant.tenant_id()),
        currency: body.currency,
        low_stock_default: body.low_stock_default,
        allow_backorders: body.allow_backorders,
        occurred_at: Utc::now(),
    });

    match dispatch_settings(&services, &tenant, &principal, cmd) {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(resp) => resp,
    }
}

pub async fn update_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::UpdateSettingsRequest>,
) -> axum::response::Response {
    let cmd = SettingsCommand::UpdateSettings(UpdateSettings {
        tenant_id: tenant.tenant_id(),
        settings_id: TenantSettingsId::for_tenant(tenant.tenant_id()),
        low_stock_default: body.low_stock_default,
        allow_backorders: body.allow_backorders,
        occurred_at: Utc::now(),
    });

    match dispatch_settings(&services, &tenant, &principal, cmd) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(resp) => resp,
    }
}

pub async fn change_currency(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ChangeCurrencyRequest>,
) -> axum::response::Response {
    let cmd = SettingsCommand::ChangeCurrency(ChangeCurrency {
        tenant_id: tenant.tenant_id(),
        settings_id: TenantSettingsId::for_tenant(tenant.tenant_id()),
        currency: body.currency,
        occurred_at: Utc::now(),
    });

    match dispatch_settings(&services, &tenant, &principal, cmd) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(resp) => resp,
    }
}
