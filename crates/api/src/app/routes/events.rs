use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use stockpile_infra::event_store::{EventFilter, Pagination, StoredEvent};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(query_events))
        .route("/:id", get(get_event))
        .route("/aggregates/:id", get(aggregate_events))
}

#[derive(Debug, Deserialize)]
pub struct EventQueryParams {
    pub aggregate_id: Option<String>,
    pub aggregate_type: Option<String>,
    pub event_type: Option<String>,
    pub occurred_after: Option<String>,
    pub occurred_before: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn stored_event_to_json(e: &StoredEvent) -> serde_json::Value {
    serde_json::json!({
        "event_id": e.event_id.to_string(),
        "aggregate_id": e.aggregate_id.to_string(),
        "aggregate_type": e.aggregate_type,
        "sequence_number": e.sequence_number,
        "event_type": e.event_type,
        "event_version": e.event_version,
        "occurred_at": e.occurred_at.to_rfc3339(),
        "payload": e.payload,
    })
}

fn parse_time(
    s: &Option<String>,
    field: &'static str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, axum::response::Response> {
    match s {
        None => Ok(None),
        Some(raw) => chrono::DateTime::parse_from_rfc3339(raw)
            .map(|d| Some(d.with_timezone(&chrono::Utc)))
            .map_err(|_| {
                errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_timestamp",
                    format!("{field} must be RFC3339"),
                )
            }),
    }
}

pub async fn query_events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(params): Query<EventQueryParams>,
) -> axum::response::Response {
    let aggregate_id = match &params.aggregate_id {
        Some(raw) => match errors::parse_id(raw, "aggregate") {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };
    let occurred_after = match parse_time(&params.occurred_after, "occurred_after") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let occurred_before = match parse_time(&params.occurred_before, "occurred_before") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let filter = EventFilter {
        aggregate_id,
        aggregate_type: params.aggregate_type,
        event_type: params.event_type,
        occurred_after,
        occurred_before,
    };
    let pagination = Pagination::new(params.limit, params.offset);

    match services
        .query_events(tenant.tenant_id(), filter, pagination)
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "events": result.events.iter().map(stored_event_to_json).collect::<Vec<_>>(),
                "total": result.total,
                "limit": result.pagination.limit,
                "offset": result.pagination.offset,
                "has_more": result.has_more,
            })),
        )
            .into_response(),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        ),
    }
}

pub async fn get_event(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Ok(event_id) = id.parse::<uuid::Uuid>() else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid event id");
    };

    match services.get_event_by_id(tenant.tenant_id(), event_id).await {
        Ok(Some(event)) => (StatusCode::OK, Json(stored_event_to_json(&event))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "event not found"),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        ),
    }
}

pub async fn aggregate_events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Query(params): Query<EventQueryParams>,
) -> axum::response::Response {
    let agg = match errors::parse_id(&id, "aggregate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let pagination = Pagination::new(params.limit, params.offset);

    match services
        .get_aggregate_events(tenant.tenant_id(), agg, Some(pagination))
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "aggregate_id": agg.to_string(),
                "events": result.events.iter().map(stored_event_to_json).collect::<Vec<_>>(),
                "total": result.total,
                "has_more": result.has_more,
            })),
        )
            .into_response(),
        Err(e) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        ),
    }
}
