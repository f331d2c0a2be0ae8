//! Read-only HTTP handlers over pipeline state.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::feed::{AggregateResult, FeedService};
use crate::models::{ApiResponse, PipelineState, RequestStatus, Service};
use crate::store::StateStore;

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn failure<T>(status: StatusCode, message: impl Into<String>) -> ApiResult<T> {
    (status, Json(ApiResponse::err(message)))
}

fn parse_service<T>(raw: &str) -> Result<Service, ApiResult<T>> {
    raw.parse::<Service>()
        .map_err(|err| failure(StatusCode::BAD_REQUEST, err))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn get_request(
    State(store): State<Arc<dyn StateStore>>,
    Path((service, request_id)): Path<(String, String)>,
) -> ApiResult<PipelineState> {
    let service = match parse_service(&service) {
        Ok(service) => service,
        Err(response) => return response,
    };

    match store.get(service, &request_id).await {
        Ok(Some(state)) => (StatusCode::OK, Json(ApiResponse::ok(state))),
        Ok(None) => failure(
            StatusCode::NOT_FOUND,
            format!("request {request_id} not found for {service}"),
        ),
        Err(err) => {
            error!(%service, request_id, error = %err, "state lookup failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "state store unavailable")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

pub async fn list_requests(
    State(store): State<Arc<dyn StateStore>>,
    Path(service): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<PipelineState>> {
    let service = match parse_service(&service) {
        Ok(service) => service,
        Err(response) => return response,
    };
    let status = match query.status.as_deref().map(str::parse::<RequestStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(err)) => return failure(StatusCode::BAD_REQUEST, err),
    };

    match store.list(service, status).await {
        Ok(states) => (StatusCode::OK, Json(ApiResponse::ok(states))),
        Err(err) => {
            error!(%service, error = %err, "state listing failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "state store unavailable")
        }
    }
}

pub async fn get_feed(
    State(feeds): State<Option<Arc<FeedService>>>,
    Path(aggregator_id): Path<String>,
) -> ApiResult<AggregateResult> {
    let Some(feeds) = feeds else {
        return failure(StatusCode::NOT_FOUND, "data feeds are not enabled");
    };
    match feeds.latest(&aggregator_id).await {
        Some(result) => (StatusCode::OK, Json(ApiResponse::ok(result))),
        None => failure(
            StatusCode::NOT_FOUND,
            format!("no aggregate yet for {aggregator_id}"),
        ),
    }
}
