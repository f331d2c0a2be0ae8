//! Route definitions for the node API

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::handlers::*;

// Request state routes
pub fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/api/requests/:service", get(list_requests))
        .route("/api/requests/:service/:request_id", get(get_request))
}

// Data feed routes
pub fn feed_routes() -> Router<AppState> {
    Router::new().route("/api/feeds/:aggregator_id", get(get_feed))
}

/// The full API router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(request_routes())
        .merge(feed_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
