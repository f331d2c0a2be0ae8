//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::feed::FeedService;
use crate::store::StateStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub feeds: Option<Arc<FeedService>>,
}

impl AppState {
    pub fn new(store: Arc<dyn StateStore>, feeds: Option<Arc<FeedService>>) -> Self {
        Self { store, feeds }
    }
}

impl FromRef<AppState> for Arc<dyn StateStore> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for Option<Arc<FeedService>> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.feeds.clone()
    }
}
