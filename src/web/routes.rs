//! HTTP route table

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::state::AppState;

/// Build the signaling/status router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/offer", post(handlers::offer))
        .route("/api/health", get(handlers::health))
        .route("/api/sessions", get(handlers::sessions))
        .route("/api/sessions/close", post(handlers::close_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
