use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    get_config, get_events, get_health, get_state, get_trades, get_upcoming_launches,
};
use super::state::ApiState;
use super::ws::ws_handler;

/// REST snapshot endpoints plus the push socket, all on one listener.
pub fn create_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/trades", get(get_trades))
        .route("/api/events", get(get_events))
        .route("/api/config", get(get_config))
        .route("/api/health", get(get_health))
        .route("/api/upcoming-launches", get(get_upcoming_launches))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
