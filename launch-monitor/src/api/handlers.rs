use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::dto::ErrorResponse;
use super::state::ApiState;
use crate::utils::MonitorError;

/// Current lifecycle snapshot.
pub async fn get_state(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.state_response())
}

/// Last 100 whale trades, newest first.
pub async fn get_trades(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.trades())
}

/// Last 100 typed events, newest first.
pub async fn get_events(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.events())
}

/// Effective configuration minus secrets.
pub async fn get_config(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.config_response())
}

/// RPC pool health: active endpoint, measured latency, push flag.
pub async fn get_health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.pool.health_snapshot().await)
}

/// Cached upcoming-launch aggregation.
pub async fn get_upcoming_launches(
    State(state): State<Arc<ApiState>>,
) -> Result<Response, ApiError> {
    let upcoming = state
        .catalog
        .upcoming_launches()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(upcoming.as_ref()).into_response())
}

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadGateway(String),
    InternalError(String),
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Api { .. } | MonitorError::Rpc { .. } => {
                ApiError::BadGateway(err.to_string())
            }
            _ => ApiError::InternalError(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let error_response = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
        };

        (status, Json(error_response)).into_response()
    }
}
