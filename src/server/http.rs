// src/server/http.rs

//! The engine's HTTP surface: health probes (C10) and the remote dispatch
//! endpoint used by peer instances (C6).

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::core::error::EngineError;
use crate::core::state::EngineState;

pub fn router(state: Arc<EngineState>) -> Router {
    Router::new()
        .route("/api/health", get(readiness))
        .route("/api/health/live", get(liveness))
        .route("/api/health/startup", get(startup))
        .route("/api/health/channels/{id}", get(channel_health))
        .route("/api/internal/dispatch", post(dispatch))
        .with_state(state)
}

async fn liveness(State(state): State<Arc<EngineState>>) -> impl IntoResponse {
    if state.health.liveness() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness(State(state): State<Arc<EngineState>>) -> impl IntoResponse {
    if state.health.readiness() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn startup(State(state): State<Arc<EngineState>>) -> impl IntoResponse {
    if state.health.startup() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn channel_health(
    State(state): State<Arc<EngineState>>,
    Path(channel_id): Path<String>,
) -> impl IntoResponse {
    use crate::core::channel::ChannelState;

    match state.engine.get_deployed_channel(&channel_id) {
        Some(handle) => {
            let channel_state = handle.runtime.state().await;
            let status = if channel_state == ChannelState::Started {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (
                status,
                Json(json!({ "channelId": channel_id, "state": channel_state.as_str() })),
            )
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("channel '{channel_id}' is not deployed") })),
        ),
    }
}

const CLUSTER_SECRET_HEADER: &str = "x-cluster-secret";

#[derive(Deserialize)]
struct DispatchRequest {
    #[serde(rename = "channelId")]
    channel_id: String,
    #[serde(rename = "rawData")]
    raw_data: String,
    #[serde(rename = "sourceMap")]
    source_map: Option<serde_json::Value>,
}

async fn dispatch(
    State(state): State<Arc<EngineState>>,
    headers: HeaderMap,
    Json(req): Json<DispatchRequest>,
) -> impl IntoResponse {
    let header_value = headers
        .get(CLUSTER_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = state.remote_dispatcher.authenticate(header_value) {
        return error_response(e);
    }

    match state
        .route_dispatch(
            &req.channel_id,
            req.raw_data.as_bytes(),
            req.source_map.unwrap_or(serde_json::Value::Null),
        )
        .await
    {
        Ok(message_id) => (
            StatusCode::OK,
            Json(json!({ "messageId": message_id, "status": "accepted" })),
        )
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

fn error_response(e: EngineError) -> axum::response::Response {
    let status = match &e {
        EngineError::Auth(_) => StatusCode::FORBIDDEN,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Conflict(_) | EngineError::ShuttingDown => StatusCode::CONFLICT,
        EngineError::Validation(_) | EngineError::Configuration(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}
