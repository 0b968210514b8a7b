//! HTTP surface: WebSocket upgrade, metrics, schema export, and the
//! audit-trail window.

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use super::{connection, AppState};
use crate::protocol::schema;

/// Build the router. CORS policy is applied by the caller.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/metrics", get(metrics_handler))
        .route("/metrics/prom", get(prometheus_handler))
        .route("/schema", get(schema_handler))
        .route("/audit", get(audit_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.metrics.snapshot()).into_response()
}

async fn prometheus_handler(State(state): State<Arc<AppState>>) -> Response {
    let body = state.metrics.snapshot().to_prometheus();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// Language-neutral message grammar; external clients generate their
/// parsers from this.
async fn schema_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(schema::export(&state.config.protocol)).into_response()
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

async fn audit_handler(
    Query(query): Query<AuditQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    Json(state.security.recent(query.limit.min(1000))).into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "rooms": state.dispatcher.room_count(),
        "connections": state.fanout.connection_count(),
    }))
    .into_response()
}
