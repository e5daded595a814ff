//! HTTP surface: health, status, and the mounted webhook callback.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;

use crate::state::AppState;

/// Build the daemon router: status surface plus the interaction hub's
/// callback route.
pub fn build_router(state: Arc<AppState>) -> Router {
    let callback = ldk_interaction::callback_router(Arc::clone(&state.hub));
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/audit-trail", get(audit_trail))
        .with_state(Arc::clone(&state))
        .merge(callback)
}

async fn audit_trail(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.audit_trail(200).await {
        Ok(rows) => (StatusCode::OK, Json(json!(rows))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": e.to_string()})),
        ),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "service": state.build.service,
        "version": state.build.version,
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.snapshot().await {
        Ok(snapshot) => (StatusCode::OK, Json(json!(snapshot))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": e.to_string()})),
        ),
    }
}
