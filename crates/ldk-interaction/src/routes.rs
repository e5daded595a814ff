//! Webhook callback surface.
//!
//! `POST /v1/callback` with a JSON body `{card_id, action, extra_payload?,
//! ts}` and an `X-Signature` header carrying HMAC-SHA256 over
//! `card_id|action|ts`. Responses: 200 on success, 403 on bad
//! signature/role, 409 on replay/stale/transition conflicts.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use serde_json::json;

use ldk_schemas::CallbackRequest;

use crate::hub::{CallbackError, InteractionHub};

/// Header carrying the callback signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Optional header carrying the caller's role claim.
pub const ROLE_HEADER: &str = "x-role";

/// Build the webhook router over a shared hub.
pub fn callback_router(hub: Arc<InteractionHub>) -> Router {
    Router::new()
        .route("/v1/callback", post(handle_callback))
        .with_state(hub)
}

async fn handle_callback(
    State(hub): State<Arc<InteractionHub>>,
    headers: HeaderMap,
    Json(req): Json<CallbackRequest>,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let role = headers
        .get(ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match hub.handle_callback(&req, &signature, role.as_deref()).await {
        Ok(()) => (StatusCode::OK, Json(json!({"ok": true}))),
        Err(e) => {
            let status = match &e {
                CallbackError::SignatureInvalid | CallbackError::RoleDenied => {
                    StatusCode::FORBIDDEN
                }
                CallbackError::UnknownCard => StatusCode::NOT_FOUND,
                CallbackError::Expired
                | CallbackError::Stale
                | CallbackError::Replayed
                | CallbackError::BadTransition => StatusCode::CONFLICT,
                CallbackError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({"ok": false, "error": e.to_string()})))
        }
    }
}
