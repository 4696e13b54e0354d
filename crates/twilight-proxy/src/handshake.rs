//! Key handshake: `POST {control_prefix}/handshake` with a `ClientMessage`.

use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};
use twilight_core::types::ClientMessage;
use twilight_crypto::ContentKey;

use crate::error::{ProxyError, ProxyResult};
use crate::session::session_id;
use crate::state::AppState;

const MAX_HANDSHAKE_BODY: usize = 64 * 1024;

pub async fn handle(req: Request, state: AppState) -> Response {
    match apply(req, &state).await {
        Ok(kind) => {
            state.metrics.record_request("handshake", "ok");
            state.metrics.record_handshake(kind);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!(error = %e, "handshake rejected");
            state.metrics.record_request("handshake", e.outcome());
            e.into_response()
        }
    }
}

async fn apply(req: Request, state: &AppState) -> ProxyResult<&'static str> {
    let (parts, body) = req.into_parts();
    let session = session_id(
        &parts.headers,
        &state.config.session_header,
        &state.config.session_cookie,
    )
    .ok_or(ProxyError::MissingSession)?;

    let body = to_bytes(body, MAX_HANDSHAKE_BODY)
        .await
        .map_err(|e| ProxyError::InvalidHandshake(format!("reading body: {e}")))?;
    let message: ClientMessage = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::InvalidHandshake(format!("malformed message: {e}")))?;

    match message {
        ClientMessage::SetKey { key } => {
            let key = ContentKey::from_jwk(&key).map_err(|e| ProxyError::InvalidHandshake(e.to_string()))?;
            let replaced = state.keys.install(session.clone(), key).await;
            info!(session = session.short(), replaced, "content key installed");
            Ok("set_key")
        }
        ClientMessage::ClearKey => {
            let removed = state.keys.remove(&session).await;
            info!(session = session.short(), removed, "content key cleared");
            Ok("clear_key")
        }
    }
}
