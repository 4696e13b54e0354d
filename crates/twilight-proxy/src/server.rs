//! HTTP front: every request goes through the `VirtualRouter` table; what
//! it does not claim gets a 404.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::router::{RouteOutcome, VirtualRouter};
use crate::state::AppState;
use crate::{handshake, media};

/// Route table for the proxy: key handshake first, then virtual media.
pub fn virtual_router(state: &AppState) -> VirtualRouter {
    let handshake_path = state.handshake_path();
    let virtual_prefix = state.config.virtual_prefix.clone();

    VirtualRouter::new()
        .route(
            "handshake",
            move |method, path| method == Method::POST && path == handshake_path,
            handshake::handle,
        )
        .route(
            "media",
            move |method, path| {
                (method == Method::GET || method == Method::HEAD)
                    && path.starts_with(virtual_prefix.as_str())
            },
            media::handle,
        )
}

pub fn build_app(state: AppState) -> Router {
    let router = Arc::new(virtual_router(&state));

    Router::new().fallback(move |req: Request| {
        let router = router.clone();
        let state = state.clone();
        async move { dispatch(&router, req, state).await }
    })
}

async fn dispatch(router: &VirtualRouter, req: Request, state: AppState) -> Response {
    let metrics = state.metrics.clone();
    match router.dispatch(req, state).await {
        RouteOutcome::Handled(response) => response,
        RouteOutcome::NotHandled => {
            metrics.record_request("unmatched", "not_found");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Serve the proxy on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(
        addr = %addr,
        virtual_prefix = %state.config.virtual_prefix,
        handshake = %state.handshake_path(),
        "proxy: listening"
    );

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| anyhow::anyhow!("proxy server: {e}"))
}
