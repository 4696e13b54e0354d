//! Virtual media requests: `GET {virtual_prefix}{filename}?mediaId=<id>`
//!
//! `HEAD` runs the same checks and upstream fetch but answers with headers only.
//!
//! Flow per request:
//!   1. look up the session's content key (fail closed: no key, no fetch)
//!   2. validate `mediaId` and filename
//!   3. resolve a signed download URL through the application API
//!   4. fetch the encrypted object, bounding only the wait for headers
//!   5. stream the body through `DecryptStream` back to the client
//!
//! Range requests are not honoured: the response is always the whole
//! object with status 200.

use axum::body::Body;
use axum::extract::{Query, Request};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};
use twilight_crypto::{ContentKey, DecryptStream};

use crate::error::{ProxyError, ProxyResult};
use crate::session::session_id;
use crate::state::AppState;

/// Upstream headers that no longer describe the decrypted body
const STRIPPED_HEADERS: [header::HeaderName; 5] = [
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::ACCEPT_RANGES,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

#[derive(Debug, Deserialize)]
struct MediaQuery {
    #[serde(rename = "mediaId")]
    media_id: Option<String>,
}

pub async fn handle(req: Request, state: AppState) -> Response {
    match serve(req, &state).await {
        Ok(response) => {
            state.metrics.record_request("media", "ok");
            response
        }
        Err(e) => {
            match &e {
                ProxyError::KeyNotInstalled => warn!("media request refused: no content key for session"),
                ProxyError::UpstreamFetch { status, .. } => debug!(%status, "upstream status passed through"),
                other => warn!(error = %other, "media request failed"),
            }
            state.metrics.record_request("media", e.outcome());
            e.into_response()
        }
    }
}

async fn serve(req: Request, state: &AppState) -> ProxyResult<Response> {
    let (parts, _) = req.into_parts();

    let session = session_id(
        &parts.headers,
        &state.config.session_header,
        &state.config.session_cookie,
    );
    let key = match &session {
        Some(session) => state.keys.get(session).await,
        None => None,
    }
    .ok_or(ProxyError::KeyNotInstalled)?;

    let filename = parts
        .uri
        .path()
        .strip_prefix(state.config.virtual_prefix.as_str())
        .unwrap_or_default()
        .to_string();

    let media_id = Query::<MediaQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.media_id)
        .filter(|id| !id.is_empty())
        .ok_or(ProxyError::MissingMediaId)?;
    if filename.is_empty() {
        return Err(ProxyError::MissingFilename);
    }

    let signed_url = state
        .resolver
        .resolve(&media_id, &filename, &parts.headers)
        .await?;

    let timeout = state.upstream_timeout();
    let upstream = tokio::time::timeout(timeout, state.http.get(&signed_url).send())
        .await
        .map_err(|_| ProxyError::UpstreamTimeout(timeout))??;

    let status = upstream.status();
    if !status.is_success() {
        let body = upstream.text().await.unwrap_or_default();
        return Err(ProxyError::UpstreamFetch { status, body });
    }

    let headers = rewrite_headers(upstream.headers(), &filename);
    if parts.method == Method::HEAD {
        return Ok((StatusCode::OK, headers).into_response());
    }

    info!(media_id = %media_id, filename = %filename, "streaming decrypted media");

    let decrypted_bytes = state.metrics.decrypted_bytes();
    let body = DecryptStream::new(ContentKey::clone(&key), upstream.bytes_stream())
        .with_cancellation(state.shutdown.child_token())
        .inspect_ok(move |chunk| {
            decrypted_bytes.inc_by(chunk.len() as u64);
        });

    Ok((StatusCode::OK, headers, Body::from_stream(body)).into_response())
}

/// Copy upstream headers minus the ones invalidated by decryption, and set
/// the content type for the requested file.
pub fn rewrite_headers(upstream: &HeaderMap, filename: &str) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in STRIPPED_HEADERS {
        headers.remove(name);
    }

    let content_type = if filename.ends_with(".mpd") {
        HeaderValue::from_static("application/dash+xml")
    } else if filename.ends_with(".m3u8") {
        HeaderValue::from_static("application/vnd.apple.mpegurl")
    } else {
        upstream
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"))
    };
    headers.insert(header::CONTENT_TYPE, content_type);
    headers
}
