//! End-to-end proxy tests: a wiremock server plays both the signed-URL API
//! and the object store; requests go through the full axum app.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use twilight_core::config::ProxyConfig;
use twilight_crypto::{generate_cek, ContentKey, EncryptTransform};
use twilight_proxy::metrics::ProxyMetrics;
use twilight_proxy::{build_app, ApiSignedUrlResolver, AppState, SessionId};
use wiremock::matchers::{header as header_eq, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION_HEADER: &str = "x-twilight-session";

fn test_state(server: &MockServer) -> AppState {
    let config = ProxyConfig {
        api_base_url: server.uri(),
        upstream_timeout_secs: 1,
        ..ProxyConfig::default()
    };
    let http = reqwest::Client::new();
    let resolver = ApiSignedUrlResolver::new(http.clone(), &server.uri()).unwrap();
    AppState::new(
        config,
        http,
        Arc::new(resolver),
        ProxyMetrics::default(),
        CancellationToken::new(),
    )
}

fn encrypt(key: &ContentKey, plaintext: &[u8]) -> Vec<u8> {
    let mut enc = EncryptTransform::new(key.clone());
    let mut wire = enc.counter_block().as_bytes().to_vec();
    wire.extend(enc.push(plaintext).unwrap());
    wire.extend(enc.finish().unwrap());
    wire
}

async fn mount_media(server: &MockServer, media_id: &str, filename: &str, object: Vec<u8>) {
    let object_path = format!("/objects/{media_id}/{filename}");
    Mock::given(method("GET"))
        .and(path(format!("/api/media/{media_id}")))
        .and(query_param("filename", filename))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "url": format!("{}{object_path}", server.uri()) })),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(object_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(object)
                .insert_header("content-type", "video/mp4")
                .insert_header("accept-ranges", "bytes")
                .insert_header("etag", "\"v1\""),
        )
        .mount(server)
        .await;
}

fn media_request(uri: &str, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(session) = session {
        builder = builder.header(SESSION_HEADER, session);
    }
    builder.body(Body::empty()).unwrap()
}

fn handshake_request(session: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::post("/_twilight/handshake").header(header::CONTENT_TYPE, "application/json");
    if let Some(session) = session {
        builder = builder.header(SESSION_HEADER, session);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

// --- Streaming ---

#[tokio::test]
async fn handshake_then_stream_decrypts() {
    let server = MockServer::start().await;
    let key = generate_cek();
    let plaintext: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
    mount_media(&server, "m1", "seg-1.m4s", encrypt(&key, &plaintext)).await;

    let app = build_app(test_state(&server));

    let (status, _, _) = send(
        &app,
        handshake_request(Some("s1"), json!({ "type": "SET_KEY", "key": key.to_jwk() })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, headers, body) = send(&app, media_request("/virtual-dash/seg-1.m4s?mediaId=m1", Some("s1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, plaintext);
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "video/mp4");
    assert_eq!(headers.get(header::ETAG).unwrap(), "\"v1\"");
    assert!(headers.get(header::ACCEPT_RANGES).is_none());
    assert!(headers.get(header::CONTENT_ENCODING).is_none());
}

#[tokio::test]
async fn manifest_gets_dash_content_type() {
    let server = MockServer::start().await;
    let key = generate_cek();
    let manifest = b"<?xml version=\"1.0\"?><MPD></MPD>";
    mount_media(&server, "m1", "manifest.mpd", encrypt(&key, manifest)).await;

    let state = test_state(&server);
    state.keys.install(SessionId::new("s1").unwrap(), key).await;
    let app = build_app(state);

    let (status, headers, body) = send(&app, media_request("/virtual-dash/manifest.mpd?mediaId=m1", Some("s1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/dash+xml");
    assert_eq!(body, manifest);
}

#[tokio::test]
async fn cookie_session_fallback() {
    let server = MockServer::start().await;
    let key = generate_cek();
    mount_media(&server, "m1", "seg-1.m4s", encrypt(&key, b"cookie session payload")).await;

    let state = test_state(&server);
    state.keys.install(SessionId::new("s-cookie").unwrap(), key).await;
    let app = build_app(state);

    let req = Request::get("/virtual-dash/seg-1.m4s?mediaId=m1")
        .header(header::COOKIE, "theme=dark; twilight_session=s-cookie")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"cookie session payload");
}

#[tokio::test]
async fn truncated_object_yields_empty_body() {
    let server = MockServer::start().await;
    let key = generate_cek();
    mount_media(&server, "m1", "seg-1.m4s", vec![1, 2, 3]).await;

    let state = test_state(&server);
    state.keys.install(SessionId::new("s1").unwrap(), key).await;
    let app = build_app(state);

    let (status, _, body) = send(&app, media_request("/virtual-dash/seg-1.m4s?mediaId=m1", Some("s1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

// --- Fail-closed and validation ---

#[tokio::test]
async fn no_key_fails_closed_without_upstream_contact() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = build_app(test_state(&server));
    let (status, _, body) = send(&app, media_request("/virtual-dash/seg-1.m4s?mediaId=m1", Some("s1"))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(String::from_utf8(body).unwrap(), "decryption key not available");
}

#[tokio::test]
async fn no_key_is_checked_before_query_validation() {
    let server = MockServer::start().await;
    let app = build_app(test_state(&server));

    let (status, _, _) = send(&app, media_request("/virtual-dash/seg-1.m4s", Some("s1"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, _, _) = send(&app, media_request("/virtual-dash/?mediaId=m1", None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn head_returns_headers_without_body() {
    let server = MockServer::start().await;
    let key = generate_cek();
    mount_media(&server, "m1", "manifest.mpd", encrypt(&key, b"<MPD></MPD>")).await;

    let state = test_state(&server);
    state.keys.install(SessionId::new("s1").unwrap(), key).await;
    let app = build_app(state);

    let req = Request::head("/virtual-dash/manifest.mpd?mediaId=m1")
        .header(SESSION_HEADER, "s1")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/dash+xml");
    assert!(body.is_empty());
}

#[tokio::test]
async fn head_without_key_fails_closed() {
    let server = MockServer::start().await;
    let app = build_app(test_state(&server));

    let req = Request::head("/virtual-dash/seg-1.m4s?mediaId=m1")
        .header(SESSION_HEADER, "s1")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn missing_media_id_is_bad_request() {
    let server = MockServer::start().await;
    let state = test_state(&server);
    state.keys.install(SessionId::new("s1").unwrap(), generate_cek()).await;
    let app = build_app(state);

    let (status, _, _) = send(&app, media_request("/virtual-dash/seg-1.m4s", Some("s1"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, media_request("/virtual-dash/seg-1.m4s?mediaId=", Some("s1"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_filename_is_bad_request() {
    let server = MockServer::start().await;
    let state = test_state(&server);
    state.keys.install(SessionId::new("s1").unwrap(), generate_cek()).await;
    let app = build_app(state);

    let (status, _, body) = send(&app, media_request("/virtual-dash/?mediaId=m1", Some("s1"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "missing filename");
}

#[tokio::test]
async fn sessions_do_not_share_keys() {
    let server = MockServer::start().await;
    let key = generate_cek();
    mount_media(&server, "m1", "seg-1.m4s", encrypt(&key, b"alice only")).await;

    let state = test_state(&server);
    state.keys.install(SessionId::new("alice").unwrap(), key).await;
    let app = build_app(state);

    let (status, _, _) = send(&app, media_request("/virtual-dash/seg-1.m4s?mediaId=m1", Some("bob"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, _, body) = send(&app, media_request("/virtual-dash/seg-1.m4s?mediaId=m1", Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"alice only");
}

// --- Upstream behaviour ---

#[tokio::test]
async fn signed_url_error_passes_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/media/m404"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({ "error": "Video not found or access denied" })),
        )
        .mount(&server)
        .await;

    let state = test_state(&server);
    state.keys.install(SessionId::new("s1").unwrap(), generate_cek()).await;
    let app = build_app(state);

    let (status, _, body) = send(&app, media_request("/virtual-dash/seg-1.m4s?mediaId=m404", Some("s1"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "Video not found or access denied");
}

#[tokio::test]
async fn signed_url_without_url_is_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/media/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let state = test_state(&server);
    state.keys.install(SessionId::new("s1").unwrap(), generate_cek()).await;
    let app = build_app(state);

    let (status, _, _) = send(&app, media_request("/virtual-dash/seg-1.m4s?mediaId=m1", Some("s1"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn caller_credentials_are_forwarded_to_api() {
    let server = MockServer::start().await;
    let key = generate_cek();
    let object_path = "/objects/m1/seg-1.m4s";
    Mock::given(method("GET"))
        .and(path("/api/media/m1"))
        .and(header_eq("authorization", "Bearer user-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "url": format!("{}{object_path}", server.uri()) })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(object_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(encrypt(&key, b"ok")))
        .mount(&server)
        .await;

    let state = test_state(&server);
    state.keys.install(SessionId::new("s1").unwrap(), key).await;
    let app = build_app(state);

    let req = Request::get("/virtual-dash/seg-1.m4s?mediaId=m1")
        .header(SESSION_HEADER, "s1")
        .header(header::AUTHORIZATION, "Bearer user-token")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/octet-stream");
}

#[tokio::test]
async fn object_store_error_passes_through() {
    let server = MockServer::start().await;
    let object_path = "/objects/m1/seg-9.m4s";
    Mock::given(method("GET"))
        .and(path("/api/media/m1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "url": format!("{}{object_path}", server.uri()) })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(object_path))
        .respond_with(ResponseTemplate::new(404).set_body_string("NoSuchKey"))
        .mount(&server)
        .await;

    let state = test_state(&server);
    state.keys.install(SessionId::new("s1").unwrap(), generate_cek()).await;
    let app = build_app(state);

    let (status, _, body) = send(&app, media_request("/virtual-dash/seg-9.m4s?mediaId=m1", Some("s1"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, b"NoSuchKey");
}

#[tokio::test]
async fn slow_upstream_headers_time_out() {
    let server = MockServer::start().await;
    let object_path = "/objects/m1/slow.m4s";
    Mock::given(method("GET"))
        .and(path("/api/media/m1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "url": format!("{}{object_path}", server.uri()) })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(object_path))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let state = test_state(&server);
    state.keys.install(SessionId::new("s1").unwrap(), generate_cek()).await;
    let app = build_app(state);

    let (status, _, _) = send(&app, media_request("/virtual-dash/slow.m4s?mediaId=m1", Some("s1"))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
}

// --- Handshake ---

#[tokio::test]
async fn handshake_requires_session() {
    let server = MockServer::start().await;
    let app = build_app(test_state(&server));

    let (status, _, _) = send(
        &app,
        handshake_request(None, json!({ "type": "SET_KEY", "key": generate_cek().to_jwk() })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn handshake_rejects_invalid_jwk() {
    let server = MockServer::start().await;
    let state = test_state(&server);
    let app = build_app(state.clone());

    let bad = json!({ "type": "SET_KEY", "key": { "kty": "oct", "k": "c2hvcnQ" } });
    let (status, _, _) = send(&app, handshake_request(Some("s1"), bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, handshake_request(Some("s1"), json!({ "type": "PING" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(state.keys.is_empty().await);
}

#[tokio::test]
async fn clear_key_restores_fail_closed() {
    let server = MockServer::start().await;
    let state = test_state(&server);
    let app = build_app(state.clone());

    let key = generate_cek();
    let (status, _, _) = send(
        &app,
        handshake_request(Some("s1"), json!({ "type": "SET_KEY", "key": key.to_jwk() })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(state.keys.len().await, 1);

    let (status, _, _) = send(&app, handshake_request(Some("s1"), json!({ "type": "CLEAR_KEY" }))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(state.keys.is_empty().await);

    let (status, _, _) = send(&app, media_request("/virtual-dash/seg-1.m4s?mediaId=m1", Some("s1"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn unmatched_requests_are_not_found() {
    let server = MockServer::start().await;
    let app = build_app(test_state(&server));

    let (status, _, _) = send(&app, media_request("/api/other", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let req = Request::get("/_twilight/handshake").body(Body::empty()).unwrap();
    let (status, _, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
