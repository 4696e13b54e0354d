use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use twilight_crypto::CryptoError;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Fail-closed: the caller's session has no content key installed.
    #[error("decryption key not available")]
    KeyNotInstalled,

    #[error("missing mediaId")]
    MissingMediaId,

    #[error("missing filename")]
    MissingFilename,

    #[error("missing session id")]
    MissingSession,

    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Non-2xx from the signed-URL API or the object store, passed through.
    #[error("upstream returned {status}")]
    UpstreamFetch { status: StatusCode, body: String },

    #[error("upstream did not send headers within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("signed URL response carried no url")]
    SignedUrlMissing,

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingMediaId
            | ProxyError::MissingFilename
            | ProxyError::MissingSession
            | ProxyError::InvalidHandshake(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamFetch { status, .. } => *status,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::KeyNotInstalled | ProxyError::SignedUrlMissing | ProxyError::Crypto(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label for the `outcome` metric dimension
    pub fn outcome(&self) -> &'static str {
        match self {
            ProxyError::KeyNotInstalled => "no_key",
            ProxyError::MissingMediaId | ProxyError::MissingFilename => "bad_request",
            ProxyError::MissingSession => "no_session",
            ProxyError::InvalidHandshake(_) => "invalid_handshake",
            ProxyError::UpstreamFetch { .. } => "upstream_status",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::SignedUrlMissing => "signed_url_missing",
            ProxyError::Transport(_) => "transport",
            ProxyError::Crypto(_) => "crypto",
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        ProxyError::Transport(e.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ProxyError::UpstreamFetch { body, .. } => (status, body).into_response(),
            other => (status, other.to_string()).into_response(),
        }
    }
}
