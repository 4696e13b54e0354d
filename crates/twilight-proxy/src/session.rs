//! Session identification: a request header, falling back to a cookie.

use axum::http::{header, HeaderMap};

/// Opaque per-client session identifier
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First few characters, safe to put in logs.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({}..)", self.short())
    }
}

/// Extract the session id from `header_name`, else from the `cookie_name` cookie.
pub fn session_id(headers: &HeaderMap, header_name: &str, cookie_name: &str) -> Option<SessionId> {
    if let Some(id) = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .and_then(SessionId::new)
    {
        return Some(id);
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .and_then(|(_, value)| SessionId::new(value))
}
