//! Signed-URL resolution against the application API.

use axum::http::{header, HeaderMap};
use futures::future::BoxFuture;
use reqwest::{Client, Url};
use tracing::{debug, warn};
use twilight_core::types::SignedUrlResponse;

use crate::error::{ProxyError, ProxyResult};

/// Request headers carried over to the signed-URL API so it can
/// authenticate the caller.
const FORWARDED_HEADERS: [header::HeaderName; 2] = [header::COOKIE, header::AUTHORIZATION];

/// Maps `(mediaId, filename)` to a time-limited download URL.
pub trait SignedUrlResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        media_id: &'a str,
        filename: &'a str,
        caller: &'a HeaderMap,
    ) -> BoxFuture<'a, ProxyResult<String>>;
}

/// Resolver calling `GET {base}/api/media/{mediaId}?filename={filename}`.
pub struct ApiSignedUrlResolver {
    client: Client,
    base_url: Url,
}

impl ApiSignedUrlResolver {
    pub fn new(client: Client, base_url: &str) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| anyhow::anyhow!("invalid api_base_url {base_url}: {e}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("api_base_url {base_url} cannot be a base URL");
        }
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, media_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", "media", media_id]);
        }
        url
    }

    async fn fetch(&self, media_id: &str, filename: &str, caller: &HeaderMap) -> ProxyResult<String> {
        let mut request = self
            .client
            .get(self.endpoint(media_id))
            .query(&[("filename", filename)]);
        for name in FORWARDED_HEADERS {
            for value in caller.get_all(&name) {
                request = request.header(name.clone(), value.clone());
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(media_id, %status, "signed URL request rejected");
            return Err(ProxyError::UpstreamFetch { status, body });
        }

        let parsed: SignedUrlResponse = response.json().await.map_err(|e| {
            warn!(media_id, "signed URL response is not valid JSON: {e}");
            ProxyError::SignedUrlMissing
        })?;
        parsed.url.filter(|u| !u.is_empty()).ok_or_else(|| {
            warn!(media_id, error = ?parsed.error, "signed URL response carried no url");
            ProxyError::SignedUrlMissing
        })
    }
}

impl SignedUrlResolver for ApiSignedUrlResolver {
    fn resolve<'a>(
        &'a self,
        media_id: &'a str,
        filename: &'a str,
        caller: &'a HeaderMap,
    ) -> BoxFuture<'a, ProxyResult<String>> {
        Box::pin(self.fetch(media_id, filename, caller))
    }
}
