use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use twilight_core::config::ProxyConfig;

use crate::metrics::ProxyMetrics;
use crate::registry::KeyRegistry;
use crate::resolver::SignedUrlResolver;

/// Everything a request handler needs, passed explicitly to every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub keys: KeyRegistry,
    pub resolver: Arc<dyn SignedUrlResolver>,
    pub http: reqwest::Client,
    pub metrics: ProxyMetrics,
    /// Root token; each media response streams under a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: ProxyConfig,
        http: reqwest::Client,
        resolver: Arc<dyn SignedUrlResolver>,
        metrics: ProxyMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            keys: KeyRegistry::new(),
            resolver,
            http,
            metrics,
            shutdown,
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.config.upstream_timeout_secs)
    }

    pub fn handshake_path(&self) -> String {
        format!("{}/handshake", self.config.control_prefix.trim_end_matches('/'))
    }
}
