//! Daemon lifecycle: metrics endpoint, proxy server, signal-driven shutdown

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus_client::registry::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use twilight_core::config::TwilightConfig;
use twilight_proxy::metrics::{self, ProxyMetrics};
use twilight_proxy::{server, ApiSignedUrlResolver, AppState};

pub async fn run(config: TwilightConfig) -> Result<()> {
    info!("daemon starting");

    let shutdown = CancellationToken::new();

    // ── Metrics ──────────────────────────────────────────────────────────
    let mut registry = Registry::default();
    let proxy_metrics = ProxyMetrics::new(&mut registry);
    let registry = Arc::new(registry);

    if let Some(addr) = config.proxy.metrics_addr.clone() {
        let registry = registry.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, registry, token).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    // ── Upstream clients ─────────────────────────────────────────────────
    // No overall timeout: bodies stream for as long as the player reads.
    let http = reqwest::Client::builder()
        .user_agent(concat!("twilightd/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;

    let resolver = ApiSignedUrlResolver::new(http.clone(), &config.proxy.api_base_url)?;
    info!(api = %config.proxy.api_base_url, "signed URL resolver ready");

    let state = AppState::new(
        config.proxy.clone(),
        http,
        Arc::new(resolver),
        proxy_metrics,
        shutdown.clone(),
    );

    if config.proxy.session_idle_secs > 0 {
        let max_idle = Duration::from_secs(config.proxy.session_idle_secs);
        tokio::spawn(state.keys.clone().run_eviction(max_idle, shutdown.clone()));
        info!(idle_secs = config.proxy.session_idle_secs, "session key expiry enabled");
    }

    // ── Shutdown on SIGINT / SIGTERM ─────────────────────────────────────
    let token = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => info!("shutdown signal received, draining"),
            Err(e) => error!("signal handler failed: {e}"),
        }
        token.cancel();
    });

    let listener = tokio::net::TcpListener::bind(&config.proxy.listen)
        .await
        .with_context(|| format!("binding proxy listener {}", config.proxy.listen))?;

    server::serve(listener, state, shutdown).await?;

    info!("daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")
}
