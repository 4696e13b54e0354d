//! twilightd: Twilight decrypting media proxy
//!
//! Usage:
//!   twilightd [--config /etc/twilight/config.toml] [--listen 127.0.0.1:8787]

mod daemon;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "twilightd", version, about = "Twilight decrypting media proxy")]
struct Cli {
    /// Path to twilight.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "TWILIGHT_CONFIG",
        default_value = "/etc/twilight/config.toml"
    )]
    config: PathBuf,

    /// Override the proxy listen address from the config file
    #[arg(long, env = "TWILIGHT_LISTEN")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TWILIGHT_LOG")]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "TWILIGHT_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config).await?;
    if let Some(listen) = cli.listen {
        config.proxy.listen = listen;
    }

    let level = cli.log.unwrap_or_else(|| config.proxy.log_level.clone());
    let format = cli.log_format.unwrap_or(match config.proxy.log_format.as_str() {
        "text" => LogFormat::Text,
        _ => LogFormat::Json,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "twilightd starting"
    );

    daemon::run(config).await
}

async fn load_config(path: &PathBuf) -> Result<twilight_core::config::TwilightConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        twilight_core::config::TwilightConfig::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    } else {
        // logging is not up yet
        eprintln!(
            "twilightd: config file not found: {}  (using defaults)",
            path.display()
        );
        Ok(twilight_core::config::TwilightConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
