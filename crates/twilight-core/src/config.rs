use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TwilightError, TwilightResult};

/// Top-level configuration (loaded from twilight.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TwilightConfig {
    pub proxy: ProxyConfig,
    pub crypto: CryptoConfig,
    pub keyring: KeyringConfig,
}

impl TwilightConfig {
    /// Parse a TOML document. Missing sections and fields take defaults.
    pub fn from_toml(content: &str) -> TwilightResult<Self> {
        toml::from_str(content).map_err(|e| TwilightError::Config(e.to_string()))
    }

    /// Load the config file at `path`, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> TwilightResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| TwilightError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// HTTP listen address for the decrypting proxy (default: 127.0.0.1:8787)
    pub listen: String,
    /// Path prefix the media player requests plaintext segments under
    pub virtual_prefix: String,
    /// Path prefix for proxy control endpoints (key handshake)
    pub control_prefix: String,
    /// Base URL of the application API that issues signed download URLs
    pub api_base_url: String,
    /// Bound on waiting for upstream response headers, in seconds
    pub upstream_timeout_secs: u64,
    /// Request header carrying the session id
    pub session_header: String,
    /// Cookie carrying the session id when the header is absent
    pub session_cookie: String,
    /// Forget a session's content key after this many idle seconds (0 keeps keys until CLEAR_KEY)
    pub session_idle_secs: u64,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9187)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Argon2id cost parameters for password-derived key encryption keys
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 128000, roughly 128 MB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 16)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 6)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyringConfig {
    /// JSON keyring store holding the password-wrapped keys
    pub path: PathBuf,
    /// User the keyring entries belong to
    pub user_id: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".into(),
            virtual_prefix: "/virtual-dash/".into(),
            control_prefix: "/_twilight".into(),
            api_base_url: "http://localhost:3000".into(),
            upstream_timeout_secs: 6,
            session_header: "x-twilight-session".into(),
            session_cookie: "twilight_session".into(),
            session_idle_secs: 4 * 60 * 60,
            metrics_addr: Some("127.0.0.1:9187".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 128_000,
            argon2_time_cost: 16,
            argon2_parallelism: 6,
        }
    }
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/twilight/keyring.json"),
            user_id: "default".into(),
        }
    }
}
