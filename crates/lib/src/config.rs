//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.raccoon/config.json`) and environment.
//! The bridge section is resolved once at startup into an immutable [`BridgeConfig`]
//! shared by the forwarder, integrations client and connection manager.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Webhook / Raccoon API settings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// HTTP server settings for the inbound send endpoint.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Where per-user credential directories live.
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Process-wide bridge settings. Read-only once the bridge is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Webhook that receives normalized inbound messages. Overridden by RACCOON_WEBHOOK_URL.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Base URL of the Raccoon API (integrations listing). Overridden by RACCOON_API_URL.
    #[serde(default)]
    pub raccoon_api_url: Option<String>,

    /// When false, inbound messages are not forwarded.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            raccoon_api_url: None,
            enabled: default_enabled(),
        }
    }
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 18790).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    18790
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Credential storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsConfig {
    /// Base directory for `raccoon-<userId>` credential directories. Relative paths are
    /// resolved against the config file's parent. Default: `credentials` next to the config file.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn trimmed(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the effective bridge config: env RACCOON_WEBHOOK_URL / RACCOON_API_URL override the file.
pub fn resolve_bridge_config(config: &Config) -> BridgeConfig {
    BridgeConfig {
        webhook_url: env_non_empty("RACCOON_WEBHOOK_URL")
            .or_else(|| trimmed(config.bridge.webhook_url.as_ref())),
        raccoon_api_url: env_non_empty("RACCOON_API_URL")
            .or_else(|| trimmed(config.bridge.raccoon_api_url.as_ref())),
        enabled: config.bridge.enabled,
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RACCOON_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".raccoon").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the credentials base directory: `credentials.directory` if set (relative paths
/// resolved against the config file's parent), otherwise `credentials` next to the config file.
pub fn resolve_credentials_dir(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.credentials.directory {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_parent.join(d)
            }
        }
        _ => config_parent.join("credentials"),
    }
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
