//! Initialize the configuration directory: create ~/.raccoon, a default config and the
//! credentials base directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, Config};

/// Ensure the configuration directory has been initialized (config file exists).
pub fn require_initialized(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `raccoon init` first (config file not found: {})",
            config_path.display()
        );
    }
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with every default spelled out if missing.
/// - Creates the credentials base directory resolved from that config.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let credentials = config::resolve_credentials_dir(&config, config_path);
    if !credentials.exists() {
        std::fs::create_dir_all(&credentials).with_context(|| {
            format!("creating credentials directory {}", credentials.display())
        })?;
        log::info!("created credentials directory at {}", credentials.display());
    } else {
        log::debug!(
            "credentials directory already exists at {}, skipping",
            credentials.display()
        );
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_defaults_and_credentials_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("nested").join("config.json");
        assert!(require_initialized(&config_path).is_err());

        let dir = init_config_dir(&config_path).unwrap();
        assert_eq!(dir, tmp.path().join("nested"));
        assert!(dir.join("credentials").is_dir());
        require_initialized(&config_path).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
        assert_eq!(written["gateway"]["port"], 18790);
        assert_eq!(written["bridge"]["enabled"], true);
    }

    #[test]
    fn init_keeps_existing_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.json");
        std::fs::write(&config_path, r#"{"credentials":{"directory":"auth"}}"#).unwrap();

        init_config_dir(&config_path).unwrap();
        assert!(tmp.path().join("auth").is_dir());
        assert!(!tmp.path().join("credentials").exists());
        let raw = std::fs::read_to_string(&config_path).unwrap();
        assert!(raw.contains("\"auth\""));
    }
}
