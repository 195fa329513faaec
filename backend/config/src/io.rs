//! Config file location and loading.

use crate::schema::UltraVisionConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Default config file name within the config directory.
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Resolve the UltraVision config directory.
/// Priority: `ULTRAVISION_CONFIG_DIR` env > `~/.ultravision/`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ULTRAVISION_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    match dirs::home_dir() {
        Some(home) => home.join(".ultravision"),
        None => PathBuf::from(".ultravision"),
    }
}

/// Resolve the full path to the main config file.
pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Load and parse the config from disk.
///
/// Returns `Ok(Default::default())` if the file doesn't exist.
pub async fn load_config(path: &Path) -> Result<UltraVisionConfig> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(UltraVisionConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Parse YAML text. An empty document is the default config.
pub fn parse_config(raw: &str) -> Result<UltraVisionConfig> {
    if raw.trim().is_empty() {
        return Ok(UltraVisionConfig::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}
