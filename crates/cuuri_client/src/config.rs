//! Client config load/save for `~/.cuuri/client.yaml`.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:7878";
pub const DEFAULT_LOG_FILTER: &str = "warn";
pub const CONFIG_ENV: &str = "CUURI_CONFIG";

/// Where the backend bridge listens.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BridgeSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Chat preferences.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatSection {
    /// Preferred model; wins over the backend default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Logging defaults; `RUST_LOG` still wins.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LogSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub chat: ChatSection,
    #[serde(default)]
    pub log: LogSection,
}

impl Config {
    pub fn bridge_url(&self) -> &str {
        self.bridge.url.as_deref().unwrap_or(DEFAULT_BRIDGE_URL)
    }

    pub fn log_filter(&self) -> &str {
        self.log.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}

/// Returns the default config file path: `~/.cuuri/client.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(home.join(".cuuri").join("client.yaml"))
}

/// Resolve the config path: explicit override, then `CUURI_CONFIG`, then the
/// default location.
pub fn resolve_config_path(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = override_path {
        return Some(p.to_path_buf());
    }
    if let Some(val) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(val));
    }
    default_config_path()
}

/// Load config from a YAML file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Load config, falling back to defaults when the file does not exist.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        _ => load(path),
    }
}

/// Save config to a YAML file. Creates parent directory if missing.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Config load/save error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
