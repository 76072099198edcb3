//! Store configuration, read from `~/.peoplesync/config.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_thumbnail_dir")]
    pub thumbnail_dir: PathBuf,
    /// Coalescing window of the change notifier.
    #[serde(default = "default_notify_interval_ms")]
    pub notify_interval_ms: u64,
    #[serde(default = "default_change_log_page_size")]
    pub change_log_page_size: i64,
}

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".peoplesync")
}

fn default_database_path() -> PathBuf {
    data_dir().join("people.db")
}

fn default_thumbnail_dir() -> PathBuf {
    data_dir().join("thumbnails")
}

fn default_notify_interval_ms() -> u64 {
    1000
}

fn default_change_log_page_size() -> i64 {
    50
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            thumbnail_dir: default_thumbnail_dir(),
            notify_interval_ms: default_notify_interval_ms(),
            change_log_page_size: default_change_log_page_size(),
        }
    }
}

impl StoreConfig {
    pub fn notify_interval(&self) -> Duration {
        Duration::from_millis(self.notify_interval_ms)
    }
}

/// Load `~/.peoplesync/config.json`, falling back to defaults when absent.
pub fn load_config() -> Result<StoreConfig, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    load_config_from(&home.join(".peoplesync").join("config.json"))
}

pub fn load_config_from(path: &Path) -> Result<StoreConfig, ConfigError> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(StoreConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
