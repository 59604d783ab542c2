//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the Flickr API key, album sizing, and network limits.
//!
//! Configuration is stored at `~/.config/pincache/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "pincache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// SQLite database file name inside the data directory
const DATABASE_FILE: &str = "pincache.sqlite";

/// Environment variable that overrides the configured API key
pub const API_KEY_ENV: &str = "PINCACHE_API_KEY";

/// Upper bound on photos kept per pin.
pub const DEFAULT_MAX_ALBUM_SIZE: usize = 50;

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum concurrent image downloads per album fetch.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 10;

/// Half extent of the photo search box around a pin, in degrees.
pub const DEFAULT_BBOX_HALF_EXTENT: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub max_album_size: usize,
    pub request_timeout_secs: u64,
    pub download_concurrency: usize,
    /// Seconds between background flushes to disk; 0 disables autosave.
    pub autosave_secs: u64,
    pub bbox_half_width: f64,
    pub bbox_half_height: f64,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            max_album_size: DEFAULT_MAX_ALBUM_SIZE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            autosave_secs: 0,
            bbox_half_width: DEFAULT_BBOX_HALF_EXTENT,
            bbox_half_height: DEFAULT_BBOX_HALF_EXTENT,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load config from the default location, applying environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        Ok(config)
    }

    /// Load config from a specific file, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(DATABASE_FILE))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Album cap, never below one photo.
    pub fn album_limit(&self) -> usize {
        self.max_album_size.max(1)
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_secs > 0).then(|| Duration::from_secs(self.autosave_secs))
    }
}

// ============================================================================
// Tests
// ============================================================================
