//! Application configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Override for the toolchain environment root (default `~/.sketchforge`)
    pub env_root: Option<PathBuf>,
    /// Override for the sketch-library directory (default `~/Arduino`)
    pub library_dir: Option<PathBuf>,
    /// Port monitor configuration
    pub ports: PortConfig,
    /// Build configuration
    pub build: BuildConfig,
}

/// Port-monitor related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Background poll cadence in seconds
    pub poll_interval_secs: u64,
}

/// Build-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Board used when the UI has not picked one yet
    pub default_board: Option<String>,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            default_board: None,
        }
    }
}

impl AppConfig {
    /// Path of the user config file.
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(crate::APP_NAME).join("config.toml"))
    }

    /// Load the user config, falling back to defaults when the file is
    /// missing or unreadable. A malformed file is logged, not fatal.
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Ignoring malformed config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}
