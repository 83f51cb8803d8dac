//! Configuration management for Wormhole Mobile.
//!
//! Two user preferences are persisted: the rendezvous URL and the code
//! length. Both fall back to the protocol defaults when unset.
//!
//! ## Configuration File Location
//!
//! The file is `wormhole-william.json` inside the application data
//! directory handed to the session controller. [`Config::default_data_dir`]
//! resolves a per-platform directory when the host does not supply one.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wormhole_mobile_core::config::Config;
//!
//! let mut config = Config::load(&data_dir)?;
//! config.code_length = 3;
//! config.save(&data_dir)?;
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::TransferSettings;

/// File name of the persisted configuration.
pub const CONFIG_FILE_NAME: &str = "wormhole-william.json";

/// User preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rendezvous server URL, empty for the protocol default
    pub rendezvous_url: String,
    /// Number of words in generated codes, 0 for the protocol default
    #[serde(rename = "code_len")]
    pub code_length: u32,
}

impl Config {
    /// Load configuration from `data_dir`.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = Self::config_path(data_dir);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration into `data_dir`.
    ///
    /// Creates the data directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::ConfigError(format!("Failed to create config directory: {e}")))?;

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(Self::config_path(data_dir), content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the full path to the configuration file inside `data_dir`.
    #[must_use]
    pub fn config_path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE_NAME)
    }

    /// Get the default application data directory.
    #[must_use]
    pub fn default_data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "sanford", "WormholeWilliam")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Settings snapshot handed to each new transfer.
    #[must_use]
    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            rendezvous_url: (!self.rendezvous_url.is_empty()).then(|| self.rendezvous_url.clone()),
            code_length: (self.code_length > 0).then_some(self.code_length),
        }
    }
}
