//! Configuration management.
//!
//! A small TOML file controls where the data directory lives and how often
//! the store's write-back loop flushes:
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//! flush_interval_secs = 1
//! ```
//!
//! Every field has a default, and a missing file is not an error: the CLI
//! runs fine with zero configuration.

use crate::errors::{PetError, Result};
use crate::store::StoreConfig;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSection,
}

/// The `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_flush_interval_secs() -> u64 {
    1
}

impl Default for StorageSection {
    fn default() -> Self {
        StorageSection {
            data_dir: default_data_dir(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config> {
        let body = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&body).map_err(|e| PetError::Validation(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Config> {
        if path.exists() {
            Config::load(path)
        } else {
            debug!("config {} absent, using defaults", path.display());
            Ok(Config::default())
        }
    }

    /// Write a starter config file (used by `pixelpet init`).
    pub fn write_starter(path: &Path) -> Result<()> {
        let body = toml::to_string_pretty(&Config::default())
            .map_err(|e| PetError::Validation(format!("config serialization: {e}")))?;
        std::fs::write(path, body)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.storage.flush_interval_secs == 0 {
            return Err(PetError::Validation(
                "flush_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Derive the store construction parameters.
    pub fn store_config(&self) -> StoreConfig {
        let mut store = StoreConfig::new(&self.storage.data_dir);
        store.flush_interval = Duration::from_secs(self.storage.flush_interval_secs);
        store
    }
}
