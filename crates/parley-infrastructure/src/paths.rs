//! Platform paths for Parley files.
//!
//! ```text
//! ~/.config/parley/            # Config directory
//! └── config.toml              # ParleyConfig
//!
//! ~/.local/share/parley/       # Data directory
//! └── store.json               # Default JSON key-value backend
//! ```

use parley_core::config::ParleyConfig;
use parley_core::{ParleyError, Result};
use std::path::PathBuf;

const APP_DIR: &str = "parley";
const CONFIG_FILE: &str = "config.toml";
const STORE_FILE: &str = "store.json";

pub struct ParleyPaths;

impl ParleyPaths {
    /// e.g. `~/.config/parley/`
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| ParleyError::config("Cannot find config directory"))
    }

    /// e.g. `~/.local/share/parley/`
    pub fn data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or_else(|| ParleyError::config("Cannot find data directory"))
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// The JSON backend file: `storage.path` when set, else the data directory.
    pub fn store_file(config: &ParleyConfig) -> Result<PathBuf> {
        match &config.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join(STORE_FILE)),
        }
    }
}
