//! Configuration service implementation.
//!
//! Loads [`ParleyConfig`] from `config.toml` (by default
//! `~/.config/parley/config.toml`) and caches it.

use crate::paths::ParleyPaths;
use crate::storage::atomic_file::{read_optional, write_atomic, FileLock};
use parley_core::config::ParleyConfig;
use parley_core::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Loads and caches the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigService {
    path: Option<PathBuf>,
    /// Cached configuration, filled on first access
    config: Arc<RwLock<Option<ParleyConfig>>>,
}

impl ConfigService {
    /// Uses the platform config file.
    pub fn new() -> Self {
        Self {
            path: None,
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Uses an explicit config file.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the configuration, loading it if not cached.
    ///
    /// A missing file yields defaults. An unreadable or invalid file is
    /// logged and also yields defaults; use [`ConfigService::load`] to see
    /// the error.
    pub fn get_config(&self) -> ParleyConfig {
        {
            let cached = self.config.read().unwrap_or_else(|e| e.into_inner());
            if let Some(config) = cached.as_ref() {
                return config.clone();
            }
        }

        let loaded = self.load().unwrap_or_else(|e| {
            warn!("[ConfigService] Falling back to defaults: {}", e);
            ParleyConfig::default()
        });

        let mut cached = self.config.write().unwrap_or_else(|e| e.into_inner());
        *cached = Some(loaded.clone());
        loaded
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut cached = self.config.write().unwrap_or_else(|e| e.into_inner());
        *cached = None;
    }

    /// Reads the configuration file, bypassing the cache.
    pub fn load(&self) -> Result<ParleyConfig> {
        let path = self.config_path()?;
        match read_optional(&path)? {
            Some(content) => {
                debug!("[ConfigService] Loaded {}", path.display());
                Ok(toml::from_str(&content)?)
            }
            None => Ok(ParleyConfig::default()),
        }
    }

    /// Writes the configuration file and refreshes the cache.
    pub fn save(&self, config: &ParleyConfig) -> Result<()> {
        let path = self.config_path()?;
        let content = toml::to_string_pretty(config)?;
        {
            let _lock = FileLock::acquire(&path)?;
            write_atomic(&path, content.as_bytes())?;
        }

        let mut cached = self.config.write().unwrap_or_else(|e| e.into_inner());
        *cached = Some(config.clone());
        Ok(())
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => ParleyPaths::config_file(),
        }
    }

    /// Whether a config file exists at the resolved path.
    pub fn exists(&self) -> bool {
        self.config_path().map(|p| Path::exists(&p)).unwrap_or(false)
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}
