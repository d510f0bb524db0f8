//! Composition root for CLI commands.

use anyhow::{Context, Result};
use parley_application::{HistoryService, LegacyMigrator};
use parley_core::config::ParleyConfig;
use parley_infrastructure::{BroadcastSignalBus, ConfigService, JsonFileKeyValueStore, ParleyPaths};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct AppContext {
    pub config: ParleyConfig,
    pub bus: Arc<BroadcastSignalBus>,
    pub history: Arc<HistoryService>,
}

impl AppContext {
    pub fn open(config_path: Option<&Path>) -> Result<Self> {
        let config_service = match config_path {
            Some(path) => ConfigService::with_path(path),
            None => ConfigService::new(),
        };
        let config = config_service.get_config();

        let store_path = ParleyPaths::store_file(&config).context("Failed to resolve store file")?;
        debug!("[CLI] Using store {}", store_path.display());
        let storage = Arc::new(JsonFileKeyValueStore::new(
            store_path,
            config.storage.area.clone(),
        ));
        let bus = Arc::new(BroadcastSignalBus::new());
        let history = Arc::new(HistoryService::new(
            storage,
            bus.clone(),
            config.history.clone(),
        ));

        Ok(Self {
            config,
            bus,
            history,
        })
    }

    pub fn migrator(&self) -> LegacyMigrator {
        LegacyMigrator::new(self.history.clone(), self.config.migration.clone())
    }

    /// Runs the startup migration when legacy data is present.
    pub async fn auto_migrate(&self) {
        if let Some(report) = self.migrator().auto_migrate().await {
            info!(
                "[CLI] Migrated {} legacy conversation(s) on startup",
                report.migrated
            );
        }
    }
}
