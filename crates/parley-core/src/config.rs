//! Configuration model.
//!
//! Loaded from `config.toml` by the infrastructure layer. Every field has a
//! default, so a missing file or a partial file is always valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Keys older releases stored chat history under.
pub const LEGACY_HISTORY_KEYS: [&str; 3] = ["chatHistory", "conversations", "savedChats"];

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ParleyConfig {
    pub history: HistoryConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub migration: MigrationConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Upper bound on stored conversations
    pub max_history: usize,
    /// Seconds a materialized history list stays fresh
    pub cache_ttl_secs: u64,
    /// Regenerate titles on every save
    pub auto_title: bool,
    pub history_key: String,
    pub recent_key: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            cache_ttl_secs: 300,
            auto_title: false,
            history_key: "chat_history".to_string(),
            recent_key: "recent_conversation".to_string(),
        }
    }
}

impl HistoryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub debounce_ms: u64,
    /// Zero turns the periodic poll off
    pub poll_interval_secs: u64,
    /// Disables the periodic poll when false
    pub poll_enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            poll_interval_secs: 30,
            poll_enabled: true,
        }
    }
}

impl SyncConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Poll period, or `None` when polling is off.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_enabled && self.poll_interval_secs > 0)
            .then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage area name carried on change events
    pub area: String,
    /// JSON file backing the store; the data directory is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            area: "local".to_string(),
            path: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MigrationConfig {
    /// Run the legacy migration when a surface starts
    pub auto_migrate: bool,
    pub delete_legacy_keys: bool,
    pub legacy_keys: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            auto_migrate: true,
            delete_legacy_keys: false,
            legacy_keys: LEGACY_HISTORY_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let config = ParleyConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: ParleyConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: ParleyConfig = toml::from_str(
            r#"
            [history]
            max_history = 10

            [sync]
            debounce_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.history.max_history, 10);
        assert_eq!(config.history.history_key, "chat_history");
        assert_eq!(config.sync.debounce_window(), Duration::from_millis(100));
        assert_eq!(config.sync.poll_interval(), Some(Duration::from_secs(30)));
        assert!(config.migration.auto_migrate);
    }

    #[test]
    fn test_zero_or_disabled_poll_has_no_interval() {
        let zero: ParleyConfig = toml::from_str("[sync]\npoll_interval_secs = 0").unwrap();
        assert_eq!(zero.sync.poll_interval(), None);

        let off: ParleyConfig = toml::from_str("[sync]\npoll_enabled = false").unwrap();
        assert_eq!(off.sync.poll_interval(), None);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: ParleyConfig = toml::from_str("").unwrap();
        assert_eq!(config, ParleyConfig::default());
    }
}
