//! In-memory key-value backend.

use async_trait::async_trait;
use parley_core::storage::{KeyValueStore, StorageChange, DEFAULT_CHANGE_CHANNEL_CAPACITY};
use parley_core::Result;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// A [`KeyValueStore`] held entirely in process memory.
///
/// Several handles can share one instance (via `Arc`) to stand in for the
/// surfaces of a client sharing one backing store.
pub struct MemoryKeyValueStore {
    area: String,
    values: RwLock<HashMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryKeyValueStore {
    pub fn new(area: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(DEFAULT_CHANGE_CHANNEL_CAPACITY);
        Self {
            area: area.into(),
            values: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Seeds a value without emitting a change event.
    pub async fn seed(&self, key: impl Into<String>, value: Value) {
        self.values.write().await.insert(key.into(), value);
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }

    fn publish(&self, key: String, old_value: Option<Value>, new_value: Option<Value>) {
        // No receivers is fine.
        let _ = self.changes.send(StorageChange {
            area: self.area.clone(),
            key,
            old_value,
            new_value,
        });
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new("local")
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    fn area(&self) -> &str {
        &self.area
    }

    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let values = self.values.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| values.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: HashMap<String, Value>) -> Result<()> {
        let mut changed = Vec::new();
        {
            let mut values = self.values.write().await;
            for (key, value) in items {
                let old = values.insert(key.clone(), value.clone());
                if old.as_ref() != Some(&value) {
                    changed.push((key, old, value));
                }
            }
        }
        for (key, old, new) in changed {
            self.publish(key, old, Some(new));
        }
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut removed = Vec::new();
        {
            let mut values = self.values.write().await;
            for key in keys {
                if let Some(old) = values.remove(*key) {
                    removed.push((key.to_string(), old));
                }
            }
        }
        for (key, old) in removed {
            self.publish(key, Some(old), None);
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
