//! JSON-file key-value backend.
//!
//! The whole area is one JSON object on disk. Each write is a locked
//! read-modify-write followed by an atomic replace, so processes sharing the
//! file never corrupt it; the last writer wins.

use super::atomic_file::{read_optional, write_atomic, FileLock};
use async_trait::async_trait;
use parley_core::storage::{KeyValueStore, StorageChange, DEFAULT_CHANGE_CHANNEL_CAPACITY};
use parley_core::{ParleyError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

type Changes = Vec<(String, Option<Value>, Option<Value>)>;

pub struct JsonFileKeyValueStore {
    area: String,
    path: PathBuf,
    /// Serializes writers within this process
    write_lock: Mutex<()>,
    changes: broadcast::Sender<StorageChange>,
}

impl JsonFileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>, area: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(DEFAULT_CHANGE_CHANNEL_CAPACITY);
        Self {
            area: area.into(),
            path: path.into(),
            write_lock: Mutex::new(()),
            changes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn modify<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>) -> Changes + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();

        let changes = blocking(move || {
            let _lock = FileLock::acquire(&path)?;
            let mut map = load(&path)?;
            let changes = apply(&mut map);
            if !changes.is_empty() {
                write_atomic(&path, &serde_json::to_vec_pretty(&map)?)?;
            }
            Ok(changes)
        })
        .await?;

        debug!(
            "[JsonFileKeyValueStore] Wrote {} key(s) to {}",
            changes.len(),
            self.path.display()
        );
        for (key, old_value, new_value) in changes {
            let _ = self.changes.send(StorageChange {
                area: self.area.clone(),
                key,
                old_value,
                new_value,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileKeyValueStore {
    fn area(&self) -> &str {
        &self.area
    }

    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let path = self.path.clone();
        let mut map = blocking(move || load(&path)).await?;
        Ok(keys
            .iter()
            .filter_map(|key| map.remove(*key).map(|v| (key.to_string(), v)))
            .collect())
    }

    async fn set(&self, items: HashMap<String, Value>) -> Result<()> {
        self.modify(move |map| {
            let mut changes = Vec::new();
            for (key, value) in items {
                let old = map.insert(key.clone(), value.clone());
                if old.as_ref() != Some(&value) {
                    changes.push((key, old, Some(value)));
                }
            }
            changes
        })
        .await
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.modify(move |map| {
            keys.into_iter()
                .filter_map(|key| map.remove(&key).map(|old| (key, Some(old), None)))
                .collect()
        })
        .await
    }

    fn changes(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

fn load(path: &Path) -> Result<Map<String, Value>> {
    match read_optional(path)? {
        None => Ok(Map::new()),
        Some(content) => match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(ParleyError::storage(format!(
                "{} does not contain a JSON object",
                path.display()
            ))),
        },
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ParleyError::internal(format!("storage task failed: {}", e)))?
}
