//! Persisting and hydrating the state tree through a key-value backend.

use super::action::Action;
use super::container::Store;
use super::state::StateTree;
use crate::conversation::format_timestamp;
use crate::error::{ParleyError, Result};
use crate::storage::KeyValueStore;
use chrono::Utc;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Version of the persisted state envelope.
///
/// Stored envelopes with a different major version are refused by `hydrate`.
pub const STATE_SCHEMA_VERSION: &str = "1.0.0";

/// Backend key the state tree is persisted under by default.
pub const DEFAULT_STATE_KEY: &str = "app_state";

#[derive(Debug, Clone)]
pub struct PersistOptions {
    pub key: String,
    /// Domains to persist; empty means all
    pub include: Vec<String>,
    /// Domains never persisted
    pub exclude: Vec<String>,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            key: DEFAULT_STATE_KEY.to_string(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HydrateOptions {
    pub key: String,
    /// Merge stored substates over current ones instead of replacing them
    pub merge: bool,
}

impl Default for HydrateOptions {
    fn default() -> Self {
        Self {
            key: DEFAULT_STATE_KEY.to_string(),
            merge: true,
        }
    }
}

/// The stored form of a persisted state tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub saved_at: Option<String>,
    pub state: Value,
}

fn default_schema_version() -> String {
    STATE_SCHEMA_VERSION.to_string()
}

impl Store {
    fn storage(&self) -> Result<Arc<dyn KeyValueStore>> {
        self.inner
            .storage
            .clone()
            .ok_or_else(|| ParleyError::config("store was built without a storage backend"))
    }

    /// Writes the (filtered) state tree and dispatches `store/PERSISTED`.
    pub async fn persist(&self, options: PersistOptions) -> Result<()> {
        let storage = self.storage()?;
        let state = self.get_state().filtered(&options.include, &options.exclude);
        let domains: Vec<String> = state.domain_names().map(str::to_string).collect();

        let envelope = PersistedState {
            schema_version: STATE_SCHEMA_VERSION.to_string(),
            saved_at: Some(format_timestamp(Utc::now())),
            state: state.to_value(),
        };
        storage
            .set_one(&options.key, serde_json::to_value(&envelope)?)
            .await?;
        debug!("[Store] Persisted {} domain(s) under '{}'", domains.len(), options.key);

        self.dispatch(Action::persisted(json!({
            "key": options.key,
            "domains": domains,
        })))?;
        Ok(())
    }

    /// Restores state written by [`Store::persist`].
    ///
    /// Returns `false` when nothing is stored under the key. Domains absent
    /// from storage keep their current state.
    pub async fn hydrate(&self, options: HydrateOptions) -> Result<bool> {
        let storage = self.storage()?;
        let Some(raw) = storage.get_one(&options.key).await? else {
            debug!("[Store] Nothing to hydrate under '{}'", options.key);
            return Ok(false);
        };

        let envelope: PersistedState = serde_json::from_value(raw)?;
        check_schema_version(&envelope.schema_version)?;
        let stored = StateTree::from_value(envelope.state)?;

        let current = self.get_state();
        let mut payload = Map::new();
        for (domain, substate) in stored.iter() {
            let next = if options.merge {
                merge_substate(current.get(domain).map(|v| v.as_ref()), substate)
            } else {
                (**substate).clone()
            };
            payload.insert(domain.to_string(), next);
        }

        info!(
            "[Store] Hydrating {} domain(s) from '{}' (merge: {})",
            payload.len(),
            options.key,
            options.merge
        );
        self.dispatch(
            Action::reset(Value::Object(payload))
                .with_meta("source", json!("hydrate"))
                .with_meta("key", json!(options.key)),
        )?;
        Ok(true)
    }
}

fn check_schema_version(stored: &str) -> Result<()> {
    let stored = Version::parse(stored)?;
    let current = Version::parse(STATE_SCHEMA_VERSION)?;
    if stored.major != current.major {
        return Err(ParleyError::migration(format!(
            "persisted state schema {} is incompatible with {}",
            stored, current
        )));
    }
    Ok(())
}

/// Shallow object merge of `stored` over `current`.
fn merge_substate(current: Option<&Value>, stored: &Value) -> Value {
    match (current, stored) {
        (Some(Value::Object(current)), Value::Object(stored)) => {
            let mut merged = current.clone();
            for (key, value) in stored {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => stored.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StorageChange, DEFAULT_CHANGE_CHANNEL_CAPACITY};
    use crate::store::reducer::{CombinedReducer, Reducer};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct MapStore {
        values: Mutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl KeyValueStore for MapStore {
        fn area(&self) -> &str {
            "local"
        }

        async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
            let values = self.values.lock().unwrap();
            Ok(keys
                .iter()
                .filter_map(|k| values.get(*k).map(|v| (k.to_string(), v.clone())))
                .collect())
        }

        async fn set(&self, items: HashMap<String, Value>) -> Result<()> {
            self.values.lock().unwrap().extend(items);
            Ok(())
        }

        async fn remove(&self, keys: &[&str]) -> Result<()> {
            let mut values = self.values.lock().unwrap();
            for key in keys {
                values.remove(*key);
            }
            Ok(())
        }

        fn changes(&self) -> broadcast::Receiver<StorageChange> {
            broadcast::channel(DEFAULT_CHANGE_CHANNEL_CAPACITY).1
        }
    }

    fn reducer() -> CombinedReducer {
        CombinedReducer::new()
            .with_domain("settings", Reducer::new(json!({"theme": "light", "font": 12})))
            .with_domain("ui", Reducer::new(json!({"open": false})))
    }

    fn store_with(storage: Arc<MapStore>) -> Store {
        Store::builder(reducer()).storage(storage).build()
    }

    #[tokio::test]
    async fn test_persist_writes_envelope() {
        let storage = Arc::new(MapStore::default());
        let store = store_with(storage.clone());
        store
            .persist(PersistOptions {
                exclude: vec!["ui".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();

        let stored = storage.get_one(DEFAULT_STATE_KEY).await.unwrap().unwrap();
        assert_eq!(stored["schemaVersion"], STATE_SCHEMA_VERSION);
        assert!(stored["savedAt"].is_string());
        assert_eq!(stored["state"], json!({"settings": {"theme": "light", "font": 12}}));
    }

    #[tokio::test]
    async fn test_hydrate_missing_key_is_noop() {
        let store = store_with(Arc::new(MapStore::default()));
        let before = store.state_ref();
        assert!(!store.hydrate(HydrateOptions::default()).await.unwrap());
        assert!(Arc::ptr_eq(&before, &store.state_ref()));
    }

    #[tokio::test]
    async fn test_hydrate_merges_by_default() {
        let storage = Arc::new(MapStore::default());
        storage
            .set_one(
                DEFAULT_STATE_KEY,
                json!({"schemaVersion": "1.2.0", "state": {"settings": {"theme": "dark"}}}),
            )
            .await
            .unwrap();
        let store = store_with(storage);
        let ui_before = store.get_state();

        assert!(store.hydrate(HydrateOptions::default()).await.unwrap());
        let state = store.get_state();
        assert_eq!(state.lookup("settings.theme"), Some(&json!("dark")));
        assert_eq!(state.lookup("settings.font"), Some(&json!(12)));
        assert!(state.same_domain(&ui_before, "ui"));
    }

    #[tokio::test]
    async fn test_hydrate_without_merge_replaces_domains() {
        let storage = Arc::new(MapStore::default());
        storage
            .set_one(DEFAULT_STATE_KEY, json!({"state": {"settings": {"theme": "dark"}}}))
            .await
            .unwrap();
        let store = store_with(storage);

        store
            .hydrate(HydrateOptions {
                merge: false,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.get_state().lookup("settings"), Some(&json!({"theme": "dark"})));
    }

    #[tokio::test]
    async fn test_persist_then_hydrate_round_trip() {
        let storage = Arc::new(MapStore::default());
        let first = Store::builder(reducer())
            .storage(storage.clone())
            .preloaded_state(StateTree::from_value(json!({"ui": {"open": true}})).unwrap())
            .build();
        first.persist(PersistOptions::default()).await.unwrap();

        let second = store_with(storage);
        second.hydrate(HydrateOptions::default()).await.unwrap();
        assert_eq!(second.get_state(), first.get_state());
    }

    #[tokio::test]
    async fn test_hydrate_refuses_other_major_version() {
        let storage = Arc::new(MapStore::default());
        storage
            .set_one(DEFAULT_STATE_KEY, json!({"schemaVersion": "2.0.0", "state": {}}))
            .await
            .unwrap();
        let err = store_with(storage)
            .hydrate(HydrateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Migration(_)));
    }

    #[tokio::test]
    async fn test_persist_without_backend_is_config_error() {
        let store = Store::builder(reducer()).build();
        let err = store.persist(PersistOptions::default()).await.unwrap_err();
        assert!(matches!(err, ParleyError::Config(_)));
    }
}
