//! Key-value backend abstraction.
//!
//! Defines the interface the Store and the history service persist through.
//! The backend is shared by every surface of the client, so implementations
//! also publish a change stream that lets each surface notice writes made by
//! the others.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Default capacity for change notification channels.
pub const DEFAULT_CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// A single key mutation observed on the backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    /// Named storage area the key lives in (e.g. "local")
    pub area: String,
    /// The mutated key
    pub key: String,
    /// Value before the write, `None` if the key did not exist
    pub old_value: Option<Value>,
    /// Value after the write, `None` if the key was removed
    pub new_value: Option<Value>,
}

impl StorageChange {
    pub fn touches(&self, area: &str, keys: &[&str]) -> bool {
        self.area == area && keys.iter().any(|k| *k == self.key)
    }
}

/// An opaque asynchronous key-value store scoped to one storage area.
///
/// # Implementation Notes
///
/// Implementations should:
/// - Return only the keys that exist from `get`
/// - Apply `set` as a single write (all keys or none)
/// - Emit one [`StorageChange`] per key that actually changed
///
/// No transactions are assumed: concurrent writers are last-write-wins.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Name of the storage area this backend is scoped to.
    fn area(&self) -> &str;

    /// Reads the given keys. Missing keys are absent from the returned map.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    /// Writes all entries.
    async fn set(&self, items: HashMap<String, Value>) -> Result<()>;

    /// Removes the given keys. Missing keys are ignored.
    async fn remove(&self, keys: &[&str]) -> Result<()>;

    /// Subscribes to change notifications for this area.
    fn changes(&self) -> broadcast::Receiver<StorageChange>;

    /// Reads a single key.
    async fn get_one(&self, key: &str) -> Result<Option<Value>> {
        let mut values = self.get(&[key]).await?;
        Ok(values.remove(key))
    }

    /// Writes a single key.
    async fn set_one(&self, key: &str, value: Value) -> Result<()> {
        self.set(HashMap::from([(key.to_string(), value)])).await
    }
}

/// JavaScript-style truthiness used when probing legacy keys.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
