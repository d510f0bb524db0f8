use chrono::{DateTime, Duration, Utc};
use parley_core::clock::Clock;
use parley_core::conversation::Conversation;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A cached value with an absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// In-memory TTL cache for the materialized history list and the recent slot.
///
/// Every invalidation bumps a generation counter. A reader that started
/// before an invalidation passes the generation it saw to
/// [`HistoryCache::store_history`], which then refuses to repopulate the
/// cache with the stale list.
pub struct HistoryCache {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    history: RwLock<Option<CacheEntry<Vec<Conversation>>>>,
    recent: RwLock<Option<CacheEntry<Option<Conversation>>>>,
    generation: AtomicU64,
}

impl HistoryCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: std::time::Duration) -> Self {
        Self {
            clock,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(5)),
            history: RwLock::new(None),
            recent: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// The current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The cached list, if present and unexpired.
    pub async fn history(&self) -> Option<Vec<Conversation>> {
        let now = self.clock.now();
        let entry = self.history.read().await;
        entry
            .as_ref()
            .filter(|e| e.is_fresh(now))
            .map(|e| e.value.clone())
    }

    /// Caches `value` unless the cache was invalidated since `generation`.
    pub async fn store_history(&self, generation: u64, value: Vec<Conversation>) -> bool {
        let mut entry = self.history.write().await;
        if self.generation() != generation {
            return false;
        }
        *entry = Some(self.entry(value));
        true
    }

    /// The cached recent slot; `Some(None)` caches an empty slot.
    pub async fn recent(&self) -> Option<Option<Conversation>> {
        let now = self.clock.now();
        let entry = self.recent.read().await;
        entry
            .as_ref()
            .filter(|e| e.is_fresh(now))
            .map(|e| e.value.clone())
    }

    pub async fn store_recent(&self, value: Option<Conversation>) {
        let mut entry = self.recent.write().await;
        *entry = Some(self.entry(value));
    }

    /// Drops both entries.
    pub async fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.history.write().await = None;
        *self.recent.write().await = None;
    }

    fn entry<T>(&self, value: T) -> CacheEntry<T> {
        CacheEntry {
            value,
            expires_at: self.clock.now() + self.ttl,
        }
    }
}
