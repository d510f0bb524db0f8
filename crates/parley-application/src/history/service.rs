//! Conversation history service.
//!
//! Owns the bounded, timestamp-ordered list of conversations stored under the
//! history key, plus the single "recent conversation" slot. Reads degrade to
//! empty results when the backend fails; writes propagate the error.

use super::cache::HistoryCache;
use super::query::{self, HistoryStatistics, SearchOptions};
use parley_core::clock::{Clock, SystemClock};
use parley_core::config::HistoryConfig;
use parley_core::conversation::{
    format_timestamp, generate_conversation_id, generate_title, normalize_model,
    normalize_provider, normalize_title, parse_record, validate_history, Conversation,
    ConversationDraft, Message,
};
use parley_core::error::{ParleyError, Result};
use parley_core::signal::{RefreshReason, Signal, SignalBus};
use parley_core::storage::KeyValueStore;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a committed write does to the recent slot.
enum Recent {
    Keep,
    Set(Conversation),
    Clear,
}

pub struct HistoryService {
    storage: Arc<dyn KeyValueStore>,
    bus: Arc<dyn SignalBus>,
    clock: Arc<dyn Clock>,
    cache: HistoryCache,
    config: HistoryConfig,
}

impl HistoryService {
    pub fn new(storage: Arc<dyn KeyValueStore>, bus: Arc<dyn SignalBus>, config: HistoryConfig) -> Self {
        Self::with_clock(storage, bus, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<dyn KeyValueStore>,
        bus: Arc<dyn SignalBus>,
        config: HistoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = HistoryCache::new(Arc::clone(&clock), config.cache_ttl());
        Self {
            storage,
            bus,
            clock,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.storage
    }

    /// The history list, newest first.
    ///
    /// Served from the cache while fresh. Otherwise the stored array is
    /// validated, repaired in storage if anything had to be dropped, sorted
    /// and cached. Backend failures yield an empty list.
    pub async fn get_history(&self) -> Vec<Conversation> {
        match self.try_get_history().await {
            Ok(history) => history,
            Err(e) => {
                warn!("[HistoryService] Failed to read history: {}", e);
                Vec::new()
            }
        }
    }

    /// Like [`get_history`](Self::get_history), but surfaces backend errors.
    pub async fn try_get_history(&self) -> Result<Vec<Conversation>> {
        if let Some(cached) = self.cache.history().await {
            return Ok(cached);
        }

        let generation = self.cache.generation();
        let history = self.read_history().await?;
        self.cache.store_history(generation, history.clone()).await;
        Ok(history)
    }

    /// Saves a draft, returning the conversation id.
    ///
    /// Returns `Ok(None)` for a draft without messages. A draft whose id
    /// matches a stored record updates it; so does an id-less draft whose
    /// messages equal a stored record's. Anything else is prepended.
    pub async fn save_conversation(&self, draft: ConversationDraft) -> Result<Option<String>> {
        if draft.messages.is_empty() {
            debug!("[HistoryService] Ignoring save of conversation without messages");
            return Ok(None);
        }

        let mut history = self.read_history().await?;
        let timestamp = format_timestamp(self.clock.now());

        let draft_id = draft
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let existing = match &draft_id {
            Some(id) => history.iter().position(|c| &c.id == id),
            None => history
                .iter()
                .position(|c| c.has_same_messages(&draft.messages)),
        };

        let messages = stamp_messages(draft.messages, &timestamp);
        let explicit_title = draft
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let conversation = match existing {
            Some(index) => {
                let mut record = history.remove(index);
                if let Some(provider) = draft.provider.as_deref() {
                    record.provider = normalize_provider(Some(provider));
                }
                if draft.model.is_some() || draft.provider.is_some() {
                    record.model = normalize_model(
                        record.provider,
                        draft.model.as_deref().or(Some(record.model.as_str())),
                    );
                }
                record.messages = messages;
                if self.config.auto_title {
                    record.title = generate_title(&record.messages);
                } else if let Some(title) = explicit_title {
                    record.title = title;
                }
                record.timestamp = timestamp.clone();
                debug!("[HistoryService] Updating conversation '{}'", record.id);
                record
            }
            None => {
                let provider = normalize_provider(draft.provider.as_deref());
                let title = match explicit_title {
                    Some(title) if !self.config.auto_title => title,
                    _ => generate_title(&messages),
                };
                let id = draft_id.unwrap_or_else(generate_conversation_id);
                debug!("[HistoryService] Creating conversation '{}'", id);
                Conversation {
                    id,
                    title,
                    provider,
                    model: normalize_model(provider, draft.model.as_deref()),
                    timestamp: timestamp.clone(),
                    messages,
                    migrated: None,
                    migrated_at: None,
                }
            }
        };

        history.insert(0, conversation.clone());
        self.cap(&mut history);
        self.commit(history, Recent::Set(conversation.clone())).await?;

        info!("[HistoryService] Saved conversation '{}'", conversation.id);
        let id = conversation.id.clone();
        self.bus.emit(Signal::ConversationSaved {
            id: id.clone(),
            conversation,
            timestamp,
        });
        Ok(Some(id))
    }

    /// Looks up a conversation and makes it the recent one.
    pub async fn load_conversation(&self, id: &str) -> Option<Conversation> {
        let conversation = self.get_history().await.into_iter().find(|c| c.id == id)?;

        match self.remember_recent(&conversation).await {
            Ok(()) => self.cache.store_recent(Some(conversation.clone())).await,
            Err(e) => warn!("[HistoryService] Failed to update recent conversation: {}", e),
        }

        self.bus.emit(Signal::ConversationLoaded {
            id: conversation.id.clone(),
            conversation: conversation.clone(),
            timestamp: self.now(),
        });
        Some(conversation)
    }

    /// Removes a conversation. Returns `false`, without writing, when absent.
    pub async fn delete_conversation(&self, id: &str) -> Result<bool> {
        let mut history = self.read_history().await?;
        let Some(index) = history.iter().position(|c| c.id == id) else {
            debug!("[HistoryService] Delete of unknown conversation '{}'", id);
            return Ok(false);
        };
        history.remove(index);

        let recent = if self.recent_id().await?.as_deref() == Some(id) {
            Recent::Clear
        } else {
            Recent::Keep
        };
        self.commit(history, recent).await?;

        info!("[HistoryService] Deleted conversation '{}'", id);
        self.bus.emit(Signal::ConversationDeleted {
            id: id.to_string(),
            timestamp: self.now(),
        });
        Ok(true)
    }

    /// Renames a conversation; a blank title becomes "Untitled Conversation".
    pub async fn update_conversation_title(&self, id: &str, title: &str) -> Result<bool> {
        let mut history = self.read_history().await?;
        let Some(record) = history.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        record.title = normalize_title(title);
        let updated = record.clone();

        let recent = if self.recent_id().await?.as_deref() == Some(id) {
            Recent::Set(updated.clone())
        } else {
            Recent::Keep
        };
        self.commit(history, recent).await?;

        self.bus.emit(Signal::TitleUpdated {
            id: id.to_string(),
            title: updated.title,
            timestamp: self.now(),
        });
        Ok(true)
    }

    pub async fn search_conversations(&self, term: &str, options: SearchOptions) -> Vec<Conversation> {
        query::search(&self.get_history().await, term, &options)
    }

    pub async fn get_statistics(&self) -> HistoryStatistics {
        query::statistics(&self.get_history().await)
    }

    /// The conversation last saved or loaded, if still stored.
    pub async fn get_recent_conversation(&self) -> Option<Conversation> {
        if let Some(cached) = self.cache.recent().await {
            return cached;
        }

        let recent = match self.storage.get_one(&self.config.recent_key).await {
            Ok(Some(value)) => parse_record(&value)
                .map_err(|reason| debug!("[HistoryService] Ignoring invalid recent slot: {}", reason))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("[HistoryService] Failed to read recent conversation: {}", e);
                return None;
            }
        };
        self.cache.store_recent(recent.clone()).await;
        recent
    }

    /// Removes every conversation and the recent slot.
    pub async fn clear_history(&self) -> Result<()> {
        self.commit(Vec::new(), Recent::Clear).await?;
        info!("[HistoryService] Cleared history");
        self.emit_updated(RefreshReason::LocalChange);
        Ok(())
    }

    /// The stored history as pretty-printed JSON.
    pub async fn export_history(&self) -> Result<String> {
        let history = self.read_history().await?;
        Ok(serde_json::to_string_pretty(&history)?)
    }

    /// Imports conversations from JSON, returning how many were added.
    ///
    /// Accepts an array of records or an object with a `conversations`
    /// array. Invalid records are skipped, as are records whose id or
    /// content fingerprint is already stored.
    pub async fn import_history(&self, json: &str) -> Result<usize> {
        let parsed: Value = serde_json::from_str(json)?;
        let records = match parsed {
            Value::Array(items) => Value::Array(items),
            Value::Object(mut obj) => match obj.remove("conversations") {
                Some(records @ Value::Array(_)) => records,
                _ => {
                    return Err(ParleyError::validation(
                        "import must be an array or an object with a 'conversations' array",
                    ))
                }
            },
            _ => return Err(ParleyError::validation("import must be a JSON array or object")),
        };

        let incoming = validate_history(Some(&records));
        let mut history = self.read_history().await?;
        let mut ids: HashSet<String> = history.iter().map(|c| c.id.clone()).collect();
        let mut fingerprints: HashSet<(usize, Option<String>)> =
            history.iter().map(owned_fingerprint).collect();

        let mut imported = 0;
        for conversation in incoming.conversations {
            let fingerprint = owned_fingerprint(&conversation);
            if ids.contains(&conversation.id) || fingerprints.contains(&fingerprint) {
                debug!("[HistoryService] Skipping already stored conversation '{}'", conversation.id);
                continue;
            }
            ids.insert(conversation.id.clone());
            fingerprints.insert(fingerprint);
            history.push(conversation);
            imported += 1;
        }

        if imported > 0 {
            self.cap(&mut history);
            self.commit(history, Recent::Keep).await?;
            self.emit_updated(RefreshReason::LocalChange);
        }
        info!(
            "[HistoryService] Imported {} conversation(s), {} invalid record(s) skipped",
            imported, incoming.dropped
        );
        Ok(imported)
    }

    /// Forces the next read to go to storage.
    pub async fn invalidate_cache(&self) {
        self.cache.invalidate().await;
    }

    /// The stored history value exactly as the backend holds it.
    pub async fn raw_history(&self) -> Result<Option<Value>> {
        self.storage.get_one(&self.config.history_key).await
    }

    /// Reads, validates and sorts the stored history, propagating backend
    /// errors. Writes a corrected array back when validation dropped
    /// anything.
    pub(crate) async fn read_history(&self) -> Result<Vec<Conversation>> {
        let raw = self.raw_history().await?;
        let validated = validate_history(raw.as_ref());
        let needs_repair = validated.needs_repair();
        let (dropped, malformed) = (validated.dropped, validated.malformed);
        let mut history = validated.conversations;

        if needs_repair {
            warn!(
                "[HistoryService] Repairing stored history ({} record(s) dropped, malformed: {})",
                dropped, malformed
            );
            let repaired = serde_json::to_value(&history)?;
            if let Err(e) = self.storage.set_one(&self.config.history_key, repaired).await {
                warn!("[HistoryService] Failed to write repaired history: {}", e);
            }
        }

        sort_newest_first(&mut history);
        Ok(history)
    }

    /// Sorts newest first and trims to `max_history`.
    pub(crate) fn cap(&self, history: &mut Vec<Conversation>) {
        sort_newest_first(history);
        if history.len() > self.config.max_history {
            debug!(
                "[HistoryService] Evicting {} conversation(s) over the limit of {}",
                history.len() - self.config.max_history,
                self.config.max_history
            );
            history.truncate(self.config.max_history);
        }
    }

    /// Replaces the stored history wholesale, leaving the recent slot alone.
    pub(crate) async fn replace_history(&self, mut history: Vec<Conversation>, reason: RefreshReason) -> Result<()> {
        self.cap(&mut history);
        self.commit(history, Recent::Keep).await?;
        self.emit_updated(reason);
        Ok(())
    }

    /// Persists `history` (and the recent slot) and refreshes the cache.
    async fn commit(&self, history: Vec<Conversation>, recent: Recent) -> Result<()> {
        let mut items = HashMap::from([(
            self.config.history_key.clone(),
            serde_json::to_value(&history)?,
        )]);
        if let Recent::Set(conversation) = &recent {
            items.insert(self.config.recent_key.clone(), serde_json::to_value(conversation)?);
        }
        self.storage.set(items).await?;
        if let Recent::Clear = recent {
            self.storage.remove(&[self.config.recent_key.as_str()]).await?;
        }

        self.cache.invalidate().await;
        self.cache.store_history(self.cache.generation(), history).await;
        match recent {
            Recent::Set(conversation) => self.cache.store_recent(Some(conversation)).await,
            Recent::Clear => self.cache.store_recent(None).await,
            Recent::Keep => {}
        }
        Ok(())
    }

    async fn remember_recent(&self, conversation: &Conversation) -> Result<()> {
        let value = serde_json::to_value(conversation)?;
        self.storage.set_one(&self.config.recent_key, value).await
    }

    async fn recent_id(&self) -> Result<Option<String>> {
        let recent = self.storage.get_one(&self.config.recent_key).await?;
        Ok(recent.and_then(|value| {
            value.get("id").and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        }))
    }

    fn emit_updated(&self, reason: RefreshReason) {
        self.bus.emit(Signal::HistoryUpdated {
            reason,
            timestamp: self.now(),
        });
    }

    pub(crate) fn now(&self) -> String {
        format_timestamp(self.clock.now())
    }
}

/// Stable sort by timestamp, newest first.
pub fn sort_newest_first(history: &mut [Conversation]) {
    history.sort_by(|a, b| b.parsed_timestamp().cmp(&a.parsed_timestamp()));
}

fn stamp_messages(messages: Vec<Message>, timestamp: &str) -> Vec<Message> {
    messages
        .into_iter()
        .map(|mut message| {
            if message.timestamp.trim().is_empty() {
                message.timestamp = timestamp.to_string();
            }
            message
        })
        .collect()
}

pub(crate) fn owned_fingerprint(conversation: &Conversation) -> (usize, Option<String>) {
    let (count, first) = conversation.content_fingerprint();
    (count, first.map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use parley_core::clock::ManualClock;
    use parley_core::conversation::{Provider, UNTITLED_TITLE};
    use parley_core::storage::StorageChange;
    use parley_infrastructure::{BroadcastSignalBus, MemoryKeyValueStore};
    use serde_json::json;
    use tokio::sync::broadcast;

    struct Fixture {
        storage: Arc<MemoryKeyValueStore>,
        bus: Arc<BroadcastSignalBus>,
        clock: Arc<ManualClock>,
        service: HistoryService,
    }

    fn fixture_with(config: HistoryConfig) -> Fixture {
        let storage = Arc::new(MemoryKeyValueStore::default());
        let bus = Arc::new(BroadcastSignalBus::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let service = HistoryService::with_clock(storage.clone(), bus.clone(), config, clock.clone());
        Fixture {
            storage,
            bus,
            clock,
            service,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(HistoryConfig::default())
    }

    fn chat(first: &str) -> Vec<Message> {
        vec![Message::user(first, ""), Message::assistant("Hello", "")]
    }

    #[tokio::test]
    async fn test_save_defaults_title_provider_and_model() {
        let f = fixture();
        let id = f
            .service
            .save_conversation(ConversationDraft::new(chat("Hi")).with_id("c1"))
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("c1"));

        let history = f.service.get_history().await;
        assert_eq!(history[0].title, "Hi");
        assert_eq!(history[0].provider, Provider::OpenAi);
        assert_eq!(history[0].model, "gpt-3.5-turbo");
        assert!(history[0].messages.iter().all(|m| !m.timestamp.is_empty()));
    }

    #[tokio::test]
    async fn test_save_then_load_returns_same_messages() {
        let f = fixture();
        let messages = chat("What is a monad?");
        let id = f
            .service
            .save_conversation(ConversationDraft::new(messages.clone()))
            .await
            .unwrap()
            .unwrap();

        let loaded = f.service.load_conversation(&id).await.unwrap();
        assert!(loaded.has_same_messages(&messages));
        assert_eq!(f.service.get_recent_conversation().await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_empty_draft_is_rejected_without_write() {
        let f = fixture();
        let saved = f.service.save_conversation(ConversationDraft::default()).await.unwrap();
        assert!(saved.is_none());
        assert!(f.storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_save_with_existing_id_updates_in_place() {
        let f = fixture();
        let draft = ConversationDraft::new(chat("Hi")).with_id("c1").with_provider("claude");
        f.service.save_conversation(draft).await.unwrap();

        f.clock.advance(Duration::seconds(5));
        let mut longer = chat("Hi");
        longer.push(Message::user("More", ""));
        f.service
            .save_conversation(ConversationDraft::new(longer).with_id("c1"))
            .await
            .unwrap();

        let history = f.service.get_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].messages.len(), 3);
        assert_eq!(history[0].provider, Provider::Anthropic);
        assert_eq!(history[0].timestamp, "2024-03-01T12:00:05.000Z");
    }

    #[tokio::test]
    async fn test_idless_draft_with_same_messages_is_deduplicated() {
        let f = fixture();
        let first = f
            .service
            .save_conversation(ConversationDraft::new(chat("Hi")))
            .await
            .unwrap();
        let second = f
            .service
            .save_conversation(ConversationDraft::new(chat("Hi")))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(f.service.get_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_capped_to_most_recent() {
        let f = fixture_with(HistoryConfig {
            max_history: 3,
            ..Default::default()
        });
        for i in 0..5 {
            f.clock.advance(Duration::seconds(1));
            f.service
                .save_conversation(ConversationDraft::new(chat(&format!("q{}", i))).with_id(format!("c{}", i)))
                .await
                .unwrap();
        }

        let ids: Vec<String> = f.service.get_history().await.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c4", "c3", "c2"]);
        let stored = f.storage.get_one("chat_history").await.unwrap().unwrap();
        assert_eq!(stored.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_removes_and_clears_recent() {
        let f = fixture();
        f.service
            .save_conversation(ConversationDraft::new(chat("Hi")).with_id("c1"))
            .await
            .unwrap();

        assert!(f.service.delete_conversation("c1").await.unwrap());
        assert!(f.service.get_history().await.iter().all(|c| c.id != "c1"));
        assert!(f.storage.get_one("recent_conversation").await.unwrap().is_none());
        assert!(f.service.get_recent_conversation().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_unknown_id_returns_false_without_write() {
        let f = fixture();
        f.service
            .save_conversation(ConversationDraft::new(chat("Hi")).with_id("c1"))
            .await
            .unwrap();
        let mut changes = f.storage.changes();

        assert!(!f.service.delete_conversation("nope").await.unwrap());
        assert!(changes.try_recv().is_err());
        assert_eq!(f.service.get_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_title_becomes_untitled() {
        let f = fixture();
        f.service
            .save_conversation(ConversationDraft::new(chat("Hi")).with_id("c1"))
            .await
            .unwrap();

        assert!(f.service.update_conversation_title("c1", "   ").await.unwrap());
        assert_eq!(f.service.get_history().await[0].title, UNTITLED_TITLE);
        assert_eq!(f.service.get_recent_conversation().await.unwrap().title, UNTITLED_TITLE);
        assert!(!f.service.update_conversation_title("missing", "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_history_reads_empty_and_is_repaired() {
        let f = fixture();
        f.storage.seed("chat_history", json!("not an array")).await;

        assert!(f.service.get_history().await.is_empty());
        assert_eq!(f.storage.get_one("chat_history").await.unwrap(), Some(json!([])));
    }

    #[tokio::test]
    async fn test_invalid_and_duplicate_records_are_dropped() {
        let f = fixture();
        f.storage
            .seed(
                "chat_history",
                json!([
                    {"id": "a", "timestamp": "2024-01-01T00:00:00Z", "messages": [{"role": "user", "content": "x"}], "provider": "OpenAI", "model": "unknown"},
                    {"id": "a", "timestamp": "2024-01-02T00:00:00Z", "messages": [{"role": "user", "content": "y"}]},
                    {"id": "b", "timestamp": "2024-01-03T00:00:00Z", "messages": []},
                    {"timestamp": "2024-01-03T00:00:00Z", "messages": [{"role": "user", "content": "z"}]}
                ]),
            )
            .await;

        let history = f.service.get_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].provider, Provider::OpenAi);
        assert_eq!(history[0].model, "gpt-3.5-turbo");
        let stored = f.storage.get_one("chat_history").await.unwrap().unwrap();
        assert_eq!(stored.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_served_until_invalidated_or_expired() {
        let f = fixture();
        f.service
            .save_conversation(ConversationDraft::new(chat("Hi")).with_id("c1"))
            .await
            .unwrap();

        // Out-of-band write the service has not observed.
        f.storage.seed("chat_history", json!([])).await;
        assert_eq!(f.service.get_history().await.len(), 1);

        f.clock.advance(Duration::minutes(5));
        assert!(f.service.get_history().await.is_empty());

        f.storage
            .seed(
                "chat_history",
                json!([{"id": "x", "timestamp": "2024-01-01T00:00:00Z", "messages": [{"role": "user", "content": "x"}]}]),
            )
            .await;
        f.service.invalidate_cache().await;
        assert_eq!(f.service.get_history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_emit_signals() {
        let f = fixture();
        let mut signals = f.bus.subscribe();

        f.service
            .save_conversation(ConversationDraft::new(chat("Hi")).with_id("c1"))
            .await
            .unwrap();
        f.service.load_conversation("c1").await.unwrap();
        f.service.update_conversation_title("c1", "Renamed").await.unwrap();
        f.service.delete_conversation("c1").await.unwrap();

        let mut names = Vec::new();
        while let Ok(signal) = signals.try_recv() {
            names.push(signal.name());
        }
        assert_eq!(
            names,
            vec![
                "conversation:saved",
                "conversation:loaded",
                "conversation:titleUpdated",
                "conversation:deleted"
            ]
        );
    }

    #[tokio::test]
    async fn test_search_and_statistics_use_history() {
        let f = fixture();
        f.service
            .save_conversation(ConversationDraft::new(chat("Rust traits")).with_provider("gemini"))
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(1));
        f.service
            .save_conversation(ConversationDraft::new(chat("Baking bread")))
            .await
            .unwrap();

        let found = f.service.search_conversations("rust", SearchOptions::default()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider, Provider::Gemini);

        let stats = f.service.get_statistics().await;
        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.newest_conversation.as_deref(), Some("2024-03-01T12:00:01.000Z"));
    }

    #[tokio::test]
    async fn test_export_then_import_skips_existing() {
        let f = fixture();
        f.service
            .save_conversation(ConversationDraft::new(chat("Hi")).with_id("c1"))
            .await
            .unwrap();
        let exported = f.service.export_history().await.unwrap();

        assert_eq!(f.service.import_history(&exported).await.unwrap(), 0);

        let other = fixture();
        assert_eq!(other.service.import_history(&exported).await.unwrap(), 1);
        assert_eq!(other.service.get_history().await[0].id, "c1");

        let wrapped = json!({"conversations": [
            {"id": "n1", "timestamp": "2024-01-01T00:00:00Z", "messages": [{"role": "user", "content": "new"}]},
            {"id": "bad"}
        ]});
        assert_eq!(other.service.import_history(&wrapped.to_string()).await.unwrap(), 1);
        assert!(other.service.import_history("42").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_clear_history() {
        let f = fixture();
        f.service
            .save_conversation(ConversationDraft::new(chat("Hi")))
            .await
            .unwrap();
        f.service.clear_history().await.unwrap();
        assert!(f.service.get_history().await.is_empty());
        assert!(f.service.get_recent_conversation().await.is_none());
    }

    #[tokio::test]
    async fn test_auto_title_regenerates_on_update() {
        let f = fixture_with(HistoryConfig {
            auto_title: true,
            ..Default::default()
        });
        f.service
            .save_conversation(ConversationDraft::new(chat("First question")).with_id("c1").with_title("Manual"))
            .await
            .unwrap();
        assert_eq!(f.service.get_history().await[0].title, "First question");
    }

    /// Backend whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        fn area(&self) -> &str {
            "local"
        }

        async fn get(&self, _keys: &[&str]) -> Result<HashMap<String, Value>> {
            Err(ParleyError::storage("backend offline"))
        }

        async fn set(&self, _items: HashMap<String, Value>) -> Result<()> {
            Err(ParleyError::storage("backend offline"))
        }

        async fn remove(&self, _keys: &[&str]) -> Result<()> {
            Err(ParleyError::storage("backend offline"))
        }

        fn changes(&self) -> broadcast::Receiver<StorageChange> {
            broadcast::channel(1).1
        }
    }

    #[tokio::test]
    async fn test_backend_failures_degrade_reads_and_fail_writes() {
        let service = HistoryService::new(
            Arc::new(BrokenStore),
            Arc::new(BroadcastSignalBus::new()),
            HistoryConfig::default(),
        );

        assert!(service.get_history().await.is_empty());
        assert!(service.load_conversation("c1").await.is_none());
        assert!(service.get_recent_conversation().await.is_none());

        let err = service
            .save_conversation(ConversationDraft::new(chat("Hi")))
            .await
            .unwrap_err();
        assert!(err.is_storage());
        assert!(service.delete_conversation("c1").await.is_err());
    }
}
