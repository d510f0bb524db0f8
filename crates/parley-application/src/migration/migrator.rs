use super::layouts::{default_layouts, LegacyLayout, LegacyRecord};
use crate::history::{owned_fingerprint, HistoryService};
use parley_core::config::MigrationConfig;
use parley_core::conversation::{
    format_timestamp, generate_title, normalize_model, normalize_provider, value_kind, Conversation,
    Message,
};
use parley_core::error::Result;
use parley_core::signal::RefreshReason;
use parley_core::storage::is_truthy;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Remove legacy keys once their records are migrated
    pub delete_legacy_keys: bool,
}

/// A legacy record that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationError {
    /// Legacy key the record was stored under
    pub key: String,
    /// Array index or object key of the record within the legacy value
    pub record: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub migrated: usize,
    /// Records without messages plus duplicates of stored conversations
    pub skipped: usize,
    pub errors: Vec<MigrationError>,
    pub removed_keys: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.migrated == 0 && self.removed_keys.is_empty()
    }
}

/// Moves chat history stored by older releases into the current history.
///
/// Safe to run on every startup: records already present, by id or by
/// content, are skipped, so a second run without new legacy data writes
/// nothing.
pub struct LegacyMigrator {
    history: Arc<HistoryService>,
    config: MigrationConfig,
    layouts: Vec<Box<dyn LegacyLayout>>,
}

impl LegacyMigrator {
    pub fn new(history: Arc<HistoryService>, config: MigrationConfig) -> Self {
        Self {
            history,
            config,
            layouts: default_layouts(),
        }
    }

    /// Tries `layout` after the built-in ones.
    pub fn with_layout(mut self, layout: Box<dyn LegacyLayout>) -> Self {
        self.layouts.push(layout);
        self
    }

    fn legacy_keys(&self) -> Vec<&str> {
        self.config.legacy_keys.iter().map(String::as_str).collect()
    }

    /// Whether any legacy key holds data.
    pub async fn is_migration_needed(&self) -> bool {
        match self.history.storage().get(&self.legacy_keys()).await {
            Ok(values) => values.values().any(is_truthy),
            Err(e) => {
                warn!("[Migration] Failed to probe legacy keys: {}", e);
                false
            }
        }
    }

    pub async fn migrate_chat_history(&self, options: MigrationOptions) -> Result<MigrationReport> {
        let keys = self.legacy_keys();
        let legacy = self.history.storage().get(&keys).await?;
        let mut history = self.history.read_history().await?;

        let mut ids: HashSet<String> = history.iter().map(|c| c.id.clone()).collect();
        let mut fingerprints: HashSet<(usize, Option<String>)> =
            history.iter().map(owned_fingerprint).collect();

        let mut report = MigrationReport::default();
        let mut migrated_ids = Vec::new();
        let mut failed_keys = HashSet::new();
        let now = self.history.now();

        for key in &keys {
            let Some(value) = legacy.get(*key).filter(|v| is_truthy(v)) else {
                continue;
            };
            let errors_before = report.errors.len();

            let records = match legacy_records(value) {
                Ok(records) => records,
                Err(reason) => {
                    report.errors.push(MigrationError {
                        key: key.to_string(),
                        record: "*".to_string(),
                        reason,
                    });
                    failed_keys.insert(*key);
                    continue;
                }
            };
            debug!("[Migration] Found {} legacy record(s) under '{}'", records.len(), key);

            for (label, fallback_id, record) in records {
                let conversation = match self.convert(&record, fallback_id, &now) {
                    Ok(Some(conversation)) => conversation,
                    Ok(None) => {
                        debug!("[Migration] Skipping {}[{}]: no messages", key, label);
                        report.skipped += 1;
                        continue;
                    }
                    Err(reason) => {
                        warn!("[Migration] Failed to migrate {}[{}]: {}", key, label, reason);
                        report.errors.push(MigrationError {
                            key: key.to_string(),
                            record: label,
                            reason,
                        });
                        continue;
                    }
                };

                let fingerprint = owned_fingerprint(&conversation);
                if ids.contains(&conversation.id) || fingerprints.contains(&fingerprint) {
                    debug!("[Migration] Skipping {}[{}]: already stored", key, label);
                    report.skipped += 1;
                    continue;
                }
                ids.insert(conversation.id.clone());
                fingerprints.insert(fingerprint);
                migrated_ids.push(conversation.id.clone());
                history.push(conversation);
            }

            if report.errors.len() > errors_before {
                failed_keys.insert(*key);
            }
        }

        // Legacy records evicted by the cap count as skipped.
        self.history.cap(&mut history);
        let kept: HashSet<&str> = history.iter().map(|c| c.id.as_str()).collect();
        report.migrated = migrated_ids.iter().filter(|id| kept.contains(id.as_str())).count();
        let evicted = migrated_ids.len() - report.migrated;
        if evicted > 0 {
            debug!("[Migration] {} legacy record(s) fall outside the history limit", evicted);
            report.skipped += evicted;
        }

        if report.migrated > 0 {
            self.history
                .replace_history(history, RefreshReason::Migration)
                .await?;
        }

        if options.delete_legacy_keys {
            let removable: Vec<&str> = keys
                .iter()
                .copied()
                .filter(|k| legacy.contains_key(*k) && !failed_keys.contains(k))
                .collect();
            if !removable.is_empty() {
                self.history.storage().remove(&removable).await?;
                report.removed_keys = removable.iter().map(|k| k.to_string()).collect();
            }
        }

        info!(
            "[Migration] Migrated {} conversation(s), skipped {}, {} error(s)",
            report.migrated,
            report.skipped,
            report.errors.len()
        );
        Ok(report)
    }

    /// Migrates when legacy data exists and auto migration is enabled.
    pub async fn auto_migrate(&self) -> Option<MigrationReport> {
        if !self.config.auto_migrate || !self.is_migration_needed().await {
            return None;
        }
        let options = MigrationOptions {
            delete_legacy_keys: self.config.delete_legacy_keys,
        };
        match self.migrate_chat_history(options).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("[Migration] Automatic migration failed: {}", e);
                None
            }
        }
    }

    /// Converts one legacy record. `Ok(None)` means nothing to migrate.
    fn convert(
        &self,
        record: &Value,
        fallback_id: Option<String>,
        now: &str,
    ) -> std::result::Result<Option<Conversation>, String> {
        if !record.is_object() {
            return Err(format!("expected object, found {}", value_kind(record)));
        }
        let layout = self
            .layouts
            .iter()
            .find(|layout| layout.matches(record))
            .ok_or_else(|| "unrecognized record layout".to_string())?;
        let extracted = layout.extract(record)?;
        if extracted.messages.is_empty() {
            return Ok(None);
        }
        Ok(Some(into_conversation(extracted, fallback_id, now)))
    }
}

fn into_conversation(record: LegacyRecord, fallback_id: Option<String>, now: &str) -> Conversation {
    let legacy_timestamp = record.timestamp.map(format_timestamp);
    let timestamp = legacy_timestamp.clone().unwrap_or_else(|| now.to_string());
    let messages: Vec<Message> = record
        .messages
        .into_iter()
        .map(|mut m| {
            if m.timestamp.is_empty() {
                m.timestamp = timestamp.clone();
            }
            m
        })
        .collect();

    let id = record.id.or(fallback_id).unwrap_or_else(|| {
        let first = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        legacy_id(first, legacy_timestamp.as_deref().unwrap_or_default())
    });
    let provider = normalize_provider(record.provider.as_deref());
    let model = normalize_model(provider, record.model.as_deref());
    let title = record.title.unwrap_or_else(|| generate_title(&messages));

    Conversation {
        id,
        title,
        provider,
        model,
        timestamp,
        messages,
        migrated: Some(true),
        migrated_at: Some(now.to_string()),
    }
}

/// Flattens a legacy value into `(label, id from object key, record)`.
///
/// Values may be an array of records, an id-to-record object, or either of
/// those serialized as a JSON string.
fn legacy_records(value: &Value) -> std::result::Result<Vec<(String, Option<String>, Value)>, String> {
    match value {
        Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, record)| (i.to_string(), None, record.clone()))
            .collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, record)| (k.clone(), Some(k.clone()), record.clone()))
            .collect()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed @ (Value::Array(_) | Value::Object(_))) => legacy_records(&parsed),
            Ok(other) => Err(format!("legacy value decodes to {}", value_kind(&other))),
            Err(e) => Err(format!("legacy value is not JSON: {}", e)),
        },
        other => Err(format!("unsupported legacy value: {}", value_kind(other))),
    }
}

/// Stable id for a legacy record without one.
///
/// 32-bit `h = h * 31 + c` over the UTF-16 units of the first message
/// content followed by the record's own timestamp (empty when it has none),
/// rendered in base 36.
pub fn legacy_id(first_content: &str, timestamp: &str) -> String {
    let hash = first_content
        .encode_utf16()
        .chain(timestamp.encode_utf16())
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32));
    format!("legacy-{}", to_base36(hash.unsigned_abs()))
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
