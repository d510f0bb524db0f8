//! Validation of stored conversation records.
//!
//! The backing store is shared with other surfaces and older releases, so
//! nothing read from it is trusted. [`validate_history`] turns whatever is
//! stored under the history key into canonical [`Conversation`]s, reporting
//! what had to be dropped so the caller can write a corrected array back.

use super::message::{Message, MessageRole};
use super::model::{format_timestamp, parse_timestamp, Conversation};
use super::provider::{normalize_model, normalize_provider};
use super::title::generate_title;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashSet;

/// Outcome of validating the stored history value.
#[derive(Debug, Clone, Default)]
pub struct ValidatedHistory {
    /// Valid records, in stored order
    pub conversations: Vec<Conversation>,
    /// Number of records that failed validation or duplicated an id
    pub dropped: usize,
    /// True when the stored value was present but not an array
    pub malformed: bool,
}

impl ValidatedHistory {
    /// Whether the stored value differs from what validation kept.
    pub fn needs_repair(&self) -> bool {
        self.malformed || self.dropped > 0
    }
}

/// Validates the raw value stored under the history key.
///
/// A missing value is an empty history. Anything other than an array is
/// treated as corrupt and yields an empty, `malformed` history.
pub fn validate_history(raw: Option<&Value>) -> ValidatedHistory {
    let items = match raw {
        None | Some(Value::Null) => return ValidatedHistory::default(),
        Some(Value::Array(items)) => items,
        Some(other) => {
            tracing::warn!(
                "[Validation] Stored history is not an array (found {}), resetting",
                value_kind(other)
            );
            return ValidatedHistory {
                malformed: true,
                ..Default::default()
            };
        }
    };

    let mut seen = HashSet::new();
    let mut result = ValidatedHistory::default();

    for (index, item) in items.iter().enumerate() {
        match parse_record(item) {
            Ok(conversation) => {
                if seen.insert(conversation.id.clone()) {
                    result.conversations.push(conversation);
                } else {
                    tracing::debug!(
                        "[Validation] Dropping duplicate conversation id '{}' at index {}",
                        conversation.id,
                        index
                    );
                    result.dropped += 1;
                }
            }
            Err(reason) => {
                tracing::debug!("[Validation] Dropping record at index {}: {}", index, reason);
                result.dropped += 1;
            }
        }
    }

    result
}

/// Parses a single stored record into a canonical conversation.
pub fn parse_record(value: &Value) -> Result<Conversation, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("expected object, found {}", value_kind(value)))?;

    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err("missing id".to_string()),
    };

    let timestamp = obj
        .get("timestamp")
        .and_then(parse_timestamp_value)
        .ok_or_else(|| format!("conversation '{}' has no valid timestamp", id))?;
    let timestamp = format_timestamp(timestamp);

    let messages = obj
        .get("messages")
        .and_then(Value::as_array)
        .map(|raw| parse_messages(raw, &timestamp))
        .unwrap_or_default();
    if messages.is_empty() {
        return Err(format!("conversation '{}' has no messages", id));
    }

    let provider = normalize_provider(obj.get("provider").and_then(Value::as_str));
    let model = normalize_model(provider, obj.get("model").and_then(Value::as_str));

    let title = match obj.get("title").and_then(Value::as_str).map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => generate_title(&messages),
    };

    Ok(Conversation {
        id,
        title,
        provider,
        model,
        timestamp,
        messages,
        migrated: obj.get("migrated").and_then(Value::as_bool),
        migrated_at: obj
            .get("migratedAt")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Parses stored messages, dropping entries without a known role or text
/// content. Missing message timestamps inherit `fallback_timestamp`.
pub fn parse_messages(raw: &[Value], fallback_timestamp: &str) -> Vec<Message> {
    raw.iter()
        .filter_map(|item| {
            let role = item
                .get("role")
                .and_then(Value::as_str)
                .and_then(MessageRole::parse_loose)?;
            let content = item.get("content").and_then(Value::as_str)?;
            let timestamp = item
                .get("timestamp")
                .and_then(parse_timestamp_value)
                .map(format_timestamp)
                .unwrap_or_else(|| fallback_timestamp.to_string());
            Some(Message::new(role, content, timestamp))
        })
        .collect()
}

/// Accepts RFC 3339 strings, numeric strings and epoch milliseconds.
pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s).or_else(|| {
            s.trim()
                .parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        }),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// JSON type name of `value`, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
