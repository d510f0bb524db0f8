//! Legacy record layouts.
//!
//! Older releases stored chat history in several shapes. Each shape is a
//! serde DTO plus a [`LegacyLayout`] that recognizes it and extracts a
//! [`LegacyRecord`]; the migrator turns that into a canonical conversation.

use chrono::{DateTime, Utc};
use parley_core::conversation::{parse_timestamp_value, Message, MessageRole};
use serde::Deserialize;
use serde_json::Value;

/// What a legacy layout could extract from one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyRecord {
    pub id: Option<String>,
    pub title: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Message timestamps may be blank; the migrator fills them in
    pub messages: Vec<Message>,
}

/// One known legacy record shape.
pub trait LegacyLayout: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `record` looks like this layout.
    fn matches(&self, record: &Value) -> bool;

    /// Extracts the record. Only called when [`matches`](Self::matches) held.
    fn extract(&self, record: &Value) -> Result<LegacyRecord, String>;
}

/// The built-in layouts, in the order they are tried.
pub fn default_layouts() -> Vec<Box<dyn LegacyLayout>> {
    vec![
        Box::new(MessagesLayout),
        Box::new(ExchangeLayout),
        Box::new(TranscriptLayout),
    ]
}

/// Fields every layout may carry next to its messages.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecordMeta {
    id: Option<Value>,
    #[serde(alias = "name")]
    title: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    #[serde(alias = "createdAt", alias = "date")]
    timestamp: Option<Value>,
}

impl RecordMeta {
    fn read(record: &Value) -> Result<Self, String> {
        Self::deserialize(record).map_err(|e| e.to_string())
    }

    fn into_record(self, messages: Vec<Message>) -> LegacyRecord {
        LegacyRecord {
            id: self.id.as_ref().and_then(id_string),
            title: self.title.filter(|t| !t.trim().is_empty()),
            provider: self.provider,
            model: self.model,
            timestamp: self.timestamp.as_ref().and_then(parse_timestamp_value),
            messages,
        }
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn message_timestamp(raw: Option<&Value>) -> String {
    raw.and_then(parse_timestamp_value)
        .map(parley_core::conversation::format_timestamp)
        .unwrap_or_default()
}

// ============================================================================
// { messages: [{ role, content }] }
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessagesRecord {
    messages: Vec<LooseMessage>,
}

#[derive(Debug, Deserialize)]
struct LooseMessage {
    #[serde(alias = "sender")]
    role: Option<String>,
    #[serde(alias = "text")]
    content: Option<String>,
    timestamp: Option<Value>,
}

/// Records that already carry a `messages` array, possibly with loose role
/// names or `text` instead of `content`.
pub struct MessagesLayout;

impl LegacyLayout for MessagesLayout {
    fn name(&self) -> &'static str {
        "messages"
    }

    fn matches(&self, record: &Value) -> bool {
        record.get("messages").is_some_and(Value::is_array)
    }

    fn extract(&self, record: &Value) -> Result<LegacyRecord, String> {
        let parsed = MessagesRecord::deserialize(record).map_err(|e| e.to_string())?;
        let messages = parsed
            .messages
            .into_iter()
            .filter_map(|m| {
                let role = MessageRole::parse_loose(m.role.as_deref()?)?;
                let content = m.content.filter(|c| !c.trim().is_empty())?;
                Some(Message::new(role, content, message_timestamp(m.timestamp.as_ref())))
            })
            .collect();
        Ok(RecordMeta::read(record)?.into_record(messages))
    }
}

// ============================================================================
// { question, answer }
// ============================================================================

#[derive(Debug, Deserialize)]
struct ExchangeRecord {
    #[serde(alias = "prompt")]
    question: Option<String>,
    #[serde(alias = "response")]
    answer: Option<String>,
}

/// Single question/answer pairs.
pub struct ExchangeLayout;

impl LegacyLayout for ExchangeLayout {
    fn name(&self) -> &'static str {
        "exchange"
    }

    fn matches(&self, record: &Value) -> bool {
        ["question", "prompt"].iter().any(|k| record.get(k).is_some())
    }

    fn extract(&self, record: &Value) -> Result<LegacyRecord, String> {
        let parsed = ExchangeRecord::deserialize(record).map_err(|e| e.to_string())?;
        let mut messages = Vec::new();
        if let Some(question) = parsed.question.filter(|q| !q.trim().is_empty()) {
            messages.push(Message::user(question, ""));
            if let Some(answer) = parsed.answer.filter(|a| !a.trim().is_empty()) {
                messages.push(Message::assistant(answer, ""));
            }
        }
        Ok(RecordMeta::read(record)?.into_record(messages))
    }
}

// ============================================================================
// { chat: [{ sender, text }] }
// ============================================================================

#[derive(Debug, Deserialize)]
struct TranscriptRecord {
    #[serde(alias = "history")]
    chat: Vec<TranscriptEntry>,
}

#[derive(Debug, Deserialize)]
struct TranscriptEntry {
    #[serde(alias = "from")]
    sender: Option<String>,
    #[serde(alias = "message")]
    text: Option<String>,
    #[serde(alias = "time")]
    timestamp: Option<Value>,
}

/// Chat transcripts keyed by sender.
pub struct TranscriptLayout;

impl LegacyLayout for TranscriptLayout {
    fn name(&self) -> &'static str {
        "transcript"
    }

    fn matches(&self, record: &Value) -> bool {
        ["chat", "history"]
            .iter()
            .any(|k| record.get(k).is_some_and(Value::is_array))
    }

    fn extract(&self, record: &Value) -> Result<LegacyRecord, String> {
        let parsed = TranscriptRecord::deserialize(record).map_err(|e| e.to_string())?;
        let messages = parsed
            .chat
            .into_iter()
            .filter_map(|entry| {
                let role = MessageRole::parse_loose(entry.sender.as_deref()?)?;
                let text = entry.text.filter(|t| !t.trim().is_empty())?;
                Some(Message::new(role, text, message_timestamp(entry.timestamp.as_ref())))
            })
            .collect();
        Ok(RecordMeta::read(record)?.into_record(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn first_match(record: &Value) -> Option<&'static str> {
        default_layouts()
            .iter()
            .find(|layout| layout.matches(record))
            .map(|layout| layout.name())
    }

    #[test]
    fn test_layout_detection() {
        assert_eq!(first_match(&json!({"messages": []})), Some("messages"));
        assert_eq!(first_match(&json!({"prompt": "hi"})), Some("exchange"));
        assert_eq!(first_match(&json!({"history": [{"from": "me"}]})), Some("transcript"));
        assert_eq!(first_match(&json!({"body": "?"})), None);
        assert_eq!(first_match(&json!(42)), None);
    }

    #[test]
    fn test_messages_layout_accepts_loose_messages() {
        let record = json!({
            "id": 7,
            "name": "Old chat",
            "createdAt": 1700000000000i64,
            "messages": [
                {"sender": "human", "text": "Hello"},
                {"role": "bot", "content": "Hi there", "timestamp": "2023-11-14T22:13:20Z"},
                {"role": "narrator", "content": "dropped"},
                {"role": "user", "content": "   "}
            ]
        });
        let extracted = MessagesLayout.extract(&record).unwrap();
        assert_eq!(extracted.id.as_deref(), Some("7"));
        assert_eq!(extracted.title.as_deref(), Some("Old chat"));
        assert!(extracted.timestamp.is_some());
        assert_eq!(extracted.messages.len(), 2);
        assert_eq!(extracted.messages[0].role, MessageRole::User);
        assert_eq!(extracted.messages[0].timestamp, "");
        assert_eq!(extracted.messages[1].timestamp, "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn test_exchange_layout() {
        let extracted = ExchangeLayout
            .extract(&json!({"question": "What is Rust?", "response": "A language", "provider": "claude"}))
            .unwrap();
        assert_eq!(extracted.messages.len(), 2);
        assert_eq!(extracted.messages[1].content, "A language");
        assert_eq!(extracted.provider.as_deref(), Some("claude"));

        let unanswered = ExchangeLayout.extract(&json!({"prompt": "Anyone?"})).unwrap();
        assert_eq!(unanswered.messages.len(), 1);
    }

    #[test]
    fn test_transcript_layout() {
        let extracted = TranscriptLayout
            .extract(&json!({
                "chat": [
                    {"sender": "user", "text": "Ping"},
                    {"from": "ai", "message": "Pong"}
                ]
            }))
            .unwrap();
        assert_eq!(extracted.messages.len(), 2);
        assert_eq!(extracted.messages[1].role, MessageRole::Assistant);
    }

    #[test]
    fn test_mistyped_fields_are_errors() {
        assert!(MessagesLayout.extract(&json!({"messages": [], "title": 5})).is_err());
    }
}
