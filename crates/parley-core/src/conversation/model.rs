//! Conversation domain model.
//!
//! This module contains the canonical persisted conversation record and the
//! draft shape surfaces hand to the history service when saving.

use super::message::{Message, MessageRole};
use super::provider::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The canonical persisted unit of chat history.
///
/// Serialized in camelCase because the same records are read by every
/// surface sharing the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique conversation identifier
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Normalized provider
    pub provider: Provider,
    /// Normalized model id
    pub model: String,
    /// Last save time (RFC 3339)
    pub timestamp: String,
    /// Ordered message list, never empty for a valid record
    pub messages: Vec<Message>,
    /// Set on records produced by the legacy migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated: Option<bool>,
    /// When the legacy migration produced this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<String>,
}

impl Conversation {
    /// Parses the record timestamp.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// Content of the first user message, if any.
    pub fn first_user_message(&self) -> Option<&str> {
        first_user_message(&self.messages)
    }

    /// The (message count, first user message) pair used to spot duplicates.
    pub fn content_fingerprint(&self) -> (usize, Option<&str>) {
        (self.messages.len(), self.first_user_message())
    }

    /// Returns true when both message lists match role-for-role and
    /// content-for-content.
    pub fn has_same_messages(&self, messages: &[Message]) -> bool {
        self.messages.len() == messages.len()
            && self
                .messages
                .iter()
                .zip(messages)
                .all(|(a, b)| a.same_content(b))
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            provider: self.provider,
            model: self.model.clone(),
            timestamp: self.timestamp.clone(),
            message_count: self.messages.len(),
        }
    }
}

/// List-view projection of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub provider: Provider,
    pub model: String,
    pub timestamp: String,
    pub message_count: usize,
}

/// Input to `save_conversation`.
///
/// Every field except `messages` is optional; the history service fills in
/// ids, titles, providers and models.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationDraft {
    pub id: Option<String>,
    pub title: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub messages: Vec<Message>,
}

impl ConversationDraft {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl From<&Conversation> for ConversationDraft {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: Some(conversation.id.clone()),
            title: Some(conversation.title.clone()),
            provider: Some(conversation.provider.to_string()),
            model: Some(conversation.model.clone()),
            messages: conversation.messages.clone(),
        }
    }
}

pub(crate) fn first_user_message(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
}

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Formats a timestamp the way records store it (RFC 3339, millisecond precision).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Generates a fresh conversation id.
pub fn generate_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
