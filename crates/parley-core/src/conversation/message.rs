//! Conversation message types.
//!
//! This module contains types for representing messages in a conversation,
//! including roles and message content.

use serde::{Deserialize, Serialize};

/// Represents the role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System-generated message.
    System,
    /// Message from the user.
    User,
    /// Message from the AI assistant.
    Assistant,
}

impl MessageRole {
    /// Parses a loosely spelled role as found in stored or legacy records.
    ///
    /// Accepts the canonical names plus the aliases older layouts used
    /// (`human`, `bot`, `ai`, `model`).
    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Self::System),
            "user" | "human" | "me" => Some(Self::User),
            "assistant" | "bot" | "ai" | "model" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation history.
///
/// Each message has a role (user, assistant, or system), content,
/// and a timestamp indicating when it was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender.
    pub role: MessageRole,
    /// The content of the message.
    pub content: String,
    /// Timestamp when the message was created (ISO 8601 format).
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: timestamp.into(),
        }
    }

    pub fn user(content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, timestamp)
    }

    pub fn assistant(content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content, timestamp)
    }

    /// Returns true when role and content match, ignoring timestamps.
    pub fn same_content(&self, other: &Message) -> bool {
        self.role == other.role && self.content == other.content
    }
}
