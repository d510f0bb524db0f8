//! Conversation domain module.
//!
//! This module contains the conversation record, message types, provider and
//! model normalization, title derivation and validation of stored records.
//!
//! # Module Structure
//!
//! - `model`: Persisted record (`Conversation`) and save input (`ConversationDraft`)
//! - `message`: Message types (`MessageRole`, `Message`)
//! - `provider`: Canonical providers and model normalization
//! - `title`: Title derivation from the first user message
//! - `record`: Validation of raw stored values

mod message;
mod model;
mod provider;
mod record;
mod title;

pub use message::{Message, MessageRole};
pub use model::{
    format_timestamp, generate_conversation_id, parse_timestamp, Conversation,
    ConversationDraft, ConversationSummary,
};
pub use provider::{normalize_model, normalize_provider, Provider, UNKNOWN_MODEL};
pub use record::{
    parse_messages, parse_record, parse_timestamp_value, validate_history, value_kind,
    ValidatedHistory,
};
pub use title::{
    generate_title, normalize_title, strip_markup, truncate_title, FALLBACK_TITLE,
    MAX_TITLE_CHARS, UNTITLED_TITLE,
};
