//! Conversation title derivation.

use super::message::{Message, MessageRole};
use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum number of characters kept from the first user message.
pub const MAX_TITLE_CHARS: usize = 50;

/// Title used when a rename request carries a blank title.
pub const UNTITLED_TITLE: &str = "Untitled Conversation";

/// Title used when no user message is available to derive one from.
pub const FALLBACK_TITLE: &str = "New Conversation";

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static MD_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid image regex"));
static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid link regex"));
static MD_CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[a-zA-Z0-9_-]*").expect("valid fence regex"));
static MD_LINE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(#{1,6}\s+|>\s*|[-*+]\s+)").expect("valid prefix regex"));
static MD_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_`~]+").expect("valid emphasis regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Strips HTML tags and common markdown syntax, collapsing whitespace.
pub fn strip_markup(text: &str) -> String {
    let text = HTML_TAG.replace_all(text, " ");
    let text = MD_IMAGE.replace_all(&text, "$1");
    let text = MD_LINK.replace_all(&text, "$1");
    let text = MD_CODE_FENCE.replace_all(&text, " ");
    let text = MD_LINE_PREFIX.replace_all(&text, "");
    let text = MD_EMPHASIS.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Truncates to [`MAX_TITLE_CHARS`] characters, appending `...` when cut.
pub fn truncate_title(text: &str) -> String {
    if text.chars().count() <= MAX_TITLE_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_TITLE_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Derives a title from the first non-blank user message.
pub fn generate_title(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| strip_markup(&m.content))
        .find(|content| !content.is_empty())
        .map(|content| truncate_title(&content))
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

/// Normalizes a user-supplied title, substituting [`UNTITLED_TITLE`] for blanks.
pub fn normalize_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        UNTITLED_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}
