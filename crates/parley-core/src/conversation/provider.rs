//! Provider and model normalization.
//!
//! Stored records carry whatever spelling the surface that wrote them used
//! ("OpenAI", "chatgpt", "claude", ...). Everything read back is mapped onto
//! the canonical [`Provider`] set, and models onto canonical ids with a
//! provider-specific default when missing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Model placeholder written by older surfaces when the model was not known.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Canonical LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Mistral,
}

impl Default for Provider {
    fn default() -> Self {
        Provider::OpenAi
    }
}

impl Provider {
    pub fn all() -> &'static [Provider] {
        &[
            Provider::OpenAi,
            Provider::Anthropic,
            Provider::Gemini,
            Provider::Ollama,
            Provider::OpenRouter,
            Provider::Mistral,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Ollama => "ollama",
            Provider::OpenRouter => "openrouter",
            Provider::Mistral => "mistral",
        }
    }

    /// Model used when a record has no model or the literal `"unknown"`.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-3.5-turbo",
            Provider::Anthropic => "claude-3-sonnet-20240229",
            Provider::Gemini => "gemini-pro",
            Provider::Ollama => "llama2",
            Provider::OpenRouter => "openai/gpt-3.5-turbo",
            Provider::Mistral => "mistral-medium",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a loose or legacy provider spelling onto the canonical set.
///
/// Unknown and missing providers fall back to [`Provider::OpenAi`].
pub fn normalize_provider(raw: Option<&str>) -> Provider {
    let Some(raw) = raw else {
        return Provider::default();
    };

    let key: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    match key.as_str() {
        "openai" | "chatgpt" | "gpt" | "azure" | "azureopenai" => Provider::OpenAi,
        "anthropic" | "claude" | "claudeai" => Provider::Anthropic,
        "gemini" | "google" | "googleai" | "bard" | "palm" => Provider::Gemini,
        "ollama" | "local" | "llama" => Provider::Ollama,
        "openrouter" | "router" => Provider::OpenRouter,
        "mistral" | "mistralai" => Provider::Mistral,
        _ => {
            tracing::debug!("Unrecognized provider '{}', defaulting to openai", raw);
            Provider::default()
        }
    }
}

/// Maps a loose or legacy model spelling onto a canonical model id.
///
/// Missing, blank and `"unknown"` models resolve to the provider default.
/// Unrecognized models are kept as written (trimmed).
pub fn normalize_model(provider: Provider, raw: Option<&str>) -> String {
    let model = match raw.map(str::trim) {
        None | Some("") => return provider.default_model().to_string(),
        Some(m) if m.eq_ignore_ascii_case(UNKNOWN_MODEL) => {
            return provider.default_model().to_string();
        }
        Some(m) => m,
    };

    let lower = model.to_ascii_lowercase();
    let canonical = match lower.as_str() {
        "gpt-3.5" | "gpt3.5" | "gpt-35-turbo" | "gpt3.5-turbo" | "chatgpt" => "gpt-3.5-turbo",
        "gpt4" | "gpt-4.0" => "gpt-4",
        "gpt4-turbo" | "gpt-4turbo" => "gpt-4-turbo",
        "gpt4o" | "gpt-4-o" => "gpt-4o",
        "claude-2" | "claude2" => "claude-2.1",
        "claude-3-opus" | "claude3-opus" => "claude-3-opus-20240229",
        "claude-3-sonnet" | "claude3-sonnet" => "claude-3-sonnet-20240229",
        "claude-3-haiku" | "claude3-haiku" => "claude-3-haiku-20240307",
        "gemini" | "gemini-1.0-pro" => "gemini-pro",
        "llama-2" | "llama" => "llama2",
        _ => return model.to_string(),
    };
    canonical.to_string()
}
