//! Read-only queries over a materialized history list.

use parley_core::conversation::Conversation;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub search_titles: bool,
    pub search_messages: bool,
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            search_titles: true,
            search_messages: true,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// Case-insensitive substring search, in history order.
///
/// Blank terms match nothing.
pub fn search(history: &[Conversation], term: &str, options: &SearchOptions) -> Vec<Conversation> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    history
        .iter()
        .filter(|c| {
            (options.search_titles && c.title.to_lowercase().contains(&needle))
                || (options.search_messages
                    && c.messages
                        .iter()
                        .any(|m| m.content.to_lowercase().contains(&needle)))
        })
        .take(options.limit)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStatistics {
    pub total_conversations: usize,
    pub total_messages: usize,
    /// Conversation count per canonical provider name
    pub provider_breakdown: BTreeMap<String, usize>,
    /// Timestamp of the oldest conversation
    pub oldest_conversation: Option<String>,
    /// Timestamp of the newest conversation
    pub newest_conversation: Option<String>,
}

pub fn statistics(history: &[Conversation]) -> HistoryStatistics {
    let mut stats = HistoryStatistics {
        total_conversations: history.len(),
        ..Default::default()
    };

    for conversation in history {
        stats.total_messages += conversation.messages.len();
        *stats
            .provider_breakdown
            .entry(conversation.provider.to_string())
            .or_insert(0) += 1;
    }

    let by_time = |c: &&Conversation| c.parsed_timestamp();
    stats.oldest_conversation = history.iter().min_by_key(by_time).map(|c| c.timestamp.clone());
    stats.newest_conversation = history.iter().max_by_key(by_time).map(|c| c.timestamp.clone());
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::conversation::{Message, Provider};

    fn conversation(id: &str, title: &str, provider: Provider, ts: &str, text: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            title: title.to_string(),
            provider,
            model: provider.default_model().to_string(),
            timestamp: ts.to_string(),
            messages: vec![Message::user(text, ts), Message::assistant("ok", ts)],
            migrated: None,
            migrated_at: None,
        }
    }

    fn history() -> Vec<Conversation> {
        vec![
            conversation("a", "Rust lifetimes", Provider::OpenAi, "2024-03-03T00:00:00.000Z", "borrow checker"),
            conversation("b", "Dinner ideas", Provider::Anthropic, "2024-03-02T00:00:00.000Z", "pasta with RUST colored sauce"),
            conversation("c", "Travel", Provider::OpenAi, "2024-03-01T00:00:00.000Z", "trains in Japan"),
        ]
    }

    #[test]
    fn test_search_titles_and_messages() {
        let ids = |found: Vec<Conversation>| found.into_iter().map(|c| c.id).collect::<Vec<_>>();

        assert_eq!(ids(search(&history(), "rust", &SearchOptions::default())), vec!["a", "b"]);

        let titles_only = SearchOptions {
            search_messages: false,
            ..Default::default()
        };
        assert_eq!(ids(search(&history(), "rust", &titles_only)), vec!["a"]);

        let limited = SearchOptions {
            limit: 1,
            ..Default::default()
        };
        assert_eq!(ids(search(&history(), "RUST", &limited)), vec!["a"]);
    }

    #[test]
    fn test_blank_term_matches_nothing() {
        assert!(search(&history(), "   ", &SearchOptions::default()).is_empty());
    }

    #[test]
    fn test_statistics() {
        let stats = statistics(&history());
        assert_eq!(stats.total_conversations, 3);
        assert_eq!(stats.total_messages, 6);
        assert_eq!(stats.provider_breakdown["openai"], 2);
        assert_eq!(stats.provider_breakdown["anthropic"], 1);
        assert_eq!(stats.oldest_conversation.as_deref(), Some("2024-03-01T00:00:00.000Z"));
        assert_eq!(stats.newest_conversation.as_deref(), Some("2024-03-03T00:00:00.000Z"));
    }

    #[test]
    fn test_statistics_of_empty_history() {
        let stats = statistics(&[]);
        assert_eq!(stats, HistoryStatistics::default());
    }
}
