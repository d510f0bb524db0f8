//! Conversation history services.
//!
//! This module contains the history service, its TTL cache, and the
//! search/statistics queries over the history list.

mod cache;
mod query;
mod service;

pub use cache::{CacheEntry, HistoryCache};
pub use query::{search, statistics, HistoryStatistics, SearchOptions, DEFAULT_SEARCH_LIMIT};
pub use service::{sort_newest_first, HistoryService};
pub(crate) use service::owned_fingerprint;
