//! Per-tab and per-page view snapshots.
//!
//! When a surface switches away from a tab or page it stores what the chat
//! view showed, so switching back restores it. Snapshots live in memory
//! only and are dropped when their tab closes.

use chrono::{DateTime, Utc};
use parley_core::clock::{Clock, SystemClock};
use parley_core::conversation::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

pub type TabId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub messages: Vec<Message>,
    pub include_page_context: bool,
    pub conversation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Snapshots {
    tabs: HashMap<TabId, ViewSnapshot>,
    pages: HashMap<(TabId, String), ViewSnapshot>,
}

pub struct SnapshotRegistry {
    clock: Arc<dyn Clock>,
    inner: RwLock<Snapshots>,
}

impl Default for SnapshotRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl SnapshotRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: RwLock::new(Snapshots::default()),
        }
    }

    fn snapshot(
        &self,
        messages: Vec<Message>,
        include_page_context: bool,
        conversation_id: Option<String>,
    ) -> ViewSnapshot {
        ViewSnapshot {
            messages,
            include_page_context,
            conversation_id,
            timestamp: self.clock.now(),
        }
    }

    pub async fn save_tab(
        &self,
        tab_id: TabId,
        messages: Vec<Message>,
        include_page_context: bool,
        conversation_id: Option<String>,
    ) {
        let snapshot = self.snapshot(messages, include_page_context, conversation_id);
        self.inner.write().await.tabs.insert(tab_id, snapshot);
    }

    pub async fn tab(&self, tab_id: TabId) -> Option<ViewSnapshot> {
        self.inner.read().await.tabs.get(&tab_id).cloned()
    }

    pub async fn save_page(
        &self,
        tab_id: TabId,
        url: &str,
        messages: Vec<Message>,
        include_page_context: bool,
        conversation_id: Option<String>,
    ) {
        let snapshot = self.snapshot(messages, include_page_context, conversation_id);
        self.inner
            .write()
            .await
            .pages
            .insert((tab_id, normalize_url(url)), snapshot);
    }

    pub async fn page(&self, tab_id: TabId, url: &str) -> Option<ViewSnapshot> {
        self.inner
            .read()
            .await
            .pages
            .get(&(tab_id, normalize_url(url)))
            .cloned()
    }

    /// Drops every snapshot owned by `tab_id`.
    pub async fn close_context(&self, tab_id: TabId) {
        let mut inner = self.inner.write().await;
        let had_tab = inner.tabs.remove(&tab_id).is_some();
        let pages_before = inner.pages.len();
        inner.pages.retain(|(tab, _), _| *tab != tab_id);
        debug!(
            "[Snapshots] Closed tab {} (tab snapshot: {}, page snapshots: {})",
            tab_id,
            had_tab,
            pages_before - inner.pages.len()
        );
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.tabs.len() + inner.pages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Page identity ignores the fragment, the case of scheme and host, and a
/// trailing slash on the path. Unparseable input is only trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_fragment(None);
    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let stripped = path.trim_end_matches('/').to_string();
        url.set_path(if stripped.is_empty() { "/" } else { &stripped });
    }
    url.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parley_core::clock::ManualClock;

    fn registry() -> SnapshotRegistry {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        SnapshotRegistry::new(Arc::new(clock))
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://a.dev/docs/#intro"), "https://a.dev/docs");
        assert_eq!(normalize_url(" https://a.dev/docs "), "https://a.dev/docs");
        assert_eq!(normalize_url("https://a.dev/?q=1#x"), "https://a.dev/?q=1");
        assert_eq!(normalize_url("https://a.dev/docs?next=/"), "https://a.dev/docs?next=/");
        assert_eq!(normalize_url("HTTPS://A.DEV/page"), normalize_url("https://a.dev/page"));
        assert_eq!(normalize_url("https://a.dev/Page"), "https://a.dev/Page");
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[tokio::test]
    async fn test_page_lookup_ignores_scheme_and_host_case() {
        let snapshots = registry();
        snapshots
            .save_page(3, "HTTPS://Docs.Example.COM/guide/", vec![], true, None)
            .await;
        let page = snapshots.page(3, "https://docs.example.com/guide").await;
        assert!(page.is_some_and(|p| p.include_page_context));
    }

    #[tokio::test]
    async fn test_tab_and_page_snapshots() {
        let snapshots = registry();
        snapshots
            .save_tab(1, vec![Message::user("hi", "")], true, Some("c1".to_string()))
            .await;
        snapshots
            .save_page(1, "https://a.dev/page#top", vec![], false, None)
            .await;

        let tab = snapshots.tab(1).await.unwrap();
        assert!(tab.include_page_context);
        assert_eq!(tab.conversation_id.as_deref(), Some("c1"));
        assert_eq!(tab.timestamp, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());

        assert!(snapshots.page(1, "https://a.dev/page/").await.is_some());
        assert!(snapshots.page(2, "https://a.dev/page").await.is_none());
        assert!(snapshots.tab(2).await.is_none());
    }

    #[tokio::test]
    async fn test_close_context_clears_only_that_tab() {
        let snapshots = registry();
        snapshots.save_tab(1, vec![], false, None).await;
        snapshots.save_page(1, "https://a.dev", vec![], false, None).await;
        snapshots.save_page(1, "https://b.dev", vec![], false, None).await;
        snapshots.save_tab(2, vec![], false, None).await;
        assert_eq!(snapshots.len().await, 4);

        snapshots.close_context(1).await;
        assert_eq!(snapshots.len().await, 1);
        assert!(snapshots.tab(2).await.is_some());
        assert!(snapshots.page(1, "https://a.dev").await.is_none());
    }
}
