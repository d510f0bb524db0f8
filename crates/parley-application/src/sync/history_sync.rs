//! Keeps one surface's history view in step with the shared backend.
//!
//! A single task watches three sources of change: the backend's change
//! stream, the signal bus, and a periodic poll of the stored history. Each
//! observed change invalidates the history cache and requests a refresh;
//! requests are debounced into one `history:updated` signal per burst.

use super::debounce::Debouncer;
use crate::history::HistoryService;
use parley_core::config::SyncConfig;
use parley_core::signal::{RefreshReason, Signal, SignalBus};
use parley_core::storage::StorageChange;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const IDLE_POLL_PERIOD: Duration = Duration::from_secs(3600);

pub struct HistorySync {
    history: Arc<HistoryService>,
    bus: Arc<dyn SignalBus>,
    config: SyncConfig,
}

/// Handle to a running [`HistorySync`] task.
pub struct SyncHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stops the task and waits for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("[HistorySync] Task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl HistorySync {
    pub fn new(history: Arc<HistoryService>, bus: Arc<dyn SignalBus>, config: SyncConfig) -> Self {
        Self {
            history,
            bus,
            config,
        }
    }

    /// Spawns the sync task on the current tokio runtime.
    ///
    /// Subscriptions are taken before this returns, so no change made after
    /// `start` is missed.
    pub fn start(self) -> SyncHandle {
        let changes = self.history.storage().changes();
        let signals = self.bus.subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move { self.run(changes, signals, token).await });
        SyncHandle { cancel, task }
    }

    async fn run(
        self,
        mut changes: broadcast::Receiver<StorageChange>,
        mut signals: broadcast::Receiver<Signal>,
        cancel: CancellationToken,
    ) {
        let area = self.history.storage().area().to_string();
        let history_key = self.history.config().history_key.clone();
        let recent_key = self.history.config().recent_key.clone();
        let watched = [history_key.as_str(), recent_key.as_str()];

        let mut debouncer = Debouncer::new(self.config.debounce_window());
        let poll_every = self.config.poll_interval();
        // The period only matters while polling is on; the branch is disabled otherwise.
        let period = poll_every.unwrap_or(IDLE_POLL_PERIOD);
        let mut poll = time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fingerprint = self.fingerprint().await;

        let mut changes_open = true;
        let mut signals_open = true;
        info!(
            "[HistorySync] Started (debounce {:?}, poll {:?})",
            debouncer.window(),
            poll_every
        );

        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                _ = cancel.cancelled() => break,

                change = changes.recv(), if changes_open => match change {
                    Ok(change) if change.touches(&area, &watched) => {
                        debug!("[HistorySync] Storage change on '{}'", change.key);
                        if change.key == history_key {
                            fingerprint = Some(fingerprint_history(change.new_value.as_ref()));
                        }
                        self.history.invalidate_cache().await;
                        debouncer.request(Instant::now(), RefreshReason::StorageChange);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!("[HistorySync] Missed {} storage change(s)", missed);
                        fingerprint = self.fingerprint().await.or(fingerprint);
                        self.history.invalidate_cache().await;
                        debouncer.request(Instant::now(), RefreshReason::StorageChange);
                    }
                    Err(RecvError::Closed) => {
                        debug!("[HistorySync] Storage change stream closed");
                        changes_open = false;
                    }
                },

                signal = signals.recv(), if signals_open => match signal {
                    Ok(signal) if signal.is_request() => self.route(signal).await,
                    Ok(signal) if signal.is_local_mutation() => {
                        debouncer.request(Instant::now(), RefreshReason::LocalChange);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!("[HistorySync] Missed {} signal(s)", missed);
                    }
                    Err(RecvError::Closed) => {
                        debug!("[HistorySync] Signal bus closed");
                        signals_open = false;
                    }
                },

                _ = poll.tick(), if poll_every.is_some() => {
                    let current = self.fingerprint().await;
                    if current.is_some() && current != fingerprint {
                        debug!("[HistorySync] Poll observed a changed history");
                        fingerprint = current;
                        self.history.invalidate_cache().await;
                        debouncer.request(Instant::now(), RefreshReason::Poll);
                    }
                }

                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(reason) = debouncer.poll(Instant::now()) {
                        debug!("[HistorySync] Emitting history:updated ({})", reason);
                        self.bus.emit(Signal::HistoryUpdated {
                            reason,
                            timestamp: self.history.now(),
                        });
                    }
                }
            }
        }

        info!("[HistorySync] Stopped");
    }

    /// Hands a surface's request to the history service.
    async fn route(&self, signal: Signal) {
        match signal {
            Signal::SaveRequested { draft } => {
                if let Err(e) = self.history.save_conversation(draft).await {
                    warn!("[HistorySync] Requested save failed: {}", e);
                }
            }
            Signal::LoadRequested { id } => {
                if self.history.load_conversation(&id).await.is_none() {
                    debug!("[HistorySync] Requested load of unknown conversation '{}'", id);
                }
            }
            Signal::DeleteRequested { id } => {
                if let Err(e) = self.history.delete_conversation(&id).await {
                    warn!("[HistorySync] Requested delete failed: {}", e);
                }
            }
            _ => {}
        }
    }

    async fn fingerprint(&self) -> Option<u64> {
        match self.history.raw_history().await {
            Ok(raw) => Some(fingerprint_history(raw.as_ref())),
            Err(e) => {
                warn!("[HistorySync] Poll read failed: {}", e);
                None
            }
        }
    }
}

/// Hash of the stored history value, used to detect changes by polling.
pub fn fingerprint_history(raw: Option<&Value>) -> u64 {
    let mut hasher = DefaultHasher::new();
    match raw {
        Some(value) => value.to_string().hash(&mut hasher),
        None => 0u8.hash(&mut hasher),
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::config::HistoryConfig;
    use parley_core::conversation::{ConversationDraft, Message};
    use parley_core::storage::KeyValueStore;
    use parley_infrastructure::{BroadcastSignalBus, MemoryKeyValueStore};
    use serde_json::json;

    struct Fixture {
        storage: Arc<MemoryKeyValueStore>,
        bus: Arc<BroadcastSignalBus>,
        history: Arc<HistoryService>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryKeyValueStore::default());
        let bus = Arc::new(BroadcastSignalBus::new());
        let history = Arc::new(HistoryService::new(
            storage.clone(),
            bus.clone(),
            HistoryConfig::default(),
        ));
        Fixture {
            storage,
            bus,
            history,
        }
    }

    fn start(f: &Fixture) -> SyncHandle {
        HistorySync::new(f.history.clone(), f.bus.clone(), SyncConfig::default()).start()
    }

    fn updates(rx: &mut broadcast::Receiver<Signal>) -> Vec<RefreshReason> {
        let mut reasons = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            if let Signal::HistoryUpdated { reason, .. } = signal {
                reasons.push(reason);
            }
        }
        reasons
    }

    fn record(id: &str) -> Value {
        json!({
            "id": id,
            "timestamp": "2024-01-01T00:00:00Z",
            "messages": [{"role": "user", "content": id}]
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_writes_coalesces_into_one_refresh() {
        let f = fixture();
        let mut rx = f.bus.subscribe();
        let handle = start(&f);

        for i in 0..1000 {
            f.storage
                .set_one("chat_history", json!([record(&format!("c{}", i))]))
                .await
                .unwrap();
        }
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(updates(&mut rx), vec![RefreshReason::StorageChange]);

        time::sleep(Duration::from_secs(1)).await;
        assert!(updates(&mut rx).is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_change_invalidates_cache() {
        let f = fixture();
        assert!(f.history.get_history().await.is_empty());
        let handle = start(&f);

        f.storage.set_one("chat_history", json!([record("x")])).await.unwrap();
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.history.get_history().await.len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_keys_are_ignored() {
        let f = fixture();
        let mut rx = f.bus.subscribe();
        let handle = start(&f);

        f.storage.set_one("app_state", json!({})).await.unwrap();
        time::sleep(Duration::from_millis(300)).await;
        assert!(updates(&mut rx).is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_detects_unnotified_change() {
        let f = fixture();
        let mut rx = f.bus.subscribe();
        assert!(f.history.get_history().await.is_empty());
        let handle = start(&f);
        time::sleep(Duration::from_millis(10)).await;

        // Written without a change event, as another process would.
        f.storage.seed("chat_history", json!([record("p")])).await;
        time::sleep(Duration::from_secs(31)).await;

        assert_eq!(updates(&mut rx), vec![RefreshReason::Poll]);
        assert_eq!(f.history.get_history().await.len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushed_change_is_not_reported_again_by_poll() {
        let f = fixture();
        let mut rx = f.bus.subscribe();
        let handle = start(&f);

        f.storage.set_one("chat_history", json!([record("pushed")])).await.unwrap();
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(updates(&mut rx), vec![RefreshReason::StorageChange]);

        time::sleep(Duration::from_secs(61)).await;
        assert!(updates(&mut rx).is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_keeps_task_running() {
        let f = fixture();
        let mut rx = f.bus.subscribe();
        let config = SyncConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        let handle = HistorySync::new(f.history.clone(), f.bus.clone(), config).start();
        time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        f.storage.set_one("chat_history", json!([record("z")])).await.unwrap();
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(updates(&mut rx), vec![RefreshReason::StorageChange]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_routed_to_history() {
        let f = fixture();
        let mut rx = f.bus.subscribe();
        let handle = start(&f);

        let draft = ConversationDraft::new(vec![
            Message::user("Routed", ""),
            Message::assistant("ok", ""),
        ])
        .with_id("r1");
        f.bus.emit(Signal::SaveRequested { draft });
        time::sleep(Duration::from_millis(300)).await;

        assert_eq!(f.history.get_history().await[0].id, "r1");
        assert_eq!(updates(&mut rx).len(), 1);

        f.bus.emit(Signal::DeleteRequested { id: "r1".to_string() });
        time::sleep(Duration::from_millis(300)).await;
        assert!(f.history.get_history().await.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task() {
        let f = fixture();
        let handle = start(&f);
        handle.shutdown().await;

        let mut rx = f.bus.subscribe();
        f.storage.set_one("chat_history", json!([])).await.unwrap();
        time::sleep(Duration::from_millis(300)).await;
        assert!(updates(&mut rx).is_empty());
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = json!([record("a")]);
        let b = json!([record("b")]);
        assert_eq!(fingerprint_history(Some(&a)), fingerprint_history(Some(&a.clone())));
        assert_ne!(fingerprint_history(Some(&a)), fingerprint_history(Some(&b)));
        assert_ne!(fingerprint_history(None), fingerprint_history(Some(&a)));
    }
}
