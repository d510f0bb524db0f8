//! Cross-surface history synchronization.

mod debounce;
mod history_sync;

pub use debounce::{DebounceState, Debouncer};
pub use history_sync::{fingerprint_history, HistorySync, SyncHandle};
