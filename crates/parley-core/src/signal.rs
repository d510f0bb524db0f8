//! Signals exchanged between surfaces over the shared bus.
//!
//! The store publishes state changes, the history service publishes record
//! mutations, and any surface may publish a request that the synchronization
//! layer routes to the history service.

use crate::conversation::{Conversation, ConversationDraft};
use crate::store::{Action, StateTree};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Why a `history:updated` signal was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    /// This context saved, deleted or renamed a conversation
    LocalChange,
    /// Another context wrote the history or recent key
    StorageChange,
    /// The periodic poll saw a different stored history
    Poll,
    /// The legacy migration wrote new records
    Migration,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LocalChange => "local_change",
            Self::StorageChange => "storage_change",
            Self::Poll => "poll",
            Self::Migration => "migration",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub enum Signal {
    /// A dispatched action produced a new state.
    StateChange {
        action: Action,
        prev_state: Arc<StateTree>,
        next_state: Arc<StateTree>,
    },
    /// Coalesced notice that the history list should be re-read.
    HistoryUpdated {
        reason: RefreshReason,
        timestamp: String,
    },
    ConversationSaved {
        id: String,
        conversation: Conversation,
        timestamp: String,
    },
    ConversationLoaded {
        id: String,
        conversation: Conversation,
        timestamp: String,
    },
    ConversationDeleted {
        id: String,
        timestamp: String,
    },
    TitleUpdated {
        id: String,
        title: String,
        timestamp: String,
    },
    /// A surface asks the history service to save a draft.
    SaveRequested { draft: ConversationDraft },
    /// A surface asks the history service to load a conversation.
    LoadRequested { id: String },
    /// A surface asks the history service to delete a conversation.
    DeleteRequested { id: String },
}

impl Signal {
    /// The wire name of this signal.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChange { .. } => "state:change",
            Self::HistoryUpdated { .. } => "history:updated",
            Self::ConversationSaved { .. } => "conversation:saved",
            Self::ConversationLoaded { .. } => "conversation:loaded",
            Self::ConversationDeleted { .. } => "conversation:deleted",
            Self::TitleUpdated { .. } => "conversation:titleUpdated",
            Self::SaveRequested { .. } => "conversation:save",
            Self::LoadRequested { .. } => "conversation:load",
            Self::DeleteRequested { .. } => "conversation:delete",
        }
    }

    /// Whether this signal records a mutation made by the local history service.
    pub fn is_local_mutation(&self) -> bool {
        matches!(
            self,
            Self::ConversationSaved { .. } | Self::ConversationDeleted { .. } | Self::TitleUpdated { .. }
        )
    }

    /// Whether this signal asks the history service to do something.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::SaveRequested { .. } | Self::LoadRequested { .. } | Self::DeleteRequested { .. }
        )
    }
}

/// Publish/subscribe channel shared by the store and history service.
///
/// Emitting never fails; a bus with no subscribers drops the signal.
pub trait SignalBus: Send + Sync {
    fn emit(&self, signal: Signal);

    fn subscribe(&self) -> broadcast::Receiver<Signal>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Bus double that records every emitted signal.
    pub struct RecordingBus {
        sender: broadcast::Sender<Signal>,
        emitted: Mutex<Vec<Signal>>,
    }

    impl RecordingBus {
        pub fn new() -> Self {
            let (sender, _) = broadcast::channel(64);
            Self {
                sender,
                emitted: Mutex::new(Vec::new()),
            }
        }

        pub fn names(&self) -> Vec<&'static str> {
            self.emitted.lock().unwrap().iter().map(Signal::name).collect()
        }

        pub fn emitted(&self) -> Vec<Signal> {
            self.emitted.lock().unwrap().clone()
        }
    }

    impl SignalBus for RecordingBus {
        fn emit(&self, signal: Signal) {
            self.emitted.lock().unwrap().push(signal.clone());
            let _ = self.sender.send(signal);
        }

        fn subscribe(&self) -> broadcast::Receiver<Signal> {
            self.sender.subscribe()
        }
    }
}
