//! Store domains backed by the history service.
//!
//! `chat` holds the conversation the surface is showing; `history` holds
//! the list view. The thunks here are how a surface moves data between the
//! store and the [`HistoryService`].

use crate::history::HistoryService;
use parley_core::conversation::{Conversation, ConversationDraft, ConversationSummary, Message};
use parley_core::error::Result;
use parley_core::store::{
    thunk, Action, ActionFactory, CombinedReducer, Dispatch, Reducer, Selector, StateTree, Store,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const CHAT_DOMAIN: &str = "chat";
pub const HISTORY_DOMAIN: &str = "history";

pub mod chat_verbs {
    pub const OPEN: &str = "OPEN";
    pub const SET_MESSAGES: &str = "SET_MESSAGES";
    pub const ADD_MESSAGE: &str = "ADD_MESSAGE";
    pub const SET_PROVIDER: &str = "SET_PROVIDER";
    pub const SET_PAGE_CONTEXT: &str = "SET_PAGE_CONTEXT";
    pub const SAVED: &str = "SAVED";
    pub const CLEAR: &str = "CLEAR";
}

pub mod history_verbs {
    pub const LOAD_STARTED: &str = "LOAD_STARTED";
    pub const LOADED: &str = "LOADED";
    pub const LOAD_FAILED: &str = "LOAD_FAILED";
}

/// The conversation a surface is showing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatView {
    /// Set once the conversation has been saved
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub include_page_context: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryView {
    pub loading: bool,
    pub summaries: Vec<ConversationSummary>,
    pub error: Option<String>,
}

fn action_type(domain: &str, verb: &str) -> String {
    format!("{}/{}", domain, verb)
}

/// Applies `edit` to the typed view of a substate.
fn edit<T, F>(state: &Value, apply: F) -> Value
where
    T: Serialize + DeserializeOwned + Default,
    F: FnOnce(&mut T),
{
    let mut view: T = serde_json::from_value(state.clone()).unwrap_or_default();
    apply(&mut view);
    serde_json::to_value(&view).unwrap_or_else(|_| state.clone())
}

fn chat_initial() -> Value {
    serde_json::to_value(ChatView::default()).unwrap_or_else(|_| json!({}))
}

fn history_initial() -> Value {
    serde_json::to_value(HistoryView::default()).unwrap_or_else(|_| json!({}))
}

pub fn chat_reducer() -> Reducer {
    use chat_verbs::*;
    let on = |verb| action_type(CHAT_DOMAIN, verb);

    Reducer::new(chat_initial())
        .on(on(OPEN), |state, action| {
            match action.payload_as::<Conversation>() {
                Ok(conversation) => edit(state, |view: &mut ChatView| {
                    view.conversation_id = Some(conversation.id);
                    view.messages = conversation.messages;
                    view.provider = Some(conversation.provider.to_string());
                    view.model = Some(conversation.model);
                }),
                Err(e) => {
                    warn!("[Store] Ignoring chat/OPEN with bad payload: {}", e);
                    state.clone()
                }
            }
        })
        .on(on(SET_MESSAGES), |state, action| {
            let messages: Vec<Message> = action.payload_as().unwrap_or_default();
            edit(state, |view: &mut ChatView| view.messages = messages)
        })
        .on(on(ADD_MESSAGE), |state, action| match action.payload_as::<Message>() {
            Ok(message) => edit(state, |view: &mut ChatView| view.messages.push(message)),
            Err(_) => state.clone(),
        })
        .on(on(SET_PROVIDER), |state, action| {
            let provider = action.payload()["provider"].as_str().map(str::to_string);
            let model = action.payload()["model"].as_str().map(str::to_string);
            edit(state, |view: &mut ChatView| {
                view.provider = provider;
                view.model = model;
            })
        })
        .on(on(SET_PAGE_CONTEXT), |state, action| {
            let include = action.payload().as_bool().unwrap_or(false);
            edit(state, |view: &mut ChatView| view.include_page_context = include)
        })
        .on(on(SAVED), |state, action| {
            let id = action.payload()["id"].as_str().map(str::to_string);
            edit(state, |view: &mut ChatView| view.conversation_id = id)
        })
        .on(on(CLEAR), |_, _| chat_initial())
}

pub fn history_reducer() -> Reducer {
    use history_verbs::*;
    let on = |verb| action_type(HISTORY_DOMAIN, verb);

    Reducer::new(history_initial())
        .on(on(LOAD_STARTED), |state, _| {
            edit(state, |view: &mut HistoryView| {
                view.loading = true;
                view.error = None;
            })
        })
        .on(on(LOADED), |state, action| {
            let summaries: Vec<ConversationSummary> = action.payload_as().unwrap_or_default();
            edit(state, |view: &mut HistoryView| {
                view.loading = false;
                view.summaries = summaries;
            })
        })
        .on(on(LOAD_FAILED), |state, action| {
            let error = action.payload().as_str().unwrap_or("unknown error").to_string();
            edit(state, |view: &mut HistoryView| {
                view.loading = false;
                view.error = Some(error);
            })
        })
}

/// Root reducer with the `chat` and `history` domains.
pub fn root_reducer() -> CombinedReducer {
    CombinedReducer::new()
        .with_domain(CHAT_DOMAIN, chat_reducer())
        .with_domain(HISTORY_DOMAIN, history_reducer())
}

pub fn chat_action(verb: &str, payload: Value) -> Result<Action> {
    ActionFactory::new(CHAT_DOMAIN)?.create(verb, payload)
}

pub fn history_action(verb: &str, payload: Value) -> Result<Action> {
    ActionFactory::new(HISTORY_DOMAIN)?.create(verb, payload)
}

pub fn open_conversation(conversation: &Conversation) -> Result<Action> {
    chat_action(chat_verbs::OPEN, serde_json::to_value(conversation)?)
}

pub fn chat_view(state: &StateTree) -> ChatView {
    state
        .get(CHAT_DOMAIN)
        .and_then(|v| serde_json::from_value(v.as_ref().clone()).ok())
        .unwrap_or_default()
}

pub fn history_view(state: &StateTree) -> HistoryView {
    state
        .get(HISTORY_DOMAIN)
        .and_then(|v| serde_json::from_value(v.as_ref().clone()).ok())
        .unwrap_or_default()
}

/// Memoized summaries of the `history` domain.
pub fn summaries_selector() -> Selector<Vec<ConversationSummary>> {
    Selector::new(&[HISTORY_DOMAIN], |state| history_view(state).summaries)
}

/// Loads the history list into the `history` domain.
///
/// Resolves to the number of conversations loaded.
pub fn load_history(history: Arc<HistoryService>) -> Dispatch {
    thunk(move |store: Store| run_load_history(store, history))
}

async fn run_load_history(store: Store, history: Arc<HistoryService>) -> Result<Value> {
    store.dispatch(history_action(history_verbs::LOAD_STARTED, Value::Null)?)?;
    match history.try_get_history().await {
        Ok(conversations) => {
            let summaries: Vec<ConversationSummary> =
                conversations.iter().map(Conversation::summary).collect();
            let count = summaries.len();
            store.dispatch(history_action(
                history_verbs::LOADED,
                serde_json::to_value(summaries)?,
            )?)?;
            Ok(json!(count))
        }
        Err(e) => {
            warn!("[Store] Loading history failed: {}", e);
            store.dispatch(history_action(
                history_verbs::LOAD_FAILED,
                Value::String(e.to_string()),
            )?)?;
            Err(e)
        }
    }
}

/// Saves the `chat` domain's conversation through the history service.
///
/// Resolves to the saved id, or null when there was nothing to save.
pub fn save_active_conversation(history: Arc<HistoryService>) -> Dispatch {
    thunk(move |store: Store| run_save_active(store, history))
}

async fn run_save_active(store: Store, history: Arc<HistoryService>) -> Result<Value> {
    let view = chat_view(&store.get_state());
    let draft = ConversationDraft {
        id: view.conversation_id,
        title: None,
        provider: view.provider,
        model: view.model,
        messages: view.messages,
    };

    match history.save_conversation(draft).await? {
        Some(id) => {
            store.dispatch(chat_action(chat_verbs::SAVED, json!({ "id": id }))?)?;
            Ok(Value::String(id))
        }
        None => {
            debug!("[Store] Active conversation has no messages, nothing saved");
            Ok(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::config::HistoryConfig;
    use parley_core::error::ParleyError;
    use parley_core::storage::{KeyValueStore, StorageChange};
    use parley_core::store::ThunkMiddleware;
    use parley_infrastructure::{BroadcastSignalBus, MemoryKeyValueStore};
    use std::collections::HashMap;
    use tokio::sync::broadcast;

    fn service(storage: Arc<dyn KeyValueStore>) -> Arc<HistoryService> {
        Arc::new(HistoryService::new(
            storage,
            Arc::new(BroadcastSignalBus::new()),
            HistoryConfig::default(),
        ))
    }

    fn store() -> Store {
        Store::builder(root_reducer()).middleware(ThunkMiddleware).build()
    }

    #[test]
    fn test_chat_reducer_actions() {
        let store = store();
        store
            .dispatch(chat_action(chat_verbs::ADD_MESSAGE, json!({"role": "user", "content": "Hi"})).unwrap())
            .unwrap();
        store
            .dispatch(chat_action(chat_verbs::SET_PAGE_CONTEXT, json!(true)).unwrap())
            .unwrap();
        store
            .dispatch(
                chat_action(chat_verbs::SET_PROVIDER, json!({"provider": "anthropic", "model": "claude-3-haiku"}))
                    .unwrap(),
            )
            .unwrap();

        let view = chat_view(&store.get_state());
        assert_eq!(view.messages.len(), 1);
        assert!(view.include_page_context);
        assert_eq!(view.provider.as_deref(), Some("anthropic"));

        store.dispatch(chat_action(chat_verbs::CLEAR, Value::Null).unwrap()).unwrap();
        assert_eq!(chat_view(&store.get_state()), ChatView::default());
    }

    #[test]
    fn test_unrelated_action_keeps_state_identity() {
        let store = store();
        let before = store.state_ref();
        store
            .dispatch(history_action("UNHANDLED", Value::Null).unwrap())
            .unwrap();
        assert!(Arc::ptr_eq(&before, &store.state_ref()));
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip_through_store() {
        let history = service(Arc::new(MemoryKeyValueStore::default()));
        let store = store();
        store
            .dispatch(
                chat_action(
                    chat_verbs::SET_MESSAGES,
                    json!([
                        {"role": "user", "content": "Plan a trip"},
                        {"role": "assistant", "content": "Where to?"}
                    ]),
                )
                .unwrap(),
            )
            .unwrap();

        let saved = store
            .dispatch(save_active_conversation(history.clone()))
            .unwrap()
            .resolve()
            .await
            .unwrap();
        let id = saved.as_str().unwrap().to_string();
        assert_eq!(chat_view(&store.get_state()).conversation_id.as_deref(), Some(id.as_str()));

        let loaded = store
            .dispatch(load_history(history.clone()))
            .unwrap()
            .resolve()
            .await
            .unwrap();
        assert_eq!(loaded, json!(1));

        let view = history_view(&store.get_state());
        assert!(!view.loading);
        assert_eq!(view.summaries[0].title, "Plan a trip");

        let selector = summaries_selector();
        assert_eq!(selector.select(&store.get_state()).len(), 1);
        selector.select(&store.get_state());
        assert_eq!(selector.recomputations(), 1);

        let conversation = history.load_conversation(&id).await.unwrap();
        store.dispatch(chat_action(chat_verbs::CLEAR, Value::Null).unwrap()).unwrap();
        store.dispatch(open_conversation(&conversation).unwrap()).unwrap();
        assert_eq!(chat_view(&store.get_state()).messages.len(), 2);
    }

    #[tokio::test]
    async fn test_saving_empty_chat_resolves_null() {
        let history = service(Arc::new(MemoryKeyValueStore::default()));
        let saved = store()
            .dispatch(save_active_conversation(history))
            .unwrap()
            .resolve()
            .await
            .unwrap();
        assert_eq!(saved, Value::Null);
    }

    struct DownStore(broadcast::Sender<StorageChange>);

    #[async_trait]
    impl KeyValueStore for DownStore {
        fn area(&self) -> &str {
            "local"
        }
        async fn get(&self, _keys: &[&str]) -> parley_core::error::Result<HashMap<String, Value>> {
            Err(ParleyError::storage("backend offline"))
        }
        async fn set(&self, _items: HashMap<String, Value>) -> parley_core::error::Result<()> {
            Err(ParleyError::storage("backend offline"))
        }
        async fn remove(&self, _keys: &[&str]) -> parley_core::error::Result<()> {
            Err(ParleyError::storage("backend offline"))
        }
        fn changes(&self) -> broadcast::Receiver<StorageChange> {
            self.0.subscribe()
        }
    }

    #[tokio::test]
    async fn test_load_failure_is_recorded_in_state() {
        let history = service(Arc::new(DownStore(broadcast::channel(1).0)));
        let store = store();

        let result = store.dispatch(load_history(history)).unwrap().resolve().await;
        assert!(result.is_err());

        let view = history_view(&store.get_state());
        assert!(!view.loading);
        assert!(view.error.unwrap().contains("backend offline"));
    }
}
