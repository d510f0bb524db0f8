//! Dispatch pipeline types and the built-in middleware.

use super::action::Action;
use super::container::{Store, StoreApi};
use crate::error::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use tracing::{debug, Level};

/// The eventual result of a thunk.
pub type ThunkFuture = BoxFuture<'static, Result<Value>>;

/// Deferred work run against the store that dispatched it.
pub type Thunk = Box<dyn FnOnce(Store) -> ThunkFuture + Send>;

/// The next stage of the pipeline, as seen from inside a middleware.
pub type Next<'a> = &'a (dyn Fn(Dispatch) -> Result<Dispatched> + Send + Sync);

/// Something handed to `Store::dispatch`.
pub enum Dispatch {
    Action(Action),
    Thunk(Thunk),
}

impl From<Action> for Dispatch {
    fn from(action: Action) -> Self {
        Self::Action(action)
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(action) => f.debug_tuple("Action").field(action).finish(),
            Self::Thunk(_) => f.write_str("Thunk(..)"),
        }
    }
}

/// Wraps an async closure as a thunk dispatch.
///
/// ```ignore
/// store.dispatch(thunk(|store| async move {
///     store.dispatch(chat.create("CLEAR", Value::Null)?)?;
///     Ok(Value::Null)
/// }))?;
/// ```
pub fn thunk<F, Fut>(work: F) -> Dispatch
where
    F: FnOnce(Store) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Dispatch::Thunk(Box::new(move |store| Box::pin(work(store))))
}

/// What `Store::dispatch` returns.
pub enum Dispatched {
    /// The action that reached the reducer
    Action(Action),
    /// A thunk's pending result
    Pending(ThunkFuture),
}

impl Dispatched {
    pub fn into_action(self) -> Option<Action> {
        match self {
            Self::Action(action) => Some(action),
            Self::Pending(_) => None,
        }
    }

    /// Awaits a thunk's result; an action resolves to its serialized form.
    pub async fn resolve(self) -> Result<Value> {
        match self {
            Self::Action(action) => Ok(serde_json::to_value(&action)?),
            Self::Pending(pending) => pending.await,
        }
    }
}

impl fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(action) => f.debug_tuple("Action").field(action).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// An interceptor between `dispatch` and the root reducer.
///
/// A middleware either forwards to `next` (possibly with a different
/// dispatch) or short-circuits by returning its own result.
pub trait Middleware: Send + Sync {
    fn handle(&self, api: &StoreApi, dispatch: Dispatch, next: Next<'_>) -> Result<Dispatched>;
}

/// Runs thunks with a handle to the store instead of forwarding them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThunkMiddleware;

impl Middleware for ThunkMiddleware {
    fn handle(&self, api: &StoreApi, dispatch: Dispatch, next: Next<'_>) -> Result<Dispatched> {
        match dispatch {
            Dispatch::Thunk(work) => Ok(Dispatched::Pending(work(api.store()?))),
            action => next(action),
        }
    }
}

/// Traces every action with the state before and after it.
///
/// Each action runs inside a `store.dispatch` span. State dumps are debug
/// events and are only rendered when debug logging is enabled.
#[derive(Debug, Clone, Copy)]
pub struct LoggerMiddleware {
    log_state: bool,
}

impl Default for LoggerMiddleware {
    fn default() -> Self {
        Self { log_state: true }
    }
}

impl LoggerMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs action types only, without state dumps.
    pub fn actions_only() -> Self {
        Self { log_state: false }
    }
}

impl Middleware for LoggerMiddleware {
    fn handle(&self, api: &StoreApi, dispatch: Dispatch, next: Next<'_>) -> Result<Dispatched> {
        let action = match dispatch {
            Dispatch::Action(action) => action,
            thunk => return next(thunk),
        };

        let span = tracing::debug_span!("store.dispatch", action = %action.kind());
        let _guard = span.enter();
        let dump_state = self.log_state && tracing::enabled!(Level::DEBUG);

        if dump_state {
            debug!(prev_state = %api.get_state().to_value(), "[Store] prev state");
        }
        debug!(payload = %action.payload(), "[Store] action {}", action.kind());

        let result = next(Dispatch::Action(action));

        match &result {
            Ok(_) if dump_state => {
                debug!(next_state = %api.get_state().to_value(), "[Store] next state");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "[Store] dispatch failed"),
        }
        result
    }
}
