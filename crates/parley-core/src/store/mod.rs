//! Reducer-driven state container.
//!
//! # Module Structure
//!
//! - `action`: Action types and the validating `ActionFactory`
//! - `state`: The `StateTree` of shared domain substates
//! - `reducer`: `create_reducer` and `combine_reducers`
//! - `selector`: Memoized read accessors
//! - `middleware`: Dispatch pipeline, thunks, logger
//! - `container`: `Store`, subscriptions, `StoreBuilder`
//! - `persistence`: `persist` / `hydrate`

mod action;
mod container;
mod middleware;
mod persistence;
mod reducer;
mod selector;
mod state;

pub use action::{create_action, Action, ActionFactory, ActionType, STORE_DOMAIN};
pub use container::{Store, StoreApi, StoreBuilder, Subscription};
pub use middleware::{
    thunk, Dispatch, Dispatched, LoggerMiddleware, Middleware, Next, Thunk, ThunkFuture,
    ThunkMiddleware,
};
pub use persistence::{
    HydrateOptions, PersistOptions, PersistedState, DEFAULT_STATE_KEY, STATE_SCHEMA_VERSION,
};
pub use reducer::{combine_reducers, create_reducer, CombinedReducer, DomainReducer, Handler, Reducer};
pub use selector::Selector;
pub use state::StateTree;
