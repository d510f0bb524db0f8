//! Reducers and reducer composition.
//!
//! A domain reducer owns exactly one substate. [`create_reducer`] builds one
//! from a handler table keyed by action type; [`combine_reducers`] composes
//! domain reducers into the root reducer the store runs.

use super::action::Action;
use super::state::StateTree;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A pure `(state, action) -> state` function for one domain.
pub trait DomainReducer: Send + Sync {
    /// Substate used before the first action reaches this domain.
    fn initial_state(&self) -> Value;

    /// Computes the next substate.
    ///
    /// Implementations return the same `Arc` when nothing changed.
    fn reduce(&self, state: &Arc<Value>, action: &Action) -> Arc<Value>;
}

/// A handler for one action type: computes the next substate by value.
pub type Handler = Box<dyn Fn(&Value, &Action) -> Value + Send + Sync>;

/// Table-driven domain reducer built by [`create_reducer`].
pub struct Reducer {
    initial: Value,
    handlers: HashMap<String, Handler>,
}

impl std::fmt::Debug for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reducer")
            .field("initial", &self.initial)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Reducer {
    pub fn new(initial: Value) -> Self {
        Self {
            initial,
            handlers: HashMap::new(),
        }
    }

    /// Registers the handler for an action type string such as `"chat/SET_MODEL"`.
    pub fn on<F>(mut self, action_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value, &Action) -> Value + Send + Sync + 'static,
    {
        self.handlers.insert(action_type.into(), Box::new(handler));
        self
    }
}

impl DomainReducer for Reducer {
    fn initial_state(&self) -> Value {
        self.initial.clone()
    }

    fn reduce(&self, state: &Arc<Value>, action: &Action) -> Arc<Value> {
        // RESET bypasses the handler table.
        if action.is_reset() {
            return Arc::new(action.payload().clone());
        }

        match self.handlers.get(&action.type_name()) {
            Some(handler) => {
                let next = handler(state.as_ref(), action);
                if next == **state {
                    Arc::clone(state)
                } else {
                    Arc::new(next)
                }
            }
            None => Arc::clone(state),
        }
    }
}

/// Builds a domain reducer from an initial substate and a handler table.
pub fn create_reducer(initial: Value, handlers: HashMap<String, Handler>) -> Reducer {
    Reducer { initial, handlers }
}

/// The root reducer: one [`DomainReducer`] per domain.
#[derive(Default)]
pub struct CombinedReducer {
    reducers: BTreeMap<String, Box<dyn DomainReducer>>,
}

impl CombinedReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(mut self, domain: impl Into<String>, reducer: impl DomainReducer + 'static) -> Self {
        self.reducers.insert(domain.into(), Box::new(reducer));
        self
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.reducers.keys().map(String::as_str)
    }

    /// A tree holding every domain's initial substate.
    pub fn initial_state(&self) -> StateTree {
        let mut tree = StateTree::new();
        for (domain, reducer) in &self.reducers {
            tree.insert(domain.clone(), Arc::new(reducer.initial_state()));
        }
        tree
    }

    /// Runs every domain reducer.
    ///
    /// Returns `state` itself (same `Arc`) when no substate changed. A RESET
    /// is scoped per domain: each domain present in the payload object gets
    /// a RESET carrying its own slice; the others are untouched. Domains in
    /// the tree without a reducer are carried over as-is.
    pub fn reduce(&self, state: &Arc<StateTree>, action: &Action) -> Arc<StateTree> {
        let mut next = (**state).clone();
        let mut changed = false;

        for (domain, reducer) in &self.reducers {
            let current = match state.get(domain) {
                Some(current) => Arc::clone(current),
                None => {
                    changed = true;
                    Arc::new(reducer.initial_state())
                }
            };

            let reduced = if action.is_reset() {
                match action.payload().get(domain) {
                    Some(slice) => reducer.reduce(
                        &current,
                        &Action::reset(slice.clone()).with_meta("domain", Value::String(domain.clone())),
                    ),
                    None => current.clone(),
                }
            } else {
                reducer.reduce(&current, action)
            };

            if !Arc::ptr_eq(&reduced, &current) {
                changed = true;
            }
            next.insert(domain.clone(), reduced);
        }

        if action.is_reset()
            && let Value::Object(payload) = action.payload()
        {
            // Domains without a reducer (e.g. persisted by another surface)
            // are still replaced wholesale.
            for (domain, slice) in payload {
                if !self.reducers.contains_key(domain) {
                    next.insert(domain.clone(), Arc::new(slice.clone()));
                    changed = true;
                }
            }
        }

        if changed {
            Arc::new(next)
        } else {
            Arc::clone(state)
        }
    }
}

/// Composes domain reducers into the root reducer.
pub fn combine_reducers<I, S>(reducers: I) -> CombinedReducer
where
    I: IntoIterator<Item = (S, Box<dyn DomainReducer>)>,
    S: Into<String>,
{
    CombinedReducer {
        reducers: reducers
            .into_iter()
            .map(|(domain, reducer)| (domain.into(), reducer))
            .collect(),
    }
}
