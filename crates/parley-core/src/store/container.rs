//! The observable state container.

use super::action::Action;
use super::middleware::{Dispatch, Dispatched, Middleware};
use super::reducer::CombinedReducer;
use super::selector::Selector;
use super::state::{lookup_value, StateTree};
use crate::error::{ParleyError, Result};
use crate::signal::{Signal, SignalBus};
use crate::storage::KeyValueStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::warn;

/// Listener invoked as `(state, prev_state)` after every dispatch.
type Listener = Arc<dyn Fn(&StateTree, &StateTree) -> Result<()> + Send + Sync>;

type DispatchFn = Box<dyn Fn(Dispatch) -> Result<Dispatched> + Send + Sync>;

pub(crate) struct StoreInner {
    state: Mutex<Arc<StateTree>>,
    reducer: CombinedReducer,
    chain: DispatchFn,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    bus: Option<Arc<dyn SignalBus>>,
    pub(crate) storage: Option<Arc<dyn KeyValueStore>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl StoreInner {
    fn current(&self) -> Arc<StateTree> {
        Arc::clone(&lock(&self.state))
    }

    /// Runs the root reducer, then notifies subscribers and the bus.
    fn apply(&self, action: Action) -> Result<Action> {
        let (prev, next) = {
            let mut state = lock(&self.state);
            let prev = Arc::clone(&state);
            let next = self.reducer.reduce(&prev, &action);
            *state = Arc::clone(&next);
            (prev, next)
        };

        self.notify(&next, &prev);

        if let Some(bus) = &self.bus {
            bus.emit(Signal::StateChange {
                action: action.clone(),
                prev_state: prev,
                next_state: next,
            });
        }
        Ok(action)
    }

    fn notify(&self, state: &StateTree, prev: &StateTree) {
        // Snapshot so listeners may subscribe or unsubscribe re-entrantly.
        let listeners: Vec<(u64, Listener)> = lock(&self.listeners).clone();
        for (id, listener) in listeners {
            if let Err(e) = listener(state, prev) {
                warn!(listener = id, error = %e, "[Store] Subscriber failed");
            }
        }
    }

    fn add_listener(&self, listener: Listener) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, listener));
        id
    }

    fn remove_listener(&self, id: u64) {
        lock(&self.listeners).retain(|(listener_id, _)| *listener_id != id);
    }
}

/// Handle given to middleware.
///
/// Holds the store weakly: middleware lives inside the store it serves.
#[derive(Clone)]
pub struct StoreApi {
    inner: Weak<StoreInner>,
}

impl StoreApi {
    /// Current state, or an empty tree if the store is gone.
    pub fn get_state(&self) -> StateTree {
        self.inner
            .upgrade()
            .map(|inner| (*inner.current()).clone())
            .unwrap_or_default()
    }

    /// Dispatches from the top of the pipeline.
    pub fn dispatch(&self, dispatch: Dispatch) -> Result<Dispatched> {
        self.store()?.dispatch(dispatch)
    }

    pub fn store(&self) -> Result<Store> {
        self.inner
            .upgrade()
            .map(|inner| Store { inner })
            .ok_or_else(|| ParleyError::internal("store was dropped"))
    }
}

/// Reducer-driven state container.
///
/// Cloning a `Store` yields another handle to the same container.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.inner.current())
            .field("listeners", &lock(&self.inner.listeners).len())
            .finish()
    }
}

impl Store {
    pub fn builder(reducer: CombinedReducer) -> StoreBuilder {
        StoreBuilder::new(reducer)
    }

    /// A shallow copy of the current state.
    pub fn get_state(&self) -> StateTree {
        (*self.inner.current()).clone()
    }

    /// The current root state itself, for identity comparisons.
    pub fn state_ref(&self) -> Arc<StateTree> {
        self.inner.current()
    }

    /// Sends an action or thunk through the middleware chain.
    pub fn dispatch(&self, dispatch: impl Into<Dispatch>) -> Result<Dispatched> {
        (self.inner.chain)(dispatch.into())
    }

    /// Calls `listener(prev_state)` after every dispatch, in subscription order.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateTree) -> Result<()> + Send + Sync + 'static,
    {
        let id = self
            .inner
            .add_listener(Arc::new(move |_state: &StateTree, prev: &StateTree| listener(prev)));
        Subscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Calls `listener(state, prev_state)` only when a watched path changed.
    ///
    /// The first segment of a path names a domain, whose substate is compared
    /// by reference. Deeper segments are compared by value, and only inside a
    /// domain whose reference changed.
    pub fn subscribe_to_path<F>(&self, paths: &[&str], listener: F) -> Subscription
    where
        F: Fn(&StateTree, &StateTree) -> Result<()> + Send + Sync + 'static,
    {
        let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        let id = self.inner.add_listener(Arc::new(move |state: &StateTree, prev: &StateTree| {
            if paths.iter().any(|path| path_changed(state, prev, path)) {
                listener(state, prev)
            } else {
                Ok(())
            }
        }));
        Subscription {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Runs a memoized selector against the current state.
    pub fn select<T: Clone>(&self, selector: &Selector<T>) -> T {
        selector.select(&self.inner.current())
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }
}

fn path_changed(state: &StateTree, prev: &StateTree, path: &str) -> bool {
    let mut segments = path.split('.');
    let Some(domain) = segments.next() else {
        return false;
    };
    if state.same_domain(prev, domain) {
        return false;
    }

    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        return true;
    }
    let now = state
        .get(domain)
        .and_then(|v| lookup_value(v, rest.iter().copied()));
    let before = prev
        .get(domain)
        .and_then(|v| lookup_value(v, rest.iter().copied()));
    now != before
}

/// Registration returned by `subscribe`; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    store: Weak<StoreInner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.remove_listener(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Configures and constructs a [`Store`].
pub struct StoreBuilder {
    reducer: CombinedReducer,
    middleware: Vec<Arc<dyn Middleware>>,
    bus: Option<Arc<dyn SignalBus>>,
    storage: Option<Arc<dyn KeyValueStore>>,
    preloaded: Option<StateTree>,
}

impl StoreBuilder {
    pub fn new(reducer: CombinedReducer) -> Self {
        Self {
            reducer,
            middleware: Vec::new(),
            bus: None,
            storage: None,
            preloaded: None,
        }
    }

    /// Appends a middleware. The first one added sees a dispatch first.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn bus(mut self, bus: Arc<dyn SignalBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Backend used by `persist` and `hydrate`.
    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Overrides initial substates. Domains absent here start from their
    /// reducer's initial state.
    pub fn preloaded_state(mut self, state: StateTree) -> Self {
        self.preloaded = Some(state);
        self
    }

    pub fn build(self) -> Store {
        let StoreBuilder {
            reducer,
            middleware,
            bus,
            storage,
            preloaded,
        } = self;

        let mut initial = reducer.initial_state();
        if let Some(preloaded) = preloaded {
            for (domain, substate) in preloaded.iter() {
                initial.insert(domain, Arc::clone(substate));
            }
        }

        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let base = weak.clone();
            let mut chain: DispatchFn = Box::new(move |dispatch| {
                let inner = base
                    .upgrade()
                    .ok_or_else(|| ParleyError::internal("store was dropped"))?;
                match dispatch {
                    Dispatch::Action(action) => inner.apply(action).map(Dispatched::Action),
                    Dispatch::Thunk(_) => Err(ParleyError::validation(
                        "thunk reached the reducer; add ThunkMiddleware to the store",
                    )),
                }
            });

            // Compose right-to-left so the first middleware is outermost.
            for mw in middleware.into_iter().rev() {
                let api = StoreApi { inner: weak.clone() };
                let next = chain;
                chain = Box::new(move |dispatch| mw.handle(&api, dispatch, &*next));
            }

            StoreInner {
                state: Mutex::new(Arc::new(initial)),
                reducer,
                chain,
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                bus,
                storage,
            }
        });

        // INIT goes straight to the reducer; nothing is subscribed yet.
        if let Err(e) = inner.apply(Action::init()) {
            warn!(error = %e, "[Store] INIT failed");
        }

        Store { inner }
    }
}
