//! Single-slot memoized selectors.

use super::state::StateTree;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Compute<T> = Box<dyn Fn(&StateTree) -> T + Send + Sync>;

/// Identity of the substates a selector last computed from.
type Key = Vec<(String, Option<Arc<Value>>)>;

/// A read accessor over state, memoized against the last input it saw.
///
/// The memo key is the `Arc` identity of each dependent domain (every domain
/// when no dependencies are declared). Because [`StateTree`] clones share
/// substates, the memo survives the shallow copies `Store::get_state` hands
/// out and is only invalidated by an actual reducer change.
pub struct Selector<T> {
    deps: Vec<String>,
    compute: Compute<T>,
    slot: Mutex<Option<(Key, T)>>,
    recomputations: AtomicUsize,
}

impl<T: Clone> Selector<T> {
    pub fn new<F>(deps: &[&str], compute: F) -> Self
    where
        F: Fn(&StateTree) -> T + Send + Sync + 'static,
    {
        Self {
            deps: deps.iter().map(|d| d.to_string()).collect(),
            compute: Box::new(compute),
            slot: Mutex::new(None),
            recomputations: AtomicUsize::new(0),
        }
    }

    pub fn select(&self, state: &StateTree) -> T {
        let key = self.key_for(state);
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((last_key, last_value)) = slot.as_ref()
            && same_key(last_key, &key)
        {
            return last_value.clone();
        }

        let value = (self.compute)(state);
        self.recomputations.fetch_add(1, Ordering::Relaxed);
        *slot = Some((key, value.clone()));
        value
    }

    /// How many times the compute function has run.
    pub fn recomputations(&self) -> usize {
        self.recomputations.load(Ordering::Relaxed)
    }

    /// Drops the memoized value.
    pub fn reset(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    fn key_for(&self, state: &StateTree) -> Key {
        if self.deps.is_empty() {
            state
                .iter()
                .map(|(name, value)| (name.to_string(), Some(Arc::clone(value))))
                .collect()
        } else {
            self.deps
                .iter()
                .map(|name| (name.clone(), state.get(name).cloned()))
                .collect()
        }
    }
}

fn same_key(a: &Key, b: &Key) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|((name_a, va), (name_b, vb))| {
            name_a == name_b
                && match (va, vb) {
                    (Some(x), Some(y)) => Arc::ptr_eq(x, y),
                    (None, None) => true,
                    _ => false,
                }
        })
}
