//! The state tree held by the store.

use crate::error::{ParleyError, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mapping from domain name to that domain's substate.
///
/// Substates are shared behind `Arc`; a domain whose reducer made no change
/// keeps the same allocation, which is what selectors and path subscriptions
/// compare against. Cloning a tree is shallow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateTree {
    domains: BTreeMap<String, Arc<Value>>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, domain: &str) -> Option<&Arc<Value>> {
        self.domains.get(domain)
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    pub fn domain_names(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Value>)> {
        self.domains.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn insert(&mut self, domain: impl Into<String>, substate: Arc<Value>) {
        self.domains.insert(domain.into(), substate);
    }

    /// Resolves a dot-delimited path such as `"chat.messages"`.
    ///
    /// Numeric segments index into arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let root = self.domains.get(segments.next()?)?;
        lookup_value(root, segments)
    }

    /// Whether a domain holds the same allocation in both trees.
    pub fn same_domain(&self, other: &StateTree, domain: &str) -> bool {
        match (self.get(domain), other.get(domain)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// A copy restricted to `include` (all domains when empty) minus `exclude`.
    pub fn filtered(&self, include: &[String], exclude: &[String]) -> StateTree {
        let domains = self
            .domains
            .iter()
            .filter(|(name, _)| include.is_empty() || include.contains(*name))
            .filter(|(name, _)| !exclude.contains(*name))
            .map(|(name, value)| (name.clone(), Arc::clone(value)))
            .collect();
        StateTree { domains }
    }

    /// Deep copy as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.domains
                .iter()
                .map(|(k, v)| (k.clone(), (**v).clone()))
                .collect::<Map<String, Value>>(),
        )
    }

    /// Builds a tree from a JSON object, one domain per key.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(StateTree {
                domains: map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            }),
            other => Err(ParleyError::validation(format!(
                "state tree must be an object, found {}",
                crate::conversation::value_kind(&other)
            ))),
        }
    }
}

impl Serialize for StateTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.domains.len()))?;
        for (domain, value) in &self.domains {
            map.serialize_entry(domain, value.as_ref())?;
        }
        map.end()
    }
}

pub(crate) fn lookup_value<'a, 'b>(
    root: &'a Value,
    segments: impl Iterator<Item = &'b str>,
) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
