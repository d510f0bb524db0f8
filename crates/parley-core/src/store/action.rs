//! Actions and the action factory.
//!
//! Action types are namespaced `"<domain>/<VERB>"` strings on the wire but a
//! discriminated [`ActionType`] in code. The `store` namespace is reserved
//! for the container's own bookkeeping actions.

use crate::error::{ParleyError, Result};
use chrono::Utc;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Namespace reserved for container bookkeeping actions.
pub const STORE_DOMAIN: &str = "store";

/// The discriminated type of an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// `store/INIT`, dispatched once when a store is built
    Init,
    /// `store/RESET`, replaces substates with the payload
    Reset,
    /// `store/PERSISTED`, records a completed `persist`
    Persisted,
    /// A domain action, e.g. `chat/SET_MESSAGES`
    Domain { domain: String, verb: String },
}

impl ActionType {
    /// Builds a validated domain action type.
    pub fn domain(domain: &str, verb: &str) -> Result<Self> {
        validate_domain(domain)?;
        validate_verb(verb)?;
        if domain == STORE_DOMAIN {
            return Err(ParleyError::validation(format!(
                "'{}' is reserved for store bookkeeping actions",
                STORE_DOMAIN
            )));
        }
        Ok(Self::Domain {
            domain: domain.to_string(),
            verb: verb.to_string(),
        })
    }

    /// Parses a namespaced `"<domain>/<VERB>"` string.
    pub fn parse(raw: &str) -> Result<Self> {
        let (domain, verb) = raw.split_once('/').ok_or_else(|| {
            ParleyError::validation(format!("action type '{}' is not namespaced", raw))
        })?;
        if domain == STORE_DOMAIN {
            return match verb {
                "INIT" => Ok(Self::Init),
                "RESET" => Ok(Self::Reset),
                "PERSISTED" => Ok(Self::Persisted),
                _ => Err(ParleyError::validation(format!(
                    "unknown store action '{}'",
                    raw
                ))),
            };
        }
        Self::domain(domain, verb)
    }

    /// The domain namespace of this type.
    pub fn namespace(&self) -> &str {
        match self {
            Self::Domain { domain, .. } => domain,
            _ => STORE_DOMAIN,
        }
    }

    pub fn verb(&self) -> &str {
        match self {
            Self::Init => "INIT",
            Self::Reset => "RESET",
            Self::Persisted => "PERSISTED",
            Self::Domain { verb, .. } => verb,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace(), self.verb())
    }
}

impl Serialize for ActionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ActionType::parse(&raw).map_err(de::Error::custom)
    }
}

/// An immutable record describing an intended state change.
///
/// Fields are private: actions are only created through [`ActionFactory`]
/// or the bookkeeping constructors, and never change once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    kind: ActionType,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    meta: Map<String, Value>,
    timestamp: i64,
}

impl Action {
    fn build(kind: ActionType, payload: Value, meta: Map<String, Value>) -> Self {
        Self {
            kind,
            payload,
            meta,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// `store/RESET` carrying the replacement state.
    pub fn reset(payload: Value) -> Self {
        Self::build(ActionType::Reset, payload, Map::new())
    }

    pub(crate) fn init() -> Self {
        Self::build(ActionType::Init, Value::Null, Map::new())
    }

    pub(crate) fn persisted(payload: Value) -> Self {
        Self::build(ActionType::Persisted, payload, Map::new())
    }

    /// Returns a copy of this action with an extra meta entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> &ActionType {
        &self.kind
    }

    /// The namespaced type string, e.g. `"chat/SET_MESSAGES"`.
    pub fn type_name(&self) -> String {
        self.kind.to_string()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    /// Creation time in epoch milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn is_reset(&self) -> bool {
        self.kind == ActionType::Reset
    }

    /// Decodes the payload into a typed value.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Builds actions for one domain namespace.
///
/// # Example
///
/// ```ignore
/// let chat = ActionFactory::new("chat")?;
/// let action = chat.create("SET_MESSAGES", json!([]))?;
/// assert_eq!(action.type_name(), "chat/SET_MESSAGES");
/// ```
#[derive(Debug, Clone)]
pub struct ActionFactory {
    domain: String,
}

impl ActionFactory {
    pub fn new(domain: impl Into<String>) -> Result<Self> {
        let domain = domain.into();
        validate_domain(&domain)?;
        if domain == STORE_DOMAIN {
            return Err(ParleyError::validation(format!(
                "'{}' is reserved for store bookkeeping actions",
                STORE_DOMAIN
            )));
        }
        Ok(Self { domain })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The validated type for `verb` in this namespace.
    pub fn action_type(&self, verb: &str) -> Result<ActionType> {
        ActionType::domain(&self.domain, verb)
    }

    pub fn create(&self, verb: &str, payload: Value) -> Result<Action> {
        self.create_with_meta(verb, payload, Map::new())
    }

    pub fn create_with_meta(
        &self,
        verb: &str,
        payload: Value,
        meta: Map<String, Value>,
    ) -> Result<Action> {
        Ok(Action::build(self.action_type(verb)?, payload, meta))
    }
}

/// Creates an action from a full `"<domain>/<VERB>"` type string.
pub fn create_action(type_name: &str, payload: Value) -> Result<Action> {
    let kind = ActionType::parse(type_name)?;
    if !matches!(kind, ActionType::Domain { .. } | ActionType::Reset) {
        return Err(ParleyError::validation(format!(
            "'{}' is dispatched by the store itself",
            type_name
        )));
    }
    Ok(Action::build(kind, payload, Map::new()))
}

fn validate_domain(domain: &str) -> Result<()> {
    let mut chars = domain.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ParleyError::validation(format!(
            "invalid action domain '{}': expected lowercase identifier",
            domain
        )))
    }
}

fn validate_verb(verb: &str) -> Result<()> {
    let mut chars = verb.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ParleyError::validation(format!(
            "invalid action verb '{}': expected UPPER_SNAKE_CASE",
            verb
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_factory_builds_namespaced_types() {
        let chat = ActionFactory::new("chat").unwrap();
        let action = chat.create("SET_MESSAGES", json!([1, 2])).unwrap();
        assert_eq!(action.type_name(), "chat/SET_MESSAGES");
        assert_eq!(action.payload(), &json!([1, 2]));
        assert!(action.timestamp() > 0);
    }

    #[test]
    fn test_factory_rejects_bad_names() {
        assert!(ActionFactory::new("Chat").is_err());
        assert!(ActionFactory::new("").is_err());
        assert!(ActionFactory::new(STORE_DOMAIN).is_err());

        let chat = ActionFactory::new("chat").unwrap();
        assert!(chat.create("setMessages", Value::Null).unwrap_err().is_validation());
        assert!(chat.create("", Value::Null).is_err());
    }

    #[test]
    fn test_parse_round_trip() {
        for raw in ["store/RESET", "store/PERSISTED", "history/LOADED"] {
            assert_eq!(ActionType::parse(raw).unwrap().to_string(), raw);
        }
        assert!(ActionType::parse("no-namespace").is_err());
        assert!(ActionType::parse("store/UNKNOWN").is_err());
    }

    #[test]
    fn test_create_action_refuses_store_internal_types() {
        assert!(create_action("store/PERSISTED", Value::Null).is_err());
        assert!(create_action("store/RESET", json!({})).unwrap().is_reset());
    }

    #[test]
    fn test_action_serializes_type_field() {
        let action = Action::reset(json!({"chat": {}})).with_meta("source", json!("test"));
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "store/RESET");
        assert_eq!(value["meta"]["source"], "test");

        let back: Action = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }
}
