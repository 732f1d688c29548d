//! Actions and action identifiers

use std::borrow::Cow;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::constants::Constant;

/// Identifies an action type or an action source.
///
/// Identifiers are either plain names (`"ADD_TODO"`) or [`Constant`]s minted by a
/// [`ConstantCollection`](crate::ConstantCollection). Both kinds are hashable so
/// they can be used as lookup keys by the dispatcher and by stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionId {
    /// A plain string identifier
    Name(Cow<'static, str>),
    /// A collection-scoped constant
    Constant(Constant),
}

impl ActionId {
    /// Create a name identifier
    pub fn name(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Name(name.into())
    }

    /// Whether this identifier can be routed (names must not be blank).
    pub fn is_recognizable(&self) -> bool {
        match self {
            Self::Name(name) => !name.trim().is_empty(),
            Self::Constant(_) => true,
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Constant(constant) => constant.fmt(f),
        }
    }
}

impl Serialize for ActionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<&'static str> for ActionId {
    fn from(name: &'static str) -> Self {
        Self::Name(Cow::Borrowed(name))
    }
}

impl From<String> for ActionId {
    fn from(name: String) -> Self {
        Self::Name(Cow::Owned(name))
    }
}

impl From<Constant> for ActionId {
    fn from(constant: Constant) -> Self {
        Self::Constant(constant)
    }
}

impl From<&Constant> for ActionId {
    fn from(constant: &Constant) -> Self {
        Self::Constant(constant.clone())
    }
}

impl From<&ActionId> for ActionId {
    fn from(id: &ActionId) -> Self {
        id.clone()
    }
}

/// Enums whose variants name action types.
///
/// Usually derived with `#[derive(ActionType)]`, which also generates
/// `From<Enum> for ActionId` so variants can be passed anywhere an identifier is
/// expected.
pub trait ActionType: Sized + 'static {
    /// Identifier for this variant
    fn action_id(&self) -> ActionId;

    /// Every variant, in declaration order
    fn all() -> &'static [Self];
}

/// A dispatched action: a type, an optional source and a payload.
///
/// Fields are private; handlers receive `&Action` and cannot reassign them.
/// Payloads with interior mutability are still covered by the dispatcher's
/// mutation check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action<P = serde_json::Value> {
    #[serde(rename = "type")]
    action_type: ActionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<ActionId>,
    payload: P,
}

impl<P> Action<P> {
    /// Create an action without a source
    pub fn new(action_type: impl Into<ActionId>, payload: P) -> Self {
        Self {
            action_type: action_type.into(),
            source: None,
            payload,
        }
    }

    /// Set the action's source
    pub fn with_source(mut self, source: impl Into<ActionId>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn action_type(&self) -> &ActionId {
        &self.action_type
    }

    pub fn source(&self) -> Option<&ActionId> {
        self.source.as_ref()
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ConstantCollection;
    use serde_json::json;

    #[test]
    fn test_recognizable() {
        assert!(ActionId::from("ADD").is_recognizable());
        assert!(!ActionId::from("").is_recognizable());
        assert!(!ActionId::from("   ").is_recognizable());
    }

    #[test]
    fn test_action_serializes_type_and_source() {
        let action = Action::new("ADD", json!({"text": "milk"})).with_source("TodoActions");
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(
            value,
            json!({"type": "ADD", "source": "TodoActions", "payload": {"text": "milk"}})
        );

        let bare = serde_json::to_value(Action::new("TICK", ())).unwrap();
        assert_eq!(bare, json!({"type": "TICK", "payload": null}));
    }

    #[test]
    fn test_constant_ids_display_with_collection() {
        let constants = ConstantCollection::new(["ADD"]).unwrap();
        let add = constants.get("ADD").unwrap();
        let id = ActionId::from(add);
        assert_eq!(id.to_string(), format!("ADD_#{}", constants.id()));
        assert_ne!(id, ActionId::from("ADD"));
    }
}
