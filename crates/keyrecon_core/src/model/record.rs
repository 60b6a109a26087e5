//! Domain record model.
//!
//! # Responsibility
//! - Define the canonical record passed between callers, engine and stores.
//! - Provide small attribute accessors used by key extraction and linking.
//!
//! # Invariants
//! - `id` is `None` until the store persists the record.
//! - Attribute names are case-sensitive; the map keeps them sorted so
//!   serialized attributes are deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Store-assigned identifier of a persisted record.
pub type RecordId = Uuid;

/// Attribute map of one record.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Scalar attribute value.
///
/// Serialized untagged so persisted attributes stay plain JSON objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    /// Integers also carry dates as epoch milliseconds.
    Integer(i64),
    Text(String),
}

impl AttrValue {
    /// Returns the text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<RecordId> for AttrValue {
    fn from(value: RecordId) -> Self {
        Self::Text(value.to_string())
    }
}

/// One entity of a given kind, e.g. an account or a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Entity kind, e.g. `account`.
    pub kind: String,
    /// Absent until persisted.
    pub id: Option<RecordId>,
    pub attributes: Attributes,
}

impl DomainRecord {
    /// Creates an unpersisted record with no attributes.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            attributes: Attributes::new(),
        }
    }

    /// Creates a record that already carries a store identifier.
    ///
    /// Used by stores when hydrating rows.
    pub fn with_id(kind: impl Into<String>, id: RecordId) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id),
            attributes: Attributes::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Returns a text attribute, ignoring non-text values.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttrValue::as_text)
    }

    /// Returns whether the record has been persisted.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}
