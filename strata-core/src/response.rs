//! Composite response shapes and entity references.
//!
//! A composite response is never stored as such. Its body is decomposed
//! into per-type entity records plus a request record of id references,
//! and rebuilt on read by resolving those references.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical identity of one entity.
///
/// Holds the JSON text of the id value, so `1` and `"1"` remain distinct
/// ids. Derived from an entity by reading its type's configured id field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    /// Identity of a raw id value.
    pub fn from_value(value: &Value) -> Self {
        EntityId(value.to_string())
    }

    /// A reference that can never resolve.
    ///
    /// Recorded in place of the id of an entity that lacks its id field,
    /// so that a rebuilt composite is never partial: the request record
    /// keeps its shape but always reads as a miss.
    pub fn unresolvable() -> Self {
        // JSON text never starts with NUL, so this cannot collide with
        // any id produced by `from_value`.
        EntityId("\u{0}unresolvable".to_string())
    }

    /// The canonical JSON text of the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One slot of a response body: a single entity or an ordered run of them.
///
/// The variant is explicit so nothing downstream has to sniff whether a
/// value "looks like" a sequence. `Many` must precede `Single` here:
/// untagged deserialization tries variants in order, and `Single` holds a
/// `Value` that would otherwise swallow arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BodySlot {
    Many(Vec<Value>),
    Single(Value),
}

impl BodySlot {
    /// Iterate the entities in this slot, in order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        match self {
            BodySlot::Single(entity) => std::slice::from_ref(entity).iter(),
            BodySlot::Many(entities) => entities.iter(),
        }
    }

    /// Returns true for the ordered-sequence variant.
    pub fn is_many(&self) -> bool {
        matches!(self, BodySlot::Many(_))
    }
}

/// Response body: entity-type name to one entity or an ordered sequence.
pub type Body = BTreeMap<String, BodySlot>;

/// Reference-shaped mirror of [`BodySlot`]: the id(s) a request record
/// stores in place of entity data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdRefs {
    Single(EntityId),
    Many(Vec<EntityId>),
}

/// Cached id references for one operation + fingerprint.
///
/// Invariant: a request record never stores entity data, only references.
pub type RequestRecord = BTreeMap<String, IdRefs>;

/// The composite return value of an operation: a body plus response
/// metadata. `headers: None` means the fetch carried no metadata; the
/// metadata store keeps that distinct from "never recorded".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub body: Body,
    #[serde(default)]
    pub headers: Option<Value>,
}

impl Response {
    /// A response with a body and no metadata.
    pub fn new(body: Body) -> Self {
        Self {
            body,
            headers: None,
        }
    }

    /// Attach response metadata.
    pub fn with_headers(mut self, headers: Value) -> Self {
        self.headers = Some(headers);
        self
    }
}
