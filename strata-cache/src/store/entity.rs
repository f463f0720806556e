//! Per-type entity store.
//!
//! One store per entity type owns the canonical, most-recent copy of
//! each entity, keyed by the value of the type's id field. Entities are
//! overwritten in place on every write, never merged field by field.

use serde_json::Value;
use strata_core::{BodySlot, CachePolicy, EntityId};

use crate::bounded::BoundedCache;

pub(crate) struct EntityStore {
    id_field: String,
    entries: BoundedCache<EntityId, Value>,
}

impl EntityStore {
    pub fn new(id_field: impl Into<String>, policy: &CachePolicy) -> Self {
        Self {
            id_field: id_field.into(),
            entries: BoundedCache::new(policy),
        }
    }

    fn id_of(&self, entity: &Value) -> Option<EntityId> {
        entity.get(&self.id_field).map(EntityId::from_value)
    }

    /// Write one entity at its id. Entities lacking the id field are
    /// skipped rather than corrupting the store.
    pub fn put(&mut self, entity: &Value) {
        match self.id_of(entity) {
            Some(id) => self.entries.set(id, entity.clone()),
            None => {
                tracing::debug!(id_field = %self.id_field, "skipping entity without id field");
            }
        }
    }

    /// Write every entity in a body slot.
    pub fn put_all(&mut self, slot: &BodySlot) {
        for entity in slot.iter() {
            self.put(entity);
        }
    }

    pub fn get(&mut self, id: &EntityId) -> Option<Value> {
        self.entries.get(id).cloned()
    }

    /// Remove entries by raw id, by entity (id extracted), or by an
    /// array mixing either.
    pub fn delete(&mut self, target: &Value) {
        match target {
            Value::Array(items) => {
                for item in items {
                    self.delete_one(item);
                }
            }
            other => self.delete_one(other),
        }
    }

    fn delete_one(&mut self, target: &Value) {
        let id = match target {
            Value::Object(_) => match self.id_of(target) {
                Some(id) => id,
                None => return,
            },
            raw_id => EntityId::from_value(raw_id),
        };
        self.entries.delete(&id);
    }

    /// Merge-reset: with no data, clear the store; with data, overlay it
    /// via put semantics, leaving entries absent from `data` untouched.
    pub fn reset(&mut self, data: Option<&Value>) {
        match data {
            None => self.entries.clear(),
            Some(Value::Array(entities)) => {
                for entity in entities {
                    self.put(entity);
                }
            }
            Some(entity) => self.put(entity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
