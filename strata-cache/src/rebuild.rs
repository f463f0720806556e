//! Reconstruction of composite responses from stored id references.
//!
//! Decomposition (`build_record`) turns a response body into per-type id
//! references at population time; reconstruction (`rebuild`) resolves
//! those references back into a body at read time. Resolution is
//! all-or-nothing: a stale reference never surfaces as a partial or
//! stale composite, it forces a full refetch instead.

use std::collections::HashMap;

use strata_core::{Body, BodySlot, CacheConfig, EntityId, Fingerprint, IdRefs, RequestRecord, Response};

use crate::store::entity::EntityStore;
use crate::store::request::RequestStore;

/// Decompose a body into the id references its request record stores.
///
/// An entity lacking its id field is recorded as an unresolvable
/// reference: the record keeps the body's shape, and the rebuilt
/// composite reads as a miss rather than silently dropping the entity.
pub(crate) fn build_record(config: &CacheConfig, body: &Body) -> RequestRecord {
    let mut record = RequestRecord::new();
    for (entity_type, slot) in body {
        let id_field = config.id_field(entity_type);
        let refs = match slot {
            BodySlot::Single(entity) => IdRefs::Single(ref_of(entity, id_field)),
            BodySlot::Many(entities) => {
                IdRefs::Many(entities.iter().map(|e| ref_of(e, id_field)).collect())
            }
        };
        record.insert(entity_type.clone(), refs);
    }
    record
}

fn ref_of(entity: &serde_json::Value, id_field: &str) -> EntityId {
    entity
        .get(id_field)
        .map(EntityId::from_value)
        .unwrap_or_else(EntityId::unresolvable)
}

/// Rebuild the composite response for one operation + fingerprint.
///
/// Returns `None` (a cache miss) when the request record is absent, the
/// metadata was never recorded, an entity store is missing, or any
/// referenced entity fails to resolve. Recorded-but-empty metadata is
/// valid and proceeds.
pub(crate) fn rebuild(
    operations: &mut HashMap<String, RequestStore>,
    entities: &mut HashMap<String, EntityStore>,
    operation: &str,
    fingerprint: &Fingerprint,
) -> Option<Response> {
    let store = operations.get_mut(operation)?;
    let record = store.get_request(fingerprint)?;
    let headers = store.get_metadata(fingerprint)?;

    let mut body = Body::new();
    for (entity_type, refs) in &record {
        let entity_store = entities.get_mut(entity_type)?;
        let slot = match refs {
            IdRefs::Single(id) => BodySlot::Single(entity_store.get(id)?),
            IdRefs::Many(ids) => {
                let mut resolved = Vec::with_capacity(ids.len());
                for id in ids {
                    resolved.push(entity_store.get(id)?);
                }
                BodySlot::Many(resolved)
            }
        };
        body.insert(entity_type.clone(), slot);
    }

    Some(Response { body, headers })
}
