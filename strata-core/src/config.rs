//! Configuration for cache construction.
//!
//! Entity types and per-operation defaults are declared once at
//! construction and are immutable afterwards. Capacity policies are
//! opaque to the rest of the system: they are handed to the bounded
//! cache primitive at store-creation time and never inspected again.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Default id field for entity types that do not configure one.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Capacity policy for one bounded store.
///
/// At minimum a maximum entry count; optionally a TTL after which an
/// entry reads as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Maximum number of entries before least-recently-used eviction.
    pub max_entries: NonZeroUsize,
    /// Time-to-live for entries. `None` disables TTL expiry.
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    /// Create a policy bounded to `max_entries`. Zero is clamped to one.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN),
            ttl: None,
        }
    }

    /// Set a TTL after which entries read as absent.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Declaration of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeConfig {
    /// Field holding the entity's identity.
    pub id_field: String,
    /// Capacity policy for this type's entity store. Falls back to the
    /// cache-wide default entity policy when unset.
    pub policy: Option<CachePolicy>,
}

impl Default for EntityTypeConfig {
    fn default() -> Self {
        Self {
            id_field: DEFAULT_ID_FIELD.to_string(),
            policy: None,
        }
    }
}

impl EntityTypeConfig {
    /// Create a declaration with the default id field and no explicit policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the id field.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Set an explicit capacity policy.
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// Top-level cache configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Fallback policy for entity stores of undeclared types, and for
    /// declared types without an explicit policy.
    pub default_entity_policy: Option<CachePolicy>,
    /// Fallback policy for request/metadata store pairs when the call
    /// options carry none.
    pub default_request_policy: Option<CachePolicy>,
    /// Declared entity types, keyed by type name.
    pub entity_types: HashMap<String, EntityTypeConfig>,
}

impl CacheConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default entity store policy.
    pub fn with_default_entity_policy(mut self, policy: CachePolicy) -> Self {
        self.default_entity_policy = Some(policy);
        self
    }

    /// Set the default request store policy.
    pub fn with_default_request_policy(mut self, policy: CachePolicy) -> Self {
        self.default_request_policy = Some(policy);
        self
    }

    /// Declare an entity type.
    pub fn with_entity_type(
        mut self,
        name: impl Into<String>,
        config: EntityTypeConfig,
    ) -> Self {
        self.entity_types.insert(name.into(), config);
        self
    }

    /// The id field for `entity_type`, declared or default.
    pub fn id_field(&self, entity_type: &str) -> &str {
        self.entity_types
            .get(entity_type)
            .map(|t| t.id_field.as_str())
            .unwrap_or(DEFAULT_ID_FIELD)
    }

    /// The entity store policy for `entity_type`: the type's own policy
    /// if declared, otherwise the cache-wide default.
    pub fn entity_policy(&self, entity_type: &str) -> Option<&CachePolicy> {
        self.entity_types
            .get(entity_type)
            .and_then(|t| t.policy.as_ref())
            .or(self.default_entity_policy.as_ref())
    }
}
