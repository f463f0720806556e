//! Strata Core - Data Types
//!
//! Pure data structures for the Strata normalized response cache.
//! This crate contains only types, configuration, and the parameter
//! fingerprint function - no store or orchestration logic.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod response;

pub use config::{CacheConfig, CachePolicy, EntityTypeConfig, DEFAULT_ID_FIELD};
pub use error::{BoxError, CacheError, CacheResult, ConfigError, StoreError};
pub use fingerprint::Fingerprint;
pub use response::{Body, BodySlot, EntityId, IdRefs, RequestRecord, Response};
