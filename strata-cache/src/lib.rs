//! Strata - a normalized two-tier response cache.
//!
//! Strata sits in front of arbitrary asynchronous fetch functions and
//! caches their results at two granularities: per request (operation
//! name + parameter fingerprint) and per entity (type + id). Request
//! records store only entity-id references, never entity data.
//!
//! # Design Philosophy
//!
//! The two tiers evict independently, so a cached request can outlive
//! the entities it references. Strata never papers over that: reads
//! rebuild the composite from the entity stores and treat the whole
//! entry as a miss the moment any single reference fails to resolve.
//! A stale reference can force a refetch; it can never surface as a
//! stale or partial value.
//!
//! # Population
//!
//! A successful fetch resolves the caller immediately; the three stores
//! are populated by a detached follow-up task. [`Cache::quiesce`] is the
//! synchronization point for code (tests, mostly) that needs population
//! to have finished. Concurrent identical fetches are not coalesced:
//! each one that misses reaches the underlying fetcher.
//!
//! # Example
//!
//! ```ignore
//! use strata_cache::{Cache, CacheConfig, CachePolicy, FetchOptions, fetch_fn};
//!
//! let cache = Cache::new(
//!     CacheConfig::new()
//!         .with_default_entity_policy(CachePolicy::new(500))
//!         .with_default_request_policy(CachePolicy::new(100)),
//! );
//!
//! let get_user = fetch_fn("getUser", |params| async move {
//!     client.get_user(params).await
//! });
//!
//! let response = cache
//!     .fetch(&get_user, serde_json::json!({"id": 1}), &FetchOptions::new())
//!     .await?;
//! ```

mod bounded;
mod rebuild;
mod store;

pub mod cache;

pub use cache::{fetch_fn, Cache, FetchOptions, Fetcher, FnFetcher, Rule, Transform};

// Re-export core types for API integration
pub use strata_core::{
    Body, BodySlot, BoxError, CacheConfig, CacheError, CachePolicy, CacheResult, ConfigError,
    EntityId, EntityTypeConfig, Fingerprint, IdRefs, RequestRecord, Response, StoreError,
};
