//! The cache orchestrator.
//!
//! Ties the fingerprint function, entity stores, request/metadata stores
//! and the reconstruction engine together behind the `fetch`/`fetch_by_id`
//! contract: check bypass rules, attempt reconstruction, fall back to the
//! caller-supplied fetcher, and populate all three stores from a
//! successful result.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use strata_core::{
    Body, BodySlot, BoxError, CacheConfig, CacheError, CachePolicy, CacheResult, ConfigError,
    EntityId, Fingerprint, RequestRecord, Response, StoreError,
};

use crate::rebuild;
use crate::store::entity::EntityStore;
use crate::store::request::RequestStore;

/// Transform applied to a response body on the way into (`format`) or
/// out of (`unformat`) the cache. The two are expected to be mutual
/// inverses.
pub type Transform = Arc<dyn Fn(Body) -> Body + Send + Sync>;

/// Predicate over call parameters. A rule returning `false` bypasses the
/// cache read and forces a fresh fetch.
pub type Rule = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Asynchronous source of truth the cache sits in front of.
///
/// Implementations produce a fresh composite response for a parameter
/// value. Failures propagate to the caller unchanged; the cache neither
/// retries nor writes anything on failure.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Identifier used as the operation key when the call options carry
    /// no `name` override.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Produce a fresh composite response for `params`.
    async fn fetch(&self, params: Value) -> Result<Response, BoxError>;
}

/// Adapter turning an async closure into a (possibly named) [`Fetcher`].
pub struct FnFetcher<F> {
    name: Option<String>,
    f: F,
}

impl<F> FnFetcher<F> {
    /// Wrap a closure with no identifier of its own. The operation key
    /// must then come from [`FetchOptions::name`].
    pub fn unnamed(f: F) -> Self {
        Self { name: None, f }
    }
}

/// Wrap an async closure as a named [`Fetcher`].
pub fn fetch_fn<F, Fut>(name: impl Into<String>, f: F) -> FnFetcher<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, BoxError>> + Send,
{
    FnFetcher {
        name: Some(name.into()),
        f,
    }
}

#[async_trait]
impl<F, Fut> Fetcher for FnFetcher<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, BoxError>> + Send,
{
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn fetch(&self, params: Value) -> Result<Response, BoxError> {
        (self.f)(params).await
    }
}

/// Per-call options for [`Cache::fetch`].
#[derive(Default, Clone)]
pub struct FetchOptions {
    /// Operation key override. Falls back to the fetcher's own name.
    pub name: Option<String>,
    /// Capacity policy for the operation's request/metadata stores,
    /// required the first time an operation is used unless a default
    /// request policy is configured.
    pub policy: Option<CachePolicy>,
    /// Bypass rules. Any rule returning `false` forces a fresh fetch.
    pub rules: Vec<Rule>,
    /// Transform applied to a copy of the body before population.
    pub format: Option<Transform>,
    /// Inverse transform applied to a reconstructed body.
    pub unformat: Option<Transform>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the operation key.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the request store policy.
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Add a bypass rule.
    pub fn with_rule(mut self, rule: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Set the write-time body transform.
    pub fn with_format(mut self, format: impl Fn(Body) -> Body + Send + Sync + 'static) -> Self {
        self.format = Some(Arc::new(format));
        self
    }

    /// Set the read-time body transform.
    pub fn with_unformat(
        mut self,
        unformat: impl Fn(Body) -> Body + Send + Sync + 'static,
    ) -> Self {
        self.unformat = Some(Arc::new(unformat));
        self
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("rules", &self.rules.len())
            .field("format", &self.format.is_some())
            .field("unformat", &self.unformat.is_some())
            .finish()
    }
}

struct Inner {
    config: CacheConfig,
    // Lock order: operations before entities, everywhere.
    operations: RwLock<HashMap<String, RequestStore>>,
    entities: RwLock<HashMap<String, EntityStore>>,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Normalized two-tier response cache.
///
/// Caches fetch results per request (operation name + parameter
/// fingerprint) and per entity (type + id). Request records hold only id
/// references; reads rebuild the composite and miss the moment any
/// referenced entity is gone, forcing a refetch instead of surfacing a
/// stale or partial value.
///
/// All stores are owned exclusively by one `Cache` instance; clones share
/// that instance's storage, independent instances never do.
///
/// # Example
///
/// ```ignore
/// let cache = Cache::new(
///     CacheConfig::new()
///         .with_default_entity_policy(CachePolicy::new(500))
///         .with_default_request_policy(CachePolicy::new(100)),
/// );
///
/// let get_user = fetch_fn("getUser", |params| async move {
///     api.get_user(params).await
/// });
///
/// let response = cache.fetch(&get_user, json!({"id": 1}), &FetchOptions::new()).await?;
/// ```
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Cache {
    /// Build a cache from configuration. Entity stores for declared
    /// types with a resolvable policy are created eagerly; everything
    /// else is created lazily on first use.
    pub fn new(config: CacheConfig) -> Self {
        let mut entities = HashMap::new();
        for (name, declared) in &config.entity_types {
            let policy = declared
                .policy
                .as_ref()
                .or(config.default_entity_policy.as_ref());
            match policy {
                Some(policy) => {
                    entities.insert(
                        name.clone(),
                        EntityStore::new(declared.id_field.clone(), policy),
                    );
                }
                None => {
                    tracing::debug!(entity_type = %name, "declared type has no policy, store deferred");
                }
            }
        }

        Self {
            inner: Arc::new(Inner {
                config,
                operations: RwLock::new(HashMap::new()),
                entities: RwLock::new(entities),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// The configuration this cache was built from.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Fetch through the cache.
    ///
    /// Attempts reconstruction first (unless a bypass rule fires) and
    /// falls back to the fetcher. On fetcher success the caller gets the
    /// raw result immediately; population of the three stores runs as a
    /// detached task. Use [`Cache::quiesce`] to wait for population
    /// before asserting on cache state.
    pub async fn fetch<F>(
        &self,
        fetcher: &F,
        params: Value,
        options: &FetchOptions,
    ) -> CacheResult<Response>
    where
        F: Fetcher + ?Sized,
    {
        let operation = options
            .name
            .as_deref()
            .or_else(|| fetcher.name())
            .ok_or(ConfigError::MissingOperationKey)?
            .to_string();

        let fingerprint = Fingerprint::of(&params);

        // A missing policy is a setup mistake; surface it before any
        // fetch rather than losing it inside the detached population.
        self.ensure_request_store(&operation, options)?;

        let bypassed = options.rules.iter().any(|rule| !rule(&params));

        if !bypassed {
            if let Some(mut response) = self.try_rebuild(&operation, &fingerprint)? {
                if let Some(unformat) = &options.unformat {
                    response.body = unformat(response.body);
                }
                tracing::debug!(operation = %operation, fingerprint = %fingerprint, "cache hit");
                return Ok(response);
            }
        }

        tracing::debug!(operation = %operation, fingerprint = %fingerprint, bypassed, "fetching");
        let response = fetcher.fetch(params).await.map_err(CacheError::Fetch)?;

        self.ensure_entity_stores(&response.body)?;
        self.spawn_population(
            operation,
            fingerprint,
            response.clone(),
            options.format.clone(),
        );

        Ok(response)
    }

    /// Shortcut for single-entity operations.
    ///
    /// If the entity store for `entity_type` already holds `id`, a
    /// single-entity composite is synthesized directly: no request or
    /// metadata store is consulted, no rule runs, the fetcher is not
    /// invoked. Otherwise this delegates entirely to [`Cache::fetch`].
    pub async fn fetch_by_id<F>(
        &self,
        entity_type: &str,
        id: &Value,
        fetcher: &F,
        params: Value,
        options: &FetchOptions,
    ) -> CacheResult<Response>
    where
        F: Fetcher + ?Sized,
    {
        let hit = {
            let mut entities = self.write_entities()?;
            entities
                .get_mut(entity_type)
                .and_then(|store| store.get(&EntityId::from_value(id)))
        };

        if let Some(entity) = hit {
            let mut body = Body::new();
            body.insert(entity_type.to_string(), BodySlot::Single(entity));
            if let Some(unformat) = &options.unformat {
                body = unformat(body);
            }
            return Ok(Response::new(body));
        }

        self.fetch(fetcher, params, options).await
    }

    /// Metadata lookup without fetch fallback.
    ///
    /// Outer `None`: nothing recorded (or evicted). Inner `None`: a
    /// response with no metadata was recorded.
    pub fn peek_head(&self, operation: &str, params: &Value) -> CacheResult<Option<Option<Value>>> {
        let fingerprint = Fingerprint::of(params);
        let mut operations = self.write_operations()?;
        Ok(operations
            .get_mut(operation)
            .and_then(|store| store.get_metadata(&fingerprint)))
    }

    /// Reconstructed-body lookup without fetch fallback.
    pub fn peek_body(&self, operation: &str, params: &Value) -> CacheResult<Option<Body>> {
        let fingerprint = Fingerprint::of(params);
        Ok(self
            .try_rebuild(operation, &fingerprint)?
            .map(|response| response.body))
    }

    /// Drop every entity store. Stores are re-created lazily afterwards.
    pub fn reset_entities(&self) -> CacheResult<()> {
        self.write_entities()?.clear();
        Ok(())
    }

    /// Clear one entity store, or merge-reset it with `data`. Creates
    /// the store first if a policy resolves for the type; otherwise this
    /// is a no-op.
    pub fn reset_entity_type(&self, entity_type: &str, data: Option<&Value>) -> CacheResult<()> {
        let mut entities = self.write_entities()?;
        match entities.get_mut(entity_type) {
            Some(store) => store.reset(data),
            None => {
                if let Some(policy) = self.inner.config.entity_policy(entity_type) {
                    let mut store =
                        EntityStore::new(self.inner.config.id_field(entity_type), policy);
                    store.reset(data);
                    entities.insert(entity_type.to_string(), store);
                }
            }
        }
        Ok(())
    }

    /// Remove entities from one type's store, by raw id, entity, or an
    /// array of either. No-op for an unknown type.
    pub fn delete_entities(&self, entity_type: &str, target: &Value) -> CacheResult<()> {
        if let Some(store) = self.write_entities()?.get_mut(entity_type) {
            store.delete(target);
        }
        Ok(())
    }

    /// Invalidate one fingerprint's request record. Its metadata record
    /// stays for header-only queries.
    pub fn invalidate(&self, operation: &str, params: &Value) -> CacheResult<()> {
        let fingerprint = Fingerprint::of(params);
        if let Some(store) = self.write_operations()?.get_mut(operation) {
            store.invalidate(&fingerprint);
        }
        Ok(())
    }

    /// Overwrite one fingerprint's request record in place, leaving its
    /// metadata untouched. No-op until the operation has stores.
    pub fn pin_request(
        &self,
        operation: &str,
        params: &Value,
        record: RequestRecord,
    ) -> CacheResult<()> {
        let fingerprint = Fingerprint::of(params);
        if let Some(store) = self.write_operations()?.get_mut(operation) {
            store.set_request(fingerprint, record);
        }
        Ok(())
    }

    /// Clear one operation's request and metadata stores.
    pub fn reset_operation(&self, operation: &str) -> CacheResult<()> {
        if let Some(store) = self.write_operations()?.get_mut(operation) {
            store.reset();
        }
        Ok(())
    }

    /// Drop the request and metadata stores for every operation.
    pub fn reset_operations(&self) -> CacheResult<()> {
        self.write_operations()?.clear();
        Ok(())
    }

    /// Wait until every detached population task spawned so far has
    /// finished. Test suites call this before asserting on cache state;
    /// nothing else is guaranteed about population ordering.
    pub async fn quiesce(&self) {
        while self.inner.in_flight.load(Ordering::Acquire) != 0 {
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }
    }

    fn write_operations(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, RequestStore>>, StoreError> {
        self.inner
            .operations
            .write()
            .map_err(|_| StoreError::LockPoisoned)
    }

    fn write_entities(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, EntityStore>>, StoreError> {
        self.inner
            .entities
            .write()
            .map_err(|_| StoreError::LockPoisoned)
    }

    fn try_rebuild(
        &self,
        operation: &str,
        fingerprint: &Fingerprint,
    ) -> CacheResult<Option<Response>> {
        let mut operations = self.write_operations()?;
        let mut entities = self.write_entities()?;
        Ok(rebuild::rebuild(
            &mut operations,
            &mut entities,
            operation,
            fingerprint,
        ))
    }

    fn ensure_request_store(&self, operation: &str, options: &FetchOptions) -> CacheResult<()> {
        let mut operations = self.write_operations()?;
        if operations.contains_key(operation) {
            return Ok(());
        }
        let policy = options
            .policy
            .as_ref()
            .or(self.inner.config.default_request_policy.as_ref())
            .ok_or_else(|| ConfigError::MissingOperationPolicy {
                operation: operation.to_string(),
            })?;
        operations.insert(operation.to_string(), RequestStore::new(policy));
        Ok(())
    }

    fn ensure_entity_stores(&self, body: &Body) -> CacheResult<()> {
        let mut entities = self.write_entities()?;
        for entity_type in body.keys() {
            if entities.contains_key(entity_type) {
                continue;
            }
            let policy = self.inner.config.entity_policy(entity_type).ok_or_else(|| {
                ConfigError::MissingEntityPolicy {
                    entity_type: entity_type.clone(),
                }
            })?;
            entities.insert(
                entity_type.clone(),
                EntityStore::new(self.inner.config.id_field(entity_type), policy),
            );
        }
        Ok(())
    }

    /// Fire-and-forget population of all three stores. No handle is
    /// returned and no failure propagates; [`Cache::quiesce`] is the
    /// synchronization point.
    fn spawn_population(
        &self,
        operation: String,
        fingerprint: Fingerprint,
        mut response: Response,
        format: Option<Transform>,
    ) {
        let inner = Arc::clone(&self.inner);
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            if let Some(format) = format {
                response.body = format(response.body);
            }
            if let Err(err) = populate(&inner, &operation, fingerprint, response) {
                tracing::warn!(operation = %operation, error = %err, "cache population failed");
            }
            if inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                inner.idle.notify_waiters();
            }
        });
    }
}

fn populate(
    inner: &Inner,
    operation: &str,
    fingerprint: Fingerprint,
    response: Response,
) -> CacheResult<()> {
    let record = rebuild::build_record(&inner.config, &response.body);

    {
        let mut operations = inner
            .operations
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        // The store was created before this task was spawned; it can
        // only be missing if the operation was reset in between, in
        // which case the write is stale and dropped.
        if let Some(store) = operations.get_mut(operation) {
            store.set_metadata(fingerprint.clone(), response.headers.clone());
            store.set_request(fingerprint, record);
        }
    }

    let mut entities = inner
        .entities
        .write()
        .map_err(|_| StoreError::LockPoisoned)?;
    for (entity_type, slot) in &response.body {
        if let Some(store) = entities.get_mut(entity_type) {
            store.put_all(slot);
        }
    }

    Ok(())
}
