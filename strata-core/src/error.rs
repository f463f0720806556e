//! Error types for Strata operations

use thiserror::Error;

/// Boxed error type used to propagate fetch-function failures unchanged.
///
/// The cache never interprets a fetch failure; callers can downcast the
/// boxed error to the fetcher's own error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration errors.
///
/// These signal a setup mistake, not a transient condition. They surface
/// synchronously to the caller and are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no operation key: pass `name` in the call options or use a named fetcher")]
    MissingOperationKey,

    #[error("no cache policy configured for operation `{operation}`")]
    MissingOperationPolicy { operation: String },

    #[error("no cache policy configured for entity type `{entity_type}`")]
    MissingEntityPolicy { entity_type: String },
}

/// Store-level errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Master error type for all Strata errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The underlying fetch function failed. The failure is propagated
    /// unchanged; no cache writes occur.
    #[error("fetch failed: {0}")]
    Fetch(#[source] BoxError),
}

impl CacheError {
    /// Returns true if this error came from the underlying fetch function.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }

    /// Returns true if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias for Strata operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
