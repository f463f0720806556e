//! Per-operation request and metadata stores.
//!
//! Each operation gets a pair of bounded stores built from the same
//! policy: one for id-reference records, one for response metadata.
//! They evict independently; eviction of one does not imply eviction of
//! the other. The rebuild path treats a missing metadata entry as a
//! miss, so the asymmetry only ever forces a refetch, never a stale read.

use serde_json::Value;
use strata_core::{CachePolicy, Fingerprint, RequestRecord};

use crate::bounded::BoundedCache;

pub(crate) struct RequestStore {
    requests: BoundedCache<Fingerprint, RequestRecord>,
    metadata: BoundedCache<Fingerprint, Option<Value>>,
}

impl RequestStore {
    pub fn new(policy: &CachePolicy) -> Self {
        Self {
            requests: BoundedCache::new(policy),
            metadata: BoundedCache::new(policy),
        }
    }

    pub fn set_request(&mut self, fingerprint: Fingerprint, record: RequestRecord) {
        self.requests.set(fingerprint, record);
    }

    /// Record response metadata. `None` is a recorded-but-empty value,
    /// distinct from never having recorded anything.
    pub fn set_metadata(&mut self, fingerprint: Fingerprint, headers: Option<Value>) {
        self.metadata.set(fingerprint, headers);
    }

    pub fn get_request(&mut self, fingerprint: &Fingerprint) -> Option<RequestRecord> {
        self.requests.get(fingerprint).cloned()
    }

    /// Outer `None`: never recorded (or evicted). Inner `None`: recorded
    /// with no metadata.
    pub fn get_metadata(&mut self, fingerprint: &Fingerprint) -> Option<Option<Value>> {
        self.metadata.get(fingerprint).cloned()
    }

    /// Drop one fingerprint's request record. The metadata record stays
    /// so header-only queries keep answering, mirroring the read path.
    pub fn invalidate(&mut self, fingerprint: &Fingerprint) {
        self.requests.delete(fingerprint);
    }

    /// Clear both stores.
    pub fn reset(&mut self) {
        self.requests.clear();
        self.metadata.clear();
    }
}
