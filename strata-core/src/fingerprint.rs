//! Parameter fingerprints.
//!
//! A fingerprint is the SHA-256 digest of the canonical JSON form of an
//! operation's parameters and serves as the request-cache key. Two
//! parameter values with the same fingerprint are treated as the same
//! cached request; collisions are accepted as indistinguishable.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic hex digest of an operation's parameters.
///
/// `serde_json` keeps object keys sorted, so structurally equal values
/// always produce the same fingerprint regardless of construction order.
/// `Value::Null` is the "no parameters" case and maps to the digest of
/// the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a parameter value.
    pub fn of(params: &Value) -> Self {
        let canonical = match params {
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let digest = Sha256::digest(canonical.as_bytes());
        Fingerprint(hex::encode(digest))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
