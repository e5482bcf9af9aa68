//! Cache contract and the default no-op cache.
//!
//! A cache stores raw adapter payloads, before they are normalized into a
//! [`QueryResponse`](crate::QueryResponse), under a key derived from the
//! formatted query. Eviction and expiry belong to the concrete store.

use crate::error::QuarryResult;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::hash::Hash;

/// Marker for raw payloads that can be stored in a cache.
///
/// Payloads must round-trip through serde so that a payload read back from
/// any store parses exactly like a freshly executed one.
pub trait CachedPayload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CachedPayload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Pluggable key/value store for raw query payloads.
///
/// # Contract
///
/// - `generate_key` is pure: identical formatted queries yield identical keys
///   and the result never depends on instance state.
/// - `execute_get` reports a clean miss as `Ok(None)`; errors are reserved
///   for a failing backend.
/// - `execute_put` stores or overwrites and reports whether the payload was
///   kept.
///
/// Implementations are not required to synchronize concurrent misses: two
/// callers missing on the same key may both execute and both put, and the
/// last put wins.
pub trait Cache {
    /// Key addressing one cached payload.
    type Key: Clone + Eq + Hash + Debug;

    /// Derive the key for a formatted query.
    fn generate_key(formatted_query: &str) -> Self::Key;

    /// One-time initialization (connections, allocation, files).
    fn setup(&mut self) -> QuarryResult<()>;

    /// Whether the cache can serve requests.
    fn is_ready(&self) -> bool;

    /// Fetch the payload stored under `key`, if any.
    fn execute_get<P: CachedPayload>(&self, key: &Self::Key) -> QuarryResult<Option<P>>;

    /// Store `payload` under `key`.
    fn execute_put<P: CachedPayload>(&self, key: &Self::Key, payload: &P) -> QuarryResult<bool>;
}

/// SHA-256 hex digest of a formatted query.
pub fn hash_query_key(formatted_query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(formatted_query.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache that never stores anything.
///
/// Used when a data source is built without a cache: every read misses and
/// goes to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullCache;

impl Cache for NullCache {
    type Key = String;

    fn generate_key(formatted_query: &str) -> Self::Key {
        hash_query_key(formatted_query)
    }

    fn setup(&mut self) -> QuarryResult<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn execute_get<P: CachedPayload>(&self, _key: &Self::Key) -> QuarryResult<Option<P>> {
        Ok(None)
    }

    fn execute_put<P: CachedPayload>(&self, _key: &Self::Key, _payload: &P) -> QuarryResult<bool> {
        Ok(false)
    }
}

// =============================================================================
// TESTS
// =============================================================================
