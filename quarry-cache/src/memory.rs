//! Process-local cache store.

use std::collections::HashMap;
use std::sync::RwLock;

use quarry_core::{hash_query_key, Cache, CacheError, CachedPayload, QuarryResult};

use crate::stats::CacheStats;

/// In-memory cache holding JSON-encoded payloads.
///
/// With `max_entries` set, a put of a new key into a full cache is refused
/// and reported as not stored. Overwrites are always accepted.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    max_entries: Option<usize>,
    stats: RwLock<CacheStats>,
}

impl MemoryCache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache holding at most `max_entries` payloads.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::default()
        }
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    /// Number of stored payloads.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = match self.entries.write() {
            Ok(mut entries) => {
                let removed = entries.len();
                entries.clear();
                removed
            }
            Err(_) => 0,
        };
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = 0;
            stats.memory_bytes = 0;
            stats.evictions += removed as u64;
        }
        removed
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }
}

impl Cache for MemoryCache {
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

    fn execute_get<P: CachedPayload>(&self, key: &Self::Key) -> QuarryResult<Option<P>> {
        let entries = self.entries.read().map_err(|e| CacheError::Backend {
            reason: e.to_string(),
        })?;

        match entries.get(key) {
            Some(bytes) => {
                let payload = serde_json::from_slice(bytes).map_err(|e| {
                    CacheError::Deserialization {
                        reason: e.to_string(),
                    }
                })?;
                self.record(true);
                Ok(Some(payload))
            }
            None => {
                self.record(false);
                Ok(None)
            }
        }
    }

    fn execute_put<P: CachedPayload>(&self, key: &Self::Key, payload: &P) -> QuarryResult<bool> {
        let bytes = serde_json::to_vec(payload).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

        let mut entries = self.entries.write().map_err(|e| CacheError::Backend {
            reason: e.to_string(),
        })?;

        let previous_size = entries.get(key).map(|existing| existing.len());
        if previous_size.is_none() {
            if let Some(max) = self.max_entries {
                if entries.len() >= max {
                    tracing::debug!(max_entries = max, "Memory cache full, payload not stored");
                    return Ok(false);
                }
            }
        }

        let size = bytes.len() as u64;
        entries.insert(key.clone(), bytes);

        if let Ok(mut stats) = self.stats.write() {
            match previous_size {
                Some(old) => {
                    stats.memory_bytes = stats.memory_bytes.saturating_sub(old as u64) + size;
                }
                None => {
                    stats.entry_count += 1;
                    stats.memory_bytes += size;
                }
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    #[test]
    fn test_put_and_get() {
        let cache = MemoryCache::new();
        let key = MemoryCache::generate_key("SELECT 1");

        assert_eq!(cache.execute_get::<Value>(&key).unwrap(), None);
        assert!(cache.execute_put(&key, &json!({"rows": [[1]]})).unwrap());
        assert_eq!(
            cache.execute_get::<Value>(&key).unwrap(),
            Some(json!({"rows": [[1]]}))
        );

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_overwrite_keeps_one_entry() {
        let cache = MemoryCache::new();
        let key = MemoryCache::generate_key("SELECT 1");
        cache.execute_put(&key, &json!("first")).unwrap();
        cache.execute_put(&key, &json!("second")).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().entry_count, 1);
        assert_eq!(cache.stats().memory_bytes, "\"second\"".len() as u64);
        assert_eq!(
            cache.execute_get::<Value>(&key).unwrap(),
            Some(json!("second"))
        );
    }

    #[test]
    fn test_bounded_cache_refuses_new_keys() {
        let cache = MemoryCache::with_max_entries(1);
        let a = MemoryCache::generate_key("SELECT 'a'");
        let b = MemoryCache::generate_key("SELECT 'b'");

        assert!(cache.execute_put(&a, &1).unwrap());
        assert!(!cache.execute_put(&b, &2).unwrap());
        assert!(cache.execute_put(&a, &3).unwrap());
        assert_eq!(cache.execute_get::<i32>(&a).unwrap(), Some(3));
        assert_eq!(cache.execute_get::<i32>(&b).unwrap(), None);
    }

    #[test]
    fn test_wrong_payload_type_is_an_error() {
        let cache = MemoryCache::new();
        let key = MemoryCache::generate_key("SELECT 1");
        cache.execute_put(&key, &"text".to_string()).unwrap();
        let err = cache.execute_get::<Vec<i64>>(&key).unwrap_err();
        assert!(matches!(
            err,
            quarry_core::QuarryError::Cache(CacheError::Deserialization { .. })
        ));
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 0);

        assert_eq!(cache.execute_get::<String>(&key).unwrap(), Some("text".to_string()));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_clear() {
        let cache = MemoryCache::new();
        for i in 0..3 {
            let key = MemoryCache::generate_key(&format!("SELECT {}", i));
            cache.execute_put(&key, &i).unwrap();
        }
        assert_eq!(cache.clear(), 3);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 3);
        assert_eq!(cache.stats().entry_count, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_last_put_wins(values in proptest::collection::vec(any::<i64>(), 1..10)) {
            let cache = MemoryCache::new();
            let key = MemoryCache::generate_key("SELECT n FROM t");
            for value in &values {
                prop_assert!(cache.execute_put(&key, value).unwrap());
            }
            prop_assert_eq!(cache.execute_get::<i64>(&key).unwrap(), values.last().copied());
        }

        #[test]
        fn prop_bounded_len(max in 1usize..8, keys in proptest::collection::vec("[a-z]{1,6}", 0..20)) {
            let cache = MemoryCache::with_max_entries(max);
            for key in &keys {
                cache.execute_put(&MemoryCache::generate_key(key), &0).unwrap();
            }
            prop_assert!(cache.len() <= max);
        }
    }
}
