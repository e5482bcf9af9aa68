//! LMDB-backed cache store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep raw query payloads in
//! a memory-mapped file that survives process restarts.
//!
//! # Entry Format
//!
//! Each value is `[cached_at: 8 bytes LE millis][json payload]`. With a TTL
//! configured, entries older than the TTL read as misses and are counted as
//! evictions; they are overwritten by the next put for the same key.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions, puts and
//! invalidation use write transactions, and statistics sit behind a lock.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use quarry_core::{hash_query_key, Cache, CacheError, CachedPayload, QuarryError, QuarryResult};

use crate::stats::CacheStats;

/// Map size used when none is configured.
pub const DEFAULT_MAP_SIZE_MB: usize = 64;

const TIMESTAMP_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for QuarryError {
    fn from(e: LmdbCacheError) -> Self {
        let reason = e.to_string();
        let cache_error = match e {
            LmdbCacheError::EnvOpen(_) | LmdbCacheError::DbOpen(_) | LmdbCacheError::Io(_) => {
                CacheError::SetupFailed { reason }
            }
            LmdbCacheError::Transaction(_) => CacheError::Backend { reason },
            LmdbCacheError::Serialization(_) => CacheError::Serialization { reason },
            LmdbCacheError::Deserialization(_) => CacheError::Deserialization { reason },
        };
        QuarryError::Cache(cache_error)
    }
}

/// Open environment and its single unnamed database.
struct Store {
    env: Env,
    db: Database<Bytes, Bytes>,
}

/// LMDB-backed cache.
///
/// Nothing touches the disk until [`Cache::setup`] opens the environment;
/// before that the cache is not ready and every operation fails.
///
/// ```no_run
/// use quarry_cache::LmdbCache;
/// use quarry_core::Cache;
/// use std::time::Duration;
///
/// let mut cache = LmdbCache::new("/var/cache/quarry").with_ttl(Duration::from_secs(300));
/// cache.setup()?;
/// assert!(cache.is_ready());
/// # Ok::<(), quarry_core::QuarryError>(())
/// ```
pub struct LmdbCache {
    path: PathBuf,
    map_size_mb: usize,
    ttl: Option<Duration>,
    store: Option<Store>,
    stats: RwLock<CacheStats>,
}

impl LmdbCache {
    /// Create a cache that will live in `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            map_size_mb: DEFAULT_MAP_SIZE_MB,
            ttl: None,
            store: None,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Set the maximum size of the database in megabytes.
    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    /// Expire entries older than `ttl`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Store `payload` under `key` as if it had been cached at `cached_at`.
    pub fn put_at<P: CachedPayload>(
        &self,
        key: &str,
        payload: &P,
        cached_at: DateTime<Utc>,
    ) -> QuarryResult<bool> {
        let store = self.store()?;

        let value_bytes = serde_json::to_vec(payload)
            .map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
        let full_bytes = encode_entry(cached_at, &value_bytes);

        let mut wtxn = store
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let previous_len = store
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            .map(|bytes| bytes.len());

        store
            .db
            .put(&mut wtxn, key.as_bytes(), &full_bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.stats.write() {
            let size = full_bytes.len() as u64;
            match previous_len {
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

    /// Remove every entry. Returns how many were removed.
    pub fn invalidate_all(&self) -> QuarryResult<u64> {
        let store = self.store()?;

        let mut wtxn = store
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let deleted = store
            .db
            .len(&wtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        store
            .db
            .clear(&mut wtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = 0;
            stats.memory_bytes = 0;
            stats.evictions += deleted;
        }

        tracing::info!(deleted, path = %self.path.display(), "LMDB cache invalidated");
        Ok(deleted)
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn store(&self) -> QuarryResult<&Store> {
        self.store
            .as_ref()
            .ok_or_else(|| QuarryError::from(CacheError::NotReady))
    }

    fn is_expired(&self, cached_at: DateTime<Utc>) -> bool {
        match self.ttl {
            // Timestamps in the future never expire.
            Some(ttl) => Utc::now()
                .signed_duration_since(cached_at)
                .to_std()
                .map(|age| age > ttl)
                .unwrap_or(false),
            None => false,
        }
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self, expired: bool) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
            if expired {
                stats.evictions += 1;
            }
        }
    }
}

impl Cache for LmdbCache {
    type Key = String;

    fn generate_key(formatted_query: &str) -> Self::Key {
        hash_query_key(formatted_query)
    }

    fn setup(&mut self) -> QuarryResult<()> {
        if self.store.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.path).map_err(LmdbCacheError::from)?;

        // The environment is opened once per path by this cache only.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(self.map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(&self.path)
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        let mut existing = 0u64;
        let mut existing_bytes = 0u64;
        for entry in db
            .iter(&wtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
        {
            let (_, value) = entry.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            existing += 1;
            existing_bytes += value.len() as u64;
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = existing;
            stats.memory_bytes = existing_bytes;
        }

        tracing::info!(
            path = %self.path.display(),
            map_size_mb = self.map_size_mb,
            entries = existing,
            bytes = existing_bytes,
            "LMDB cache opened"
        );
        self.store = Some(Store { env, db });
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.store.is_some()
    }

    fn execute_get<P: CachedPayload>(&self, key: &Self::Key) -> QuarryResult<Option<P>> {
        let store = self.store()?;

        let rtxn = store
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let bytes = match store.db.get(&rtxn, key.as_bytes()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.record_miss(false);
                return Ok(None);
            }
            Err(e) => {
                self.record_miss(false);
                return Err(LmdbCacheError::Transaction(e.to_string()).into());
            }
        };

        let Some((cached_at, json)) = decode_entry(bytes) else {
            self.record_miss(false);
            return Ok(None);
        };

        if self.is_expired(cached_at) {
            tracing::debug!(key = %key, cached_at = %cached_at, "LMDB cache entry expired");
            self.record_miss(true);
            return Ok(None);
        }

        let payload: P = serde_json::from_slice(json)
            .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
        self.record_hit();
        Ok(Some(payload))
    }

    fn execute_put<P: CachedPayload>(&self, key: &Self::Key, payload: &P) -> QuarryResult<bool> {
        self.put_at(key, payload, Utc::now())
    }
}

impl fmt::Debug for LmdbCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmdbCache")
            .field("path", &self.path)
            .field("map_size_mb", &self.map_size_mb)
            .field("ttl", &self.ttl)
            .field("ready", &self.is_ready())
            .finish()
    }
}

fn encode_entry(cached_at: DateTime<Utc>, json: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(TIMESTAMP_LEN + json.len());
    bytes.extend_from_slice(&cached_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(json);
    bytes
}

/// Split an entry into its timestamp and payload. Truncated entries yield `None`.
fn decode_entry(bytes: &[u8]) -> Option<(DateTime<Utc>, &[u8])> {
    if bytes.len() < TIMESTAMP_LEN {
        return None;
    }
    let (timestamp, json) = bytes.split_at(TIMESTAMP_LEN);
    let millis = i64::from_le_bytes(timestamp.try_into().ok()?);
    let cached_at = DateTime::from_timestamp_millis(millis)?;
    Some((cached_at, json))
}
