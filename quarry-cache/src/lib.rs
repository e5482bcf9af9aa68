//! Quarry Cache - Concrete Cache Stores
//!
//! Implementations of the [`quarry_core::Cache`] contract:
//!
//! - [`MemoryCache`]: process-local map, optionally bounded
//! - [`LmdbCache`]: memory-mapped on-disk store with optional expiry
//!
//! Both key entries by the SHA-256 digest of the formatted query and store
//! payloads as JSON.

mod lmdb;
mod memory;
mod stats;

pub use lmdb::{LmdbCache, LmdbCacheError, DEFAULT_MAP_SIZE_MB};
pub use memory::MemoryCache;
pub use stats::CacheStats;
