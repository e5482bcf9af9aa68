//! Quarry Core - Query Pipeline
//!
//! A uniform `query()` surface over pluggable engine adapters, with
//! transparent caching of read-only statements.
//!
//! - [`Adapter`] executes statements against one engine and normalizes raw
//!   payloads into a [`QueryResponse`].
//! - [`Cache`] stores raw payloads under a key derived from the formatted
//!   statement.
//! - [`DataSource`] orchestrates both, refusing writes on the cached path.
//!
//! Only types implementing [`Cache`] can back a data source:
//!
//! ```compile_fail
//! use quarry_core::{DataSource, UnimplementedAdapter};
//!
//! struct NotACache;
//!
//! let _ = DataSource::with_cache(UnimplementedAdapter, serde_json::json!({}), NotACache);
//! ```

pub mod adapter;
pub mod cache;
pub mod classify;
pub mod config;
pub mod datasource;
pub mod error;
pub mod response;
pub mod statement;

pub use adapter::{Adapter, ExtraOptions, UnimplementedAdapter};
pub use cache::{hash_query_key, Cache, CachedPayload, NullCache};
pub use classify::{is_write_query, KeywordClassifier, WriteClassifier};
pub use config::{ConfigWarning, DataSourceConfig, QueryConfig};
pub use datasource::DataSource;
pub use error::{
    CacheError, ConfigError, QueryError, QuarryError, QuarryResult, TypeError, ValidationError,
};
pub use response::{
    timed, FieldDescriptor, Fields, Profiling, QueryResponse, Row, COMMIT_TIME,
    DEFAULT_PREVIEW_ROWS, EXECUTE_TIME,
};
pub use statement::{render_named, sql_literal, QueryParams, Scanner, Segment, SegmentKind};
