//! Engine adapter contract
//!
//! An adapter knows how to talk to one query engine. The data source drives
//! it: formatting, then execution on a cache miss, then normalization of the
//! raw payload into a [`QueryResponse`].

use crate::cache::CachedPayload;
use crate::config::{DataSourceConfig, QueryConfig};
use crate::error::{QuarryError, QuarryResult};
use crate::response::QueryResponse;
use crate::statement::{render_named, QueryParams};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Adapter-specific options forwarded untouched to `execute_query`.
pub type ExtraOptions = BTreeMap<String, Value>;

/// Engine-specific execution and normalization.
///
/// `parse_response` must normalize a freshly executed payload and the same
/// payload read back from a cache identically: caches store payloads before
/// normalization.
pub trait Adapter {
    /// Raw engine result, as stored in the cache.
    type Payload: CachedPayload;

    /// Recognized configuration keys with their default values.
    fn default_config(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Open engine resources.
    fn setup(&mut self, _config: &DataSourceConfig) -> QuarryResult<()> {
        Ok(())
    }

    /// Whether the engine side can serve queries.
    fn is_ready(&self) -> bool {
        true
    }

    /// Render bound parameters into the statement.
    fn format_statement(&self, statement: &str, params: &QueryParams) -> QuarryResult<String> {
        render_named(statement, params)
    }

    /// Run a formatted statement against the engine.
    ///
    /// Implementations report `execute_time`, and `commit_time` when
    /// `needs_commit` is set, in the payload's profiling data.
    fn execute_query(
        &mut self,
        formatted_statement: &str,
        params: &QueryParams,
        needs_commit: bool,
        query_config: &QueryConfig,
        opts: &ExtraOptions,
    ) -> QuarryResult<Self::Payload>;

    /// Normalize a raw payload. No payload means no response.
    fn parse_response(&self, payload: Option<Self::Payload>)
        -> QuarryResult<Option<QueryResponse>>;

    /// Release engine resources. Must be safe to call more than once.
    fn close(&mut self) -> QuarryResult<()> {
        Ok(())
    }
}

/// Adapter with no engine behind it.
///
/// Every execution and normalization fails with
/// [`QuarryError::NotImplemented`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnimplementedAdapter;

impl Adapter for UnimplementedAdapter {
    type Payload = Value;

    fn execute_query(
        &mut self,
        _formatted_statement: &str,
        _params: &QueryParams,
        _needs_commit: bool,
        _query_config: &QueryConfig,
        _opts: &ExtraOptions,
    ) -> QuarryResult<Self::Payload> {
        Err(QuarryError::not_implemented("execute_query"))
    }

    fn parse_response(
        &self,
        _payload: Option<Self::Payload>,
    ) -> QuarryResult<Option<QueryResponse>> {
        Err(QuarryError::not_implemented("parse_response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unimplemented_adapter_fails() {
        let mut adapter = UnimplementedAdapter;
        let err = adapter
            .execute_query(
                "SELECT 1",
                &QueryParams::new(),
                false,
                &QueryConfig::default(),
                &ExtraOptions::new(),
            )
            .unwrap_err();
        assert!(err.is_not_implemented());

        let err = adapter.parse_response(Some(json!({}))).unwrap_err();
        assert_eq!(err, QuarryError::not_implemented("parse_response"));
    }

    #[test]
    fn test_provided_defaults() {
        let mut adapter = UnimplementedAdapter;
        assert!(adapter.default_config().is_empty());
        assert!(adapter.is_ready());
        assert!(adapter.setup(&DataSourceConfig::default()).is_ok());
        assert!(adapter.close().is_ok());

        let params = QueryParams::from([("id".to_string(), json!(3))]);
        assert_eq!(
            adapter
                .format_statement("SELECT * FROM t WHERE id = :id", &params)
                .unwrap(),
            "SELECT * FROM t WHERE id = 3"
        );
    }
}
