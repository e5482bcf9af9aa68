//! Quarry Test Utilities
//!
//! Shared test infrastructure for the quarry workspace:
//! - Scripted fakes for the adapter and cache contracts
//! - Proptest generators for configs and statements
//! - Fixtures for common result sets
//! - Assertions for quarry error variants

pub use quarry_core::{
    Adapter, Cache, CacheError, DataSource, DataSourceConfig, ExtraOptions, Fields, Profiling,
    QueryConfig, QueryError, QueryParams, QueryResponse, QuarryError, QuarryResult, TypeError,
    COMMIT_TIME, EXECUTE_TIME,
};

use quarry_core::{hash_query_key, CachedPayload};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

// ============================================================================
// PAYLOAD
// ============================================================================

/// Positional table payload, shaped like what a SQL driver hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePayload {
    /// `(name, type)` pairs in column order.
    pub fields: Vec<(String, String)>,
    pub rows: Vec<Vec<Value>>,
    pub profiling: Profiling,
}

impl TablePayload {
    pub fn new(fields: Vec<(&str, &str)>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, ty)| (name.to_string(), ty.to_string()))
                .collect(),
            rows,
            profiling: Profiling::from([(EXECUTE_TIME.to_string(), 0.001)]),
        }
    }

    /// Normalize into a response.
    pub fn to_response(&self) -> QuarryResult<QueryResponse> {
        QueryResponse::from_positional(
            self.rows.clone(),
            self.fields.iter().cloned().collect(),
            self.profiling.clone(),
        )
    }
}

// ============================================================================
// RECORDING ADAPTER
// ============================================================================

/// One recorded `execute_query` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedQuery {
    pub statement: String,
    pub params: QueryParams,
    pub needs_commit: bool,
    pub query_config: QueryConfig,
    pub opts: ExtraOptions,
}

/// Adapter that returns a fixed payload and records every call.
///
/// Recognizes `host` and `port`.
#[derive(Debug)]
pub struct RecordingAdapter {
    payload: TablePayload,
    failure: Option<QuarryError>,
    ready: bool,
    executed: Vec<ExecutedQuery>,
    parsed: Mutex<Vec<Option<TablePayload>>>,
    setups: usize,
    closes: usize,
}

impl RecordingAdapter {
    pub fn new(payload: TablePayload) -> Self {
        Self {
            payload,
            failure: None,
            ready: true,
            executed: Vec::new(),
            parsed: Mutex::new(Vec::new()),
            setups: 0,
            closes: 0,
        }
    }

    /// Make every execution fail with `error`.
    pub fn with_failure(mut self, error: QuarryError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn executed(&self) -> &[ExecutedQuery] {
        &self.executed
    }

    pub fn execute_count(&self) -> usize {
        self.executed.len()
    }

    /// Payloads handed to `parse_response`, in call order.
    pub fn parsed(&self) -> Vec<Option<TablePayload>> {
        self.parsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn parse_count(&self) -> usize {
        self.parsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn setup_count(&self) -> usize {
        self.setups
    }

    pub fn close_count(&self) -> usize {
        self.closes
    }
}

impl Adapter for RecordingAdapter {
    type Payload = TablePayload;

    fn default_config(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("host".to_string(), json!("localhost"));
        defaults.insert("port".to_string(), json!(5432));
        defaults
    }

    fn setup(&mut self, _config: &DataSourceConfig) -> QuarryResult<()> {
        self.setups += 1;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn execute_query(
        &mut self,
        formatted_statement: &str,
        params: &QueryParams,
        needs_commit: bool,
        query_config: &QueryConfig,
        opts: &ExtraOptions,
    ) -> QuarryResult<TablePayload> {
        self.executed.push(ExecutedQuery {
            statement: formatted_statement.to_string(),
            params: params.clone(),
            needs_commit,
            query_config: query_config.clone(),
            opts: opts.clone(),
        });
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(self.payload.clone()),
        }
    }

    fn parse_response(
        &self,
        payload: Option<TablePayload>,
    ) -> QuarryResult<Option<QueryResponse>> {
        self.parsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.clone());
        payload.map(|payload| payload.to_response()).transpose()
    }

    fn close(&mut self) -> QuarryResult<()> {
        self.closes += 1;
        Ok(())
    }
}

// ============================================================================
// SCRIPTED CACHE
// ============================================================================

/// In-memory cache that can be preloaded and records every key it sees.
#[derive(Debug)]
pub struct ScriptedCache {
    entries: RwLock<HashMap<String, String>>,
    gets: Mutex<Vec<String>>,
    puts: Mutex<Vec<String>>,
    ready: bool,
    accept_puts: bool,
    setups: usize,
}

impl Default for ScriptedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            gets: Mutex::new(Vec::new()),
            puts: Mutex::new(Vec::new()),
            ready: true,
            accept_puts: true,
            setups: 0,
        }
    }

    /// Preload `payload` under the key of `formatted_query`.
    pub fn with_entry<P: CachedPayload>(self, formatted_query: &str, payload: &P) -> Self {
        let encoded = serde_json::to_string(payload).unwrap_or_default();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash_query_key(formatted_query), encoded);
        self
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Make every put report that nothing was stored.
    pub fn rejecting_puts(mut self) -> Self {
        self.accept_puts = false;
        self
    }

    /// Keys passed to `execute_get`, in call order.
    pub fn get_keys(&self) -> Vec<String> {
        self.gets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Keys passed to `execute_put`, in call order.
    pub fn put_keys(&self) -> Vec<String> {
        self.puts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decode whatever is stored for `formatted_query`.
    pub fn stored<P: CachedPayload>(&self, formatted_query: &str) -> Option<P> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&hash_query_key(formatted_query))
            .and_then(|encoded| serde_json::from_str(encoded).ok())
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn setup_count(&self) -> usize {
        self.setups
    }

    /// True when neither get nor put was ever called.
    pub fn untouched(&self) -> bool {
        self.get_keys().is_empty() && self.put_keys().is_empty()
    }
}

impl Cache for ScriptedCache {
    type Key = String;

    fn generate_key(formatted_query: &str) -> String {
        hash_query_key(formatted_query)
    }

    fn setup(&mut self) -> QuarryResult<()> {
        self.setups += 1;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn execute_get<P: CachedPayload>(&self, key: &String) -> QuarryResult<Option<P>> {
        self.gets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.clone());

        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            None => Ok(None),
            Some(encoded) => serde_json::from_str(encoded).map(Some).map_err(|e| {
                CacheError::Deserialization {
                    reason: e.to_string(),
                }
                .into()
            }),
        }
    }

    fn execute_put<P: CachedPayload>(&self, key: &String, payload: &P) -> QuarryResult<bool> {
        self.puts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.clone());

        if !self.accept_puts {
            return Ok(false);
        }
        let encoded = serde_json::to_string(payload).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), encoded);
        Ok(true)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest generators for quarry types.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Generate an arbitrary QueryConfig.
    pub fn arb_query_config() -> impl Strategy<Value = QueryConfig> {
        (
            any::<bool>(),
            0u32..10,
            proptest::option::of(1u32..10_000),
            proptest::option::of(0u64..600_000),
            proptest::collection::btree_map("[a-z_]{1,12}", any::<i64>(), 0..4),
        )
            .prop_map(|(enable_cache, retries, fetch_size, timeout_ms, custom)| QueryConfig {
                enable_cache,
                retries,
                fetch_size,
                statement_timeout: timeout_ms.map(Duration::from_millis),
                custom: custom
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<BTreeMap<_, _>>(),
            })
    }

    /// Generate a read statement.
    pub fn arb_read_statement() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["SELECT", "select", "  SELECT", "-- note\nSELECT"]),
            "[a-z]{1,10}",
            "[a-z]{1,10}",
        )
            .prop_filter("identifiers must not be INTO", |(_, column, table)| {
                column != "into" && table != "into"
            })
            .prop_map(|(select, column, table)| format!("{} {} FROM {}", select, column, table))
    }

    /// Generate a write statement.
    pub fn arb_write_statement() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec![
                "INSERT INTO",
                "insert into",
                "DELETE FROM",
                "UPDATE",
                "DROP TABLE",
                "TRUNCATE",
                "CREATE TABLE",
            ]),
            "[a-z]{1,10}",
        )
            .prop_map(|(verb, table)| format!("{} {}", verb, table))
    }

    /// Generate a JSON scalar.
    pub fn arb_json_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ']{0,16}".prop_map(Value::from),
        ]
    }

    /// Generate a configuration mapping with keys the recording adapter
    /// does not recognize.
    pub fn arb_unrecognized_config() -> impl Strategy<Value = Map<String, Value>> {
        proptest::collection::btree_map("x[a-z]{1,8}", arb_json_scalar(), 0..6)
            .prop_map(|entries| entries.into_iter().collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built payloads and responses.

    use super::*;

    /// Two string columns `As` and `Bs` holding `A{i}` and `B{i}`.
    pub fn letters_payload(rows: usize) -> TablePayload {
        TablePayload::new(
            vec![("As", "string"), ("Bs", "string")],
            (0..rows)
                .map(|i| vec![json!(format!("A{}", i)), json!(format!("B{}", i))])
                .collect(),
        )
    }

    /// Response built from [`letters_payload`].
    pub fn letters_response(rows: usize) -> QueryResponse {
        letters_payload(rows)
            .to_response()
            .unwrap_or_else(|e| panic!("letters fixture is well-formed: {}", e))
    }

    /// A small mixed-type table.
    pub fn people_payload() -> TablePayload {
        TablePayload::new(
            vec![("id", "integer"), ("name", "string"), ("active", "boolean")],
            vec![
                vec![json!(1), json!("Ada"), json!(true)],
                vec![json!(2), json!("Grace"), json!(false)],
                vec![json!(3), Value::Null, json!(true)],
            ],
        )
    }

    /// A recording adapter returning [`people_payload`].
    pub fn people_adapter() -> RecordingAdapter {
        RecordingAdapter::new(people_payload())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for quarry error variants.

    use super::*;

    /// Assert that a result is a WrongQuery error.
    #[track_caller]
    pub fn assert_wrong_query<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Query(QueryError::WrongQuery { .. })) => {}
            other => panic!("Expected WrongQuery error, got: {:?}", other),
        }
    }

    /// Assert that a result is a NotImplemented error.
    #[track_caller]
    pub fn assert_not_implemented<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::NotImplemented { .. }) => {}
            other => panic!("Expected NotImplemented error, got: {:?}", other),
        }
    }

    /// Assert that a result is a ConfigNotAMapping type error.
    #[track_caller]
    pub fn assert_not_a_mapping<T: std::fmt::Debug>(result: &QuarryResult<T>) {
        match result {
            Err(QuarryError::Type(TypeError::ConfigNotAMapping { .. })) => {}
            other => panic!("Expected ConfigNotAMapping error, got: {:?}", other),
        }
    }
}
