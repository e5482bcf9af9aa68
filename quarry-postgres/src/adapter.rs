//! PostgreSQL adapter.

use postgres::{Client, NoTls, Transaction};
use quarry_core::{
    timed, Adapter, DataSource, DataSourceConfig, ExtraOptions, Fields, NullCache, Profiling,
    QueryConfig, QueryError, QueryParams, QueryResponse, QuarryResult, Row, COMMIT_TIME,
    EXECUTE_TIME,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::PgConfig;
use crate::types::{cell_to_json, check_decodable, semantic_type};

/// A data source answering from PostgreSQL.
pub type PostgresDataSource<C = NullCache> = DataSource<PostgresAdapter, C>;

/// One result column as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgField {
    pub name: String,
    /// PostgreSQL type name, e.g. `int4`.
    pub type_name: String,
}

/// Raw result of one statement, as stored in caches.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PgPayload {
    pub fields: Vec<PgField>,
    pub rows: Vec<Vec<Value>>,
    pub profiling: Profiling,
}

/// Step of an attempt at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Execute,
    Commit,
}

/// Why a single execution attempt failed.
#[derive(Debug, PartialEq, Eq)]
enum AttemptError {
    /// The connection is gone before anything was committed. Worth reconnecting.
    Closed(String),
    /// The server rejected or failed the statement.
    Engine(String),
}

impl AttemptError {
    /// A connection lost during commit leaves the outcome unknown and is
    /// never retried.
    fn classify(stage: Stage, connection_closed: bool, reason: String) -> Self {
        match (stage, connection_closed) {
            (Stage::Execute, true) => AttemptError::Closed(reason),
            (Stage::Commit, true) => AttemptError::Engine(format!(
                "connection lost during commit, outcome unknown: {}",
                reason
            )),
            (_, false) => AttemptError::Engine(reason),
        }
    }
}

impl From<postgres::Error> for AttemptError {
    fn from(e: postgres::Error) -> Self {
        AttemptError::classify(Stage::Execute, e.is_closed(), e.to_string())
    }
}

/// Adapter over a synchronous `postgres` client.
///
/// Each execution runs in its own transaction, which is committed only when
/// the data source reports the statement needs it.
pub struct PostgresAdapter {
    config: PgConfig,
    client: Option<Client>,
}

impl Default for PostgresAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgresAdapter {
    pub fn new() -> Self {
        Self {
            config: PgConfig::default(),
            client: None,
        }
    }

    /// Data source configuration read from `QUARRY_PG_*` variables.
    pub fn config_from_env() -> Value {
        Value::Object(PgConfig::from_env().to_map())
    }

    /// Settings in effect since the last setup.
    pub fn pg_config(&self) -> &PgConfig {
        &self.config
    }

    fn connect(&mut self) -> QuarryResult<()> {
        let client = self
            .config
            .to_client_config()
            .connect(NoTls)
            .map_err(|e| self.config.connect_error(&e))?;
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            db = %self.config.db,
            "Connected to PostgreSQL"
        );
        self.client = Some(client);
        Ok(())
    }

    fn attempt(
        &mut self,
        statement: &str,
        needs_commit: bool,
        query_config: &QueryConfig,
    ) -> Result<PgPayload, AttemptError> {
        let client = match self.client.as_mut() {
            Some(client) if !client.is_closed() => client,
            _ => return Err(AttemptError::Closed("connection is not open".to_string())),
        };

        let mut transaction = client.transaction()?;
        if let Some(timeout) = query_config.statement_timeout {
            transaction.batch_execute(&format!(
                "SET LOCAL statement_timeout = {}",
                timeout.as_millis()
            ))?;
        }

        let ((fields, rows), execute_time) = timed(|| {
            fetch(&mut transaction, statement, query_config.fetch_size)
        })?;

        let mut profiling = Profiling::new();
        profiling.insert(EXECUTE_TIME.to_string(), execute_time);

        if needs_commit {
            let ((), commit_time) = timed(move || transaction.commit()).map_err(|e| {
                AttemptError::classify(Stage::Commit, e.is_closed(), e.to_string())
            })?;
            profiling.insert(COMMIT_TIME.to_string(), commit_time);
        }

        Ok(PgPayload {
            fields,
            rows,
            profiling,
        })
    }
}

/// Run `statement` and collect its columns and rows, in batches of
/// `fetch_size` rows when set.
///
/// Statements producing a column that cannot be decoded fail before running.
fn fetch(
    transaction: &mut Transaction<'_>,
    statement: &str,
    fetch_size: Option<u32>,
) -> Result<(Vec<PgField>, Vec<Vec<Value>>), AttemptError> {
    let prepared = transaction.prepare(statement)?;
    check_decodable(
        prepared
            .columns()
            .iter()
            .map(|column| (column.name(), column.type_())),
    )
    .map_err(AttemptError::Engine)?;
    let fields = prepared
        .columns()
        .iter()
        .map(|column| PgField {
            name: column.name().to_string(),
            type_name: column.type_().name().to_string(),
        })
        .collect();

    let raw_rows = match fetch_size {
        Some(size) if size > 0 => {
            let portal = transaction.bind(&prepared, &[])?;
            let batch_size = i32::try_from(size).unwrap_or(i32::MAX);
            let mut rows = Vec::new();
            loop {
                let batch = transaction.query_portal(&portal, batch_size)?;
                let done = batch.len() < batch_size as usize;
                rows.extend(batch);
                if done {
                    break;
                }
            }
            rows
        }
        _ => transaction.query(&prepared, &[])?,
    };

    let mut rows = Vec::with_capacity(raw_rows.len());
    for row in &raw_rows {
        let values = (0..row.len())
            .map(|idx| cell_to_json(row, idx))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(values);
    }

    Ok((fields, rows))
}

impl Adapter for PostgresAdapter {
    type Payload = PgPayload;

    fn default_config(&self) -> Map<String, Value> {
        PgConfig::default().to_map()
    }

    fn setup(&mut self, config: &DataSourceConfig) -> QuarryResult<()> {
        self.config = PgConfig::from_data_source(config)?;
        self.connect()
    }

    fn is_ready(&self) -> bool {
        self.client
            .as_ref()
            .map(|client| !client.is_closed())
            .unwrap_or(false)
    }

    fn execute_query(
        &mut self,
        formatted_statement: &str,
        _params: &QueryParams,
        needs_commit: bool,
        query_config: &QueryConfig,
        _opts: &ExtraOptions,
    ) -> QuarryResult<PgPayload> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(formatted_statement, needs_commit, query_config) {
                Ok(payload) => return Ok(payload),
                Err(AttemptError::Engine(reason)) => {
                    return Err(QueryError::CannotBeExecuted { reason }.into());
                }
                Err(AttemptError::Closed(reason)) => {
                    if attempts > query_config.retries {
                        return Err(QueryError::RetriesExceeded {
                            attempts,
                            last_error: reason,
                        }
                        .into());
                    }
                    tracing::warn!(attempt = attempts, error = %reason, "Connection lost, reconnecting");
                    self.client = None;
                    if let Err(e) = self.connect() {
                        tracing::warn!(attempt = attempts, error = %e, "Reconnect failed");
                    }
                }
            }
        }
    }

    fn parse_response(&self, payload: Option<PgPayload>) -> QuarryResult<Option<QueryResponse>> {
        let Some(payload) = payload else {
            return Ok(None);
        };

        let fields: Fields = payload
            .fields
            .iter()
            .map(|field| (field.name.clone(), semantic_type(&field.type_name)))
            .collect();

        // Duplicate column names collapse onto one key; the last column wins.
        let rows = payload
            .rows
            .into_iter()
            .map(|values| {
                payload
                    .fields
                    .iter()
                    .map(|field| field.name.clone())
                    .zip(values)
                    .collect::<Row>()
            })
            .collect();

        QueryResponse::new(rows, fields, payload.profiling).map(Some)
    }

    fn close(&mut self) -> QuarryResult<()> {
        if let Some(client) = self.client.take() {
            client.close().map_err(|e| QueryError::CannotBeExecuted {
                reason: format!("failed to close connection: {}", e),
            })?;
            tracing::info!(host = %self.config.host, "PostgreSQL connection closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for PostgresAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresAdapter")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("db", &self.config.db)
            .field("connected", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::QuarryError;
    use serde_json::json;

    fn payload() -> PgPayload {
        PgPayload {
            fields: vec![
                PgField {
                    name: "id".to_string(),
                    type_name: "int4".to_string(),
                },
                PgField {
                    name: "name".to_string(),
                    type_name: "text".to_string(),
                },
            ],
            rows: vec![vec![json!(1), json!("Ada")], vec![json!(2), Value::Null]],
            profiling: Profiling::from([(EXECUTE_TIME.to_string(), 0.002)]),
        }
    }

    #[test]
    fn test_parse_none_is_none() {
        let adapter = PostgresAdapter::new();
        assert_eq!(adapter.parse_response(None).unwrap(), None);
    }

    #[test]
    fn test_parse_maps_types_and_zips_rows() {
        let adapter = PostgresAdapter::new();
        let response = adapter.parse_response(Some(payload())).unwrap().unwrap();

        assert_eq!(response.fields().names().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(response.fields().get("id").unwrap().field_type, "integer");
        assert_eq!(response.fields().get("name").unwrap().field_type, "string");
        assert_eq!(response.rows()[0]["name"], json!("Ada"));
        assert_eq!(response.rows()[1]["name"], Value::Null);
        assert_eq!(response.profiling()[EXECUTE_TIME], 0.002);
    }

    #[test]
    fn test_parse_cached_payload_matches_fresh() {
        let adapter = PostgresAdapter::new();
        let encoded = serde_json::to_vec(&payload()).unwrap();
        let cached: PgPayload = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(
            adapter.parse_response(Some(cached)).unwrap(),
            adapter.parse_response(Some(payload())).unwrap()
        );
    }

    #[test]
    fn test_parse_duplicate_columns() {
        let adapter = PostgresAdapter::new();
        let payload = PgPayload {
            fields: vec![
                PgField {
                    name: "?column?".to_string(),
                    type_name: "int4".to_string(),
                },
                PgField {
                    name: "?column?".to_string(),
                    type_name: "text".to_string(),
                },
            ],
            rows: vec![vec![json!(1), json!("one")]],
            profiling: Profiling::new(),
        };
        let response = adapter.parse_response(Some(payload)).unwrap().unwrap();
        assert_eq!(response.fields().len(), 1);
        assert_eq!(response.rows()[0]["?column?"], json!("one"));
    }

    #[test]
    fn test_parse_statement_without_result_set() {
        let adapter = PostgresAdapter::new();
        let response = adapter
            .parse_response(Some(PgPayload::default()))
            .unwrap()
            .unwrap();
        assert!(response.is_empty());
        assert!(response.fields().is_empty());
    }

    #[test]
    fn test_execute_without_connection_exhausts_retries() {
        let mut adapter = PostgresAdapter::new();
        assert!(!adapter.is_ready());

        let err = adapter
            .execute_query(
                "SELECT 1",
                &QueryParams::new(),
                false,
                &QueryConfig::default(),
                &ExtraOptions::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            QuarryError::from(QueryError::RetriesExceeded {
                attempts: 1,
                last_error: "connection is not open".to_string(),
            })
        );
    }

    #[test]
    fn test_lost_connection_is_retried_only_before_commit() {
        assert_eq!(
            AttemptError::classify(Stage::Execute, true, "connection closed".to_string()),
            AttemptError::Closed("connection closed".to_string())
        );
        assert_eq!(
            AttemptError::classify(Stage::Commit, true, "connection closed".to_string()),
            AttemptError::Engine(
                "connection lost during commit, outcome unknown: connection closed".to_string()
            )
        );
        for stage in [Stage::Execute, Stage::Commit] {
            assert_eq!(
                AttemptError::classify(stage, false, "deadlock detected".to_string()),
                AttemptError::Engine("deadlock detected".to_string())
            );
        }
    }

    #[test]
    fn test_close_without_connection() {
        let mut adapter = PostgresAdapter::new();
        assert!(adapter.close().is_ok());
    }

    #[test]
    fn test_default_config_keys() {
        let keys: Vec<String> = PostgresAdapter::new().default_config().keys().cloned().collect();
        assert_eq!(keys, vec!["db", "host", "password", "port", "user"]);
    }
}
