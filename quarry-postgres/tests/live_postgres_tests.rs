//! Tests against a running PostgreSQL server.
//!
//! Skipped unless `QUARRY_PG_LIVE_TESTS=1`. Connection settings come from the
//! `QUARRY_PG_*` variables.

use quarry_core::{
    DataSource, ExtraOptions, QueryConfig, QueryError, QueryParams, QuarryError, COMMIT_TIME,
    EXECUTE_TIME,
};
use quarry_postgres::{PostgresAdapter, PostgresDataSource};
use quarry_test_utils::ScriptedCache;
use serde_json::json;
use std::time::Duration;

fn live_tests_enabled() -> bool {
    if std::env::var("QUARRY_PG_LIVE_TESTS").as_deref() != Ok("1") {
        eprintln!("Skipping live PostgreSQL test (set QUARRY_PG_LIVE_TESTS=1 to enable)");
        return false;
    }
    true
}

fn connect() -> PostgresDataSource<ScriptedCache> {
    let mut source = DataSource::with_cache(
        PostgresAdapter::new(),
        PostgresAdapter::config_from_env(),
        ScriptedCache::new(),
    )
    .unwrap();
    source.setup().unwrap();
    source
}

#[test]
fn test_live_select_types() {
    if !live_tests_enabled() {
        return;
    }
    let mut source = connect();
    assert!(source.is_ready());

    let response = source
        .query(
            "SELECT 1::int4 AS i, 2.5::float8 AS f, 12.340::numeric(6,3) AS d, 'x'::text AS s, \
             TRUE AS b, '2024-02-29'::date AS day, '{\"k\": 1}'::jsonb AS j, NULL::text AS n",
            None,
        )
        .unwrap();

    let row = &response.rows()[0];
    assert_eq!(row["i"], json!(1));
    assert_eq!(row["f"], json!(2.5));
    assert_eq!(row["d"], json!("12.340"));
    assert_eq!(row["s"], json!("x"));
    assert_eq!(row["b"], json!(true));
    assert_eq!(row["day"], json!("2024-02-29"));
    assert_eq!(row["j"], json!({"k": 1}));
    assert_eq!(row["n"], serde_json::Value::Null);
    assert_eq!(response.fields().get("d").unwrap().field_type, "decimal");

    let response = source
        .query(
            "SELECT 'q'::\"char\" AS c, ARRAY[1.5, NULL]::float8[] AS fs, \
             ARRAY[TRUE, FALSE] AS bs, ARRAY[1.10]::numeric[] AS ds",
            None,
        )
        .unwrap();
    let row = &response.rows()[0];
    assert_eq!(row["c"], json!("q"));
    assert_eq!(row["fs"], json!([1.5, null]));
    assert_eq!(row["bs"], json!([true, false]));
    assert_eq!(row["ds"], json!(["1.10"]));
    assert!(response.profiling().contains_key(EXECUTE_TIME));
}

#[test]
fn test_live_repeat_read_is_cached() {
    if !live_tests_enabled() {
        return;
    }
    let mut source = connect();
    let first = source.query("SELECT now() AS t", None).unwrap();
    let second = source.query("SELECT now() AS t", None).unwrap();
    assert_eq!(first, second);
    assert_eq!(source.cache().len(), 1);
}

#[test]
fn test_live_write_path_commits() {
    if !live_tests_enabled() {
        return;
    }
    let mut source = connect();
    let none = QueryParams::new();
    let opts = ExtraOptions::new();

    source
        .execute(
            "CREATE TEMPORARY TABLE quarry_live (id int4)",
            &none,
            None,
            &opts,
        )
        .unwrap();
    let inserted = source
        .execute(
            "INSERT INTO quarry_live VALUES (:id)",
            &QueryParams::from([("id".to_string(), json!(7))]),
            None,
            &opts,
        )
        .unwrap()
        .unwrap();
    assert!(inserted.profiling().contains_key(COMMIT_TIME));

    let config = QueryConfig::new().with_cache(false).with_fetch_size(1);
    let response = source
        .query("SELECT id FROM quarry_live", Some(&config))
        .unwrap();
    assert_eq!(response.rows()[0]["id"], json!(7));
}

#[test]
fn test_live_engine_errors() {
    if !live_tests_enabled() {
        return;
    }
    let mut source = connect();
    let err = source
        .query("SELECT * FROM quarry_table_that_does_not_exist", None)
        .unwrap_err();
    assert!(matches!(
        err,
        QuarryError::Query(QueryError::CannotBeExecuted { .. })
    ));

    let err = source
        .query("SELECT 1 AS id, interval '1 day' AS span", None)
        .unwrap_err();
    assert_eq!(
        err,
        QuarryError::from(QueryError::CannotBeExecuted {
            reason: "column span has type interval, which cannot be decoded".to_string(),
        })
    );

    let config = QueryConfig::new()
        .with_cache(false)
        .with_statement_timeout(Duration::from_millis(50));
    let err = source.query("SELECT pg_sleep(1)", Some(&config)).unwrap_err();
    assert!(matches!(
        err,
        QuarryError::Query(QueryError::CannotBeExecuted { .. })
    ));
}
