//! PostgreSQL data source construction without a server.

use quarry_core::{DataSource, QuarryError, TypeError};
use quarry_postgres::{PgConfig, PostgresAdapter};
use quarry_test_utils::assertions::assert_wrong_query;
use serde_json::json;

#[test]
fn test_recognized_options_and_defaults() {
    let source = DataSource::new(
        PostgresAdapter::new(),
        json!({"host": "db.internal", "db": "analytics", "sslmode": "require"}),
    )
    .unwrap();

    let warnings: Vec<String> = source.warnings().iter().map(|w| w.to_string()).collect();
    assert_eq!(warnings, vec!["sslmode is an unexpected config value".to_string()]);

    assert_eq!(source.get_config("host"), Some(&json!("db.internal")));
    assert_eq!(source.get_config("port"), Some(&json!(5432)));
    assert_eq!(source.get_config("user"), Some(&json!("postgres")));
    assert_eq!(source.get_config("schema"), None);
    assert!(!source.is_ready());
}

#[test]
fn test_non_mapping_config() {
    let err = DataSource::new(PostgresAdapter::new(), json!("host=localhost")).unwrap_err();
    assert!(matches!(
        err,
        QuarryError::Type(TypeError::ConfigNotAMapping { .. })
    ));
}

#[test]
fn test_writes_rejected_before_connecting() {
    let mut source = DataSource::new(PostgresAdapter::new(), json!({})).unwrap();
    assert_wrong_query(&source.query("DROP TABLE accounts", None));
}

#[test]
fn test_setup_failure_is_a_config_error() {
    // Port 1 on loopback refuses connections.
    let mut source = DataSource::new(
        PostgresAdapter::new(),
        json!({"host": "127.0.0.1", "port": 1}),
    )
    .unwrap();
    let err = source.setup().unwrap_err();
    assert!(matches!(err, QuarryError::Config(_)));
    assert_eq!(source.adapter().pg_config().port, 1);
}

#[test]
fn test_env_config_has_every_option() {
    let config = PostgresAdapter::config_from_env();
    let object = config.as_object().unwrap();
    for key in PgConfig::default().to_map().keys() {
        assert!(object.contains_key(key), "missing {key}");
    }
}
