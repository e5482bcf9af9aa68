//! Connection configuration.

use quarry_core::{ConfigError, DataSourceConfig, QuarryResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ENV_PG_HOST: &str = "QUARRY_PG_HOST";
pub const ENV_PG_PORT: &str = "QUARRY_PG_PORT";
pub const ENV_PG_DB: &str = "QUARRY_PG_DB";
pub const ENV_PG_USER: &str = "QUARRY_PG_USER";
pub const ENV_PG_PASSWORD: &str = "QUARRY_PG_PASSWORD";

/// PostgreSQL connection settings.
///
/// The field names are the configuration keys a data source recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name. Empty means the server default for the user.
    pub db: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            db: String::new(),
            user: "postgres".to_string(),
            password: String::new(),
        }
    }
}

impl PgConfig {
    /// Read `QUARRY_PG_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup(ENV_PG_HOST).unwrap_or(defaults.host),
            port: lookup(ENV_PG_PORT)
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            db: lookup(ENV_PG_DB).unwrap_or(defaults.db),
            user: lookup(ENV_PG_USER).unwrap_or(defaults.user),
            password: lookup(ENV_PG_PASSWORD).unwrap_or(defaults.password),
        }
    }

    /// Resolve every setting through a data source config.
    pub fn from_data_source(config: &DataSourceConfig) -> QuarryResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: config.get_as("host")?.unwrap_or(defaults.host),
            port: config.get_as("port")?.unwrap_or(defaults.port),
            db: config.get_as("db")?.unwrap_or(defaults.db),
            user: config.get_as("user")?.unwrap_or(defaults.user),
            password: config.get_as("password")?.unwrap_or(defaults.password),
        })
    }

    /// Settings as a configuration mapping.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("host".to_string(), Value::from(self.host.clone()));
        map.insert("port".to_string(), Value::from(self.port));
        map.insert("db".to_string(), Value::from(self.db.clone()));
        map.insert("user".to_string(), Value::from(self.user.clone()));
        map.insert("password".to_string(), Value::from(self.password.clone()));
        map
    }

    /// Client configuration for the `postgres` driver.
    pub fn to_client_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .application_name("quarry");
        if !self.db.is_empty() {
            config.dbname(&self.db);
        }
        config
    }

    pub(crate) fn connect_error(&self, error: &postgres::Error) -> ConfigError {
        ConfigError::SetupFailed {
            component: format!("postgres {}@{}:{}", self.user, self.host, self.port),
            reason: error.to_string(),
        }
    }
}
