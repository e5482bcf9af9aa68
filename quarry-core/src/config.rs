//! Configuration types
//!
//! Two layers of configuration exist. [`DataSourceConfig`] is set once when a
//! data source is built and carries connection-level options, while
//! [`QueryConfig`] is a per-call bag of execution options that callers copy
//! from the data source default and tweak.

use crate::error::{ConfigError, QuarryResult, TypeError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

// ============================================================================
// QUERY CONFIG
// ============================================================================

/// Per-query execution options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Whether reads may be served from and stored into the cache.
    pub enable_cache: bool,
    /// How many times an adapter may retry a failed execution.
    pub retries: u32,
    /// Rows fetched per round trip, when the engine supports it.
    pub fetch_size: Option<u32>,
    /// Engine-side statement timeout.
    pub statement_timeout: Option<Duration>,
    /// Adapter-specific options not covered above.
    #[serde(default)]
    pub custom: BTreeMap<String, Value>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            retries: 0,
            fetch_size: None,
            statement_timeout: None,
            custom: BTreeMap::new(),
        }
    }
}

impl QueryConfig {
    /// Create a query config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an independent copy of this config.
    ///
    /// Changes to the copy never reach the source, which is what lets a
    /// data source hand out its default without sharing it.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Look up an option by name.
    ///
    /// Built-in options shadow custom ones. Unset optional options and
    /// unknown names both yield `None`.
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "enable_cache" => Some(Value::Bool(self.enable_cache)),
            "retries" => Some(Value::from(self.retries)),
            "fetch_size" => self.fetch_size.map(Value::from),
            "statement_timeout" => self
                .statement_timeout
                .map(|timeout| Value::from(timeout.as_secs_f64())),
            other => self.custom.get(other).cloned(),
        }
    }

    /// Enable or disable the cache for this query.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.enable_cache = enabled;
        self
    }

    /// Set how many times a failed execution may be retried.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the fetch size.
    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    /// Set the statement timeout.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Set a custom option.
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(name.into(), value.into());
        self
    }
}

// ============================================================================
// DATA SOURCE CONFIG
// ============================================================================

/// Non-fatal diagnostic for a configuration key the adapter does not know.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigWarning {
    pub key: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is an unexpected config value", self.key)
    }
}

/// Data source configuration: explicit values layered over adapter defaults.
///
/// Lookups go explicit value, then default, then nothing. Keys the defaults
/// do not name are kept and reported through [`Self::unexpected_keys`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSourceConfig {
    values: Map<String, Value>,
    defaults: Map<String, Value>,
}

impl DataSourceConfig {
    /// Build a config from an arbitrary JSON value.
    ///
    /// Anything other than an object is rejected.
    pub fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Object(values) => Ok(Self {
                values,
                defaults: Map::new(),
            }),
            other => Err(TypeError::ConfigNotAMapping {
                found: json_kind(&other).to_string(),
            }),
        }
    }

    /// Parse a TOML document into a config.
    pub fn parse_toml(source: &str) -> QuarryResult<Self> {
        let table: toml::Table = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        let value = serde_json::to_value(table).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        Ok(Self::from_value(value)?)
    }

    /// Attach the adapter defaults, which also define the recognized keys.
    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Resolve an option: explicit value, else default, else `None`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).or_else(|| self.defaults.get(name))
    }

    /// Resolve an option and deserialize it.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> QuarryResult<Option<T>> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|_| {
                    TypeError::ConfigValueType {
                        field: name.to_string(),
                        expected: std::any::type_name::<T>().to_string(),
                    }
                    .into()
                }),
        }
    }

    /// Explicitly configured values.
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Adapter defaults.
    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    /// One warning per explicit key missing from the defaults, sorted by key.
    pub fn unexpected_keys(&self) -> Vec<ConfigWarning> {
        // serde_json's Map is ordered by key, so iteration is already sorted.
        self.values
            .keys()
            .filter(|key| !self.defaults.contains_key(*key))
            .map(|key| ConfigWarning { key: key.clone() })
            .collect()
    }
}

impl TryFrom<Value> for DataSourceConfig {
    type Error = TypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// TESTS
// =============================================================================
