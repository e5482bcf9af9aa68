//! The query orchestrator
//!
//! A [`DataSource`] ties one [`Adapter`] to one [`Cache`]. Reads go through
//! [`DataSource::query`], which classifies the formatted statement, consults
//! the cache and only reaches the engine on a miss. Writes are refused there
//! and must use [`DataSource::execute`].
//!
//! Concurrent misses on the same key are not coordinated: both callers
//! execute and both put, and the last put wins.
//!
//! ```
//! use quarry_core::{DataSource, UnimplementedAdapter};
//! use serde_json::json;
//!
//! let mut source = DataSource::new(UnimplementedAdapter, json!({"region": "eu"})).unwrap();
//! assert_eq!(source.warnings().len(), 1);
//! assert!(source.query("SELECT 1", None).unwrap_err().is_not_implemented());
//! ```

use crate::adapter::{Adapter, ExtraOptions};
use crate::cache::{Cache, NullCache};
use crate::classify::{KeywordClassifier, WriteClassifier};
use crate::config::{ConfigWarning, DataSourceConfig, QueryConfig};
use crate::error::{QueryError, QuarryResult};
use crate::response::QueryResponse;
use crate::statement::QueryParams;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Orchestrates classification, caching and normalization for one engine.
pub struct DataSource<A: Adapter, C: Cache = NullCache> {
    adapter: A,
    cache: C,
    config: DataSourceConfig,
    default_query_config: QueryConfig,
    classifier: Box<dyn WriteClassifier>,
    warnings: Vec<ConfigWarning>,
    closed: bool,
}

impl<A: Adapter> DataSource<A, NullCache> {
    /// Build a data source without a cache.
    ///
    /// Fails with a type error when `config` is not a mapping.
    pub fn new(adapter: A, config: Value) -> QuarryResult<Self> {
        Self::with_cache(adapter, config, NullCache)
    }
}

impl<A: Adapter, C: Cache> DataSource<A, C> {
    /// Build a data source backed by `cache`.
    ///
    /// Fails with a type error when `config` is not a mapping.
    pub fn with_cache(adapter: A, config: Value, cache: C) -> QuarryResult<Self> {
        let config = DataSourceConfig::from_value(config)?;
        Ok(Self::from_config(adapter, config, cache))
    }

    /// Build a data source from an already validated config.
    ///
    /// The adapter's defaults replace any defaults carried by `config`. Keys
    /// the adapter does not recognize are kept and reported as warnings.
    pub fn from_config(adapter: A, config: DataSourceConfig, cache: C) -> Self {
        let config = config.with_defaults(adapter.default_config());

        let warnings = config.unexpected_keys();
        for warning in &warnings {
            tracing::warn!(key = %warning.key, "{}", warning);
        }

        Self {
            adapter,
            cache,
            config,
            default_query_config: QueryConfig::default(),
            classifier: Box::new(KeywordClassifier::sql()),
            warnings,
            closed: false,
        }
    }

    /// Replace the write classification policy.
    pub fn with_classifier(mut self, classifier: impl WriteClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// Replace the default query config.
    pub fn with_default_query_config(mut self, config: QueryConfig) -> Self {
        self.default_query_config = config;
        self
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Open the engine connection, then set up the cache.
    pub fn setup(&mut self) -> QuarryResult<()> {
        self.adapter.setup(&self.config)?;
        self.cache.setup()?;
        self.closed = false;
        tracing::info!(ready = self.is_ready(), "Data source set up");
        Ok(())
    }

    /// True when both the adapter and the cache are ready.
    pub fn is_ready(&self) -> bool {
        self.adapter.is_ready() && self.cache.is_ready()
    }

    /// Release adapter resources. Later calls are no-ops until the next setup.
    pub fn close(&mut self) -> QuarryResult<()> {
        if self.closed {
            return Ok(());
        }
        self.adapter.close()?;
        self.closed = true;
        tracing::info!("Data source closed");
        Ok(())
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    /// Explicit value, else the adapter default, else `None`.
    pub fn get_config(&self, name: &str) -> Option<&Value> {
        self.config.get(name)
    }

    /// Typed variant of [`Self::get_config`].
    pub fn get_config_as<T: DeserializeOwned>(&self, name: &str) -> QuarryResult<Option<T>> {
        self.config.get_as(name)
    }

    /// An independent copy of the default query config.
    pub fn copy_default_query_config(&self) -> QueryConfig {
        self.default_query_config.copy()
    }

    /// Diagnostics collected at construction, sorted by key.
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Run a read through the cache.
    pub fn query(
        &mut self,
        statement: &str,
        config: Option<&QueryConfig>,
    ) -> QuarryResult<QueryResponse> {
        self.query_with(statement, &QueryParams::new(), config, &ExtraOptions::new())
    }

    /// Run a read through the cache with bound parameters and adapter options.
    ///
    /// Writes fail with [`QueryError::WrongQuery`] before the cache is
    /// consulted. With `enable_cache` off the cache is neither read nor
    /// written.
    pub fn query_with(
        &mut self,
        statement: &str,
        params: &QueryParams,
        config: Option<&QueryConfig>,
        opts: &ExtraOptions,
    ) -> QuarryResult<QueryResponse> {
        let default_config;
        let query_config = match config {
            Some(config) => config,
            None => {
                default_config = self.copy_default_query_config();
                &default_config
            }
        };

        let formatted = self.adapter.format_statement(statement, params)?;
        if self.classifier.is_write(&formatted) {
            return Err(QueryError::WrongQuery {
                statement: formatted,
            }
            .into());
        }

        if !query_config.enable_cache {
            let payload =
                self.adapter
                    .execute_query(&formatted, params, false, query_config, opts)?;
            return self.normalize(payload);
        }

        let key = C::generate_key(&formatted);
        if let Some(payload) = self.cache.execute_get::<A::Payload>(&key)? {
            tracing::debug!(key = ?key, "Cache hit");
            return self.normalize(payload);
        }
        tracing::debug!(key = ?key, "Cache miss");

        let payload = self
            .adapter
            .execute_query(&formatted, params, false, query_config, opts)?;
        if self.cache.execute_put(&key, &payload)? {
            tracing::debug!(key = ?key, "Cached payload");
        } else {
            tracing::warn!(key = ?key, "Cache did not store payload");
        }

        self.normalize(payload)
    }

    /// Run any statement directly against the engine, bypassing the cache.
    ///
    /// Writes are committed. Returns whatever the adapter makes of the
    /// payload, which may be nothing.
    pub fn execute(
        &mut self,
        statement: &str,
        params: &QueryParams,
        config: Option<&QueryConfig>,
        opts: &ExtraOptions,
    ) -> QuarryResult<Option<QueryResponse>> {
        let default_config;
        let query_config = match config {
            Some(config) => config,
            None => {
                default_config = self.copy_default_query_config();
                &default_config
            }
        };

        let formatted = self.adapter.format_statement(statement, params)?;
        let needs_commit = self.classifier.is_write(&formatted);
        let payload =
            self.adapter
                .execute_query(&formatted, params, needs_commit, query_config, opts)?;
        self.adapter.parse_response(Some(payload))
    }

    fn normalize(&self, payload: A::Payload) -> QuarryResult<QueryResponse> {
        self.adapter
            .parse_response(Some(payload))?
            .ok_or_else(|| QueryError::NoResponse.into())
    }
}

impl<A: Adapter, C: Cache> Drop for DataSource<A, C> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close data source");
        }
    }
}

impl<A: Adapter, C: Cache> std::fmt::Debug for DataSource<A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("config", &self.config)
            .field("default_query_config", &self.default_query_config)
            .field("warnings", &self.warnings)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================
