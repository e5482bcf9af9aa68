//! Error types for quarry operations

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Setup of {component} failed: {reason}")]
    SetupFailed { component: String, reason: String },
}

/// Malformed arguments handed to a constructor or typed accessor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("Data source configuration must be a mapping, got {found}")]
    ConfigNotAMapping { found: String },

    #[error("Configuration value {field} is not a valid {expected}")]
    ConfigValueType { field: String, expected: String },
}

/// Statement execution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Write statements cannot go through the cached query path: {statement}")]
    WrongQuery { statement: String },

    #[error("Query cannot be executed: {reason}")]
    CannotBeExecuted { reason: String },

    #[error("Retries exceeded after {attempts} attempts: {last_error}")]
    RetriesExceeded { attempts: u32, last_error: String },

    #[error("Missing value for bound parameter :{name}")]
    MissingParameter { name: String },

    #[error("Adapter returned no response for a read statement")]
    NoResponse,
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache setup failed: {reason}")]
    SetupFailed { reason: String },

    #[error("Cache is not ready")]
    NotReady,

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Failed to serialize cache payload: {reason}")]
    Serialization { reason: String },

    #[error("Failed to deserialize cache payload: {reason}")]
    Deserialization { reason: String },
}

/// Result shape violations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Row {row} does not match the field set: expected {expected:?}, found {found:?}")]
    RowShapeMismatch {
        row: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Row {row} has {found} values for {expected} fields")]
    RowArity {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Master error type for all quarry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuarryError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Type error: {0}")]
    Type(#[from] TypeError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{operation} is not implemented for this data source")]
    NotImplemented { operation: String },
}

impl QuarryError {
    /// Shorthand for the abstract-operation failure.
    pub fn not_implemented(operation: impl Into<String>) -> Self {
        QuarryError::NotImplemented {
            operation: operation.into(),
        }
    }

    /// True for the abstract-operation failure.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, QuarryError::NotImplemented { .. })
    }
}

/// Result type alias for quarry operations.
pub type QuarryResult<T> = Result<T, QuarryError>;

// =============================================================================
// TESTS
// =============================================================================
