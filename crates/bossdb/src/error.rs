//! Error types for bossdb

use std::time::Duration;
use thiserror::Error;

/// Result type alias for bossdb operations
pub type DbResult<T> = Result<T, DbError>;

/// Error types for database operations
#[derive(Debug, Error)]
pub enum DbError {
    /// Unsupported driver or missing/invalid configuration keys
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The driver failed to connect
    #[error("Connection error: {0}")]
    Connection(String),

    /// Empty write payload, malformed identifier, negative limit, placeholder mismatch
    #[error("Validation error: {0}")]
    Validation(String),

    /// UPDATE/DELETE/increment without a filter
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A statement failed to prepare or execute.
    ///
    /// `sql` is kept for diagnostics only and must not be shown to end users.
    #[error("Query error: {message}")]
    Query { message: String, sql: String },

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Raw driver error (transaction control, connection setup)
    #[error("Driver error: {0}")]
    Driver(#[from] tokio_postgres::Error),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),

    /// Cache backend error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Filesystem error (file cache, logger, config)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a precondition error
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Create a query error carrying the attempted SQL
    pub fn query(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: sql.into(),
        }
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a precondition error
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }

    /// Check if this is a query error
    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query { .. })
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The SQL text that failed, if this error came from statement execution.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Wrap an execution failure as [`DbError::Query`].
    ///
    /// Errors that are already a `Query`, or that were raised before anything
    /// reached the driver (validation, timeout), are passed through.
    pub(crate) fn at_statement(self, sql: &str) -> Self {
        match self {
            Self::Query { .. }
            | Self::Validation(_)
            | Self::Precondition(_)
            | Self::Timeout(_) => self,
            Self::Driver(err) => Self::query(driver_message(&err), sql),
            other => Self::query(other.to_string(), sql),
        }
    }
}

/// Prefer the server-side message for database errors; fall back to the display form.
pub(crate) fn driver_message(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db_err) => match db_err.constraint() {
            Some(constraint) => format!("{} ({})", db_err.message(), constraint),
            None => db_err.message().to_string(),
        },
        None => err.to_string(),
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for DbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
