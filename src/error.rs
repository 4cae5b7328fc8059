//! Error types for the data-access layer.
//!
//! Every fallible operation returns [`DbResult`]. Variants map one-to-one onto
//! the failure classes callers are expected to handle: configuration and
//! lifecycle errors are fatal, pool exhaustion is transient, transaction
//! errors are terminal for the unit of work that raised them.

use crate::db::EngineState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Pool exhausted: {}", describe_wait(.timeout_ms))]
    PoolExhausted { timeout_ms: Option<u64> },

    #[error("Engine not ready (state: {state})")]
    EngineNotReady { state: EngineState },

    #[error("Unsupported operation: {operation} is not available on {backend}")]
    UnsupportedOperation { operation: String, backend: String },

    #[error("Transaction error: {message} (unit of work: {unit_id})")]
    Transaction { message: String, unit_id: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for a unique violation
        sql_state: Option<String>,
    },

    #[error("Invalid session: {message}")]
    InvalidSession { message: String },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a pool exhaustion error for the given acquisition timeout.
    pub fn pool_exhausted(timeout: std::time::Duration) -> Self {
        Self::PoolExhausted {
            timeout_ms: Some(timeout.as_millis() as u64),
        }
    }

    pub fn engine_not_ready(state: EngineState) -> Self {
        Self::EngineNotReady { state }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>, backend: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            backend: backend.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, unit_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            unit_id: unit_id.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    pub fn invalid_session(message: impl Into<String>) -> Self {
        Self::InvalidSession {
            message: message.into(),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only transient pool pressure qualifies; the layer itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// Check if this error must stop the process from serving traffic.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Connection { .. })
    }
}

/// Convert sqlx errors raised inside a session to DbError.
///
/// Pool-level failures keep their own variants; everything else is reported
/// as a statement failure.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::database("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted { timeout_ms: None },
            sqlx::Error::PoolClosed => DbError::engine_not_ready(EngineState::Disposed),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::database(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::database(format!("Failed to decode column {}: {}", index, source), None)
            }
            sqlx::Error::Decode(source) => {
                DbError::database(format!("Decode error: {}", source), None)
            }
            other => DbError::database(format!("Unknown database error: {}", other), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

fn describe_wait(timeout_ms: &Option<u64>) -> String {
    match timeout_ms {
        Some(ms) => format!("no connection became available within {}ms", ms),
        None => "timed out waiting for a connection".to_string(),
    }
}
