//! Error types for the shard router.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Construction-time failures (`Config`, `Connection`) are fatal for startup; per-call
//! failures carry the identity of the shard that produced them.

use crate::models::ShardRef;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Connection failed for {shard}: {message}")]
    Connection {
        shard: ShardRef,
        message: String,
        suggestion: String,
    },

    #[error("Routing error for table index {index}: {message}")]
    Routing { index: u32, message: String },

    #[error("{shard} operation failed: {source}")]
    ShardOperation {
        shard: ShardRef,
        #[source]
        source: Box<ShardError>,
    },

    #[error("Group manager is closed")]
    Closed,

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ShardError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(
        shard: ShardRef,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Connection {
            shard,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a routing error.
    pub fn routing(index: u32, message: impl Into<String>) -> Self {
        Self::Routing {
            index,
            message: message.into(),
        }
    }

    /// Wrap an error with the identity of the shard that produced it.
    ///
    /// Already-wrapped errors are returned unchanged so the innermost shard wins.
    pub fn on_shard(self, shard: ShardRef) -> Self {
        match self {
            Self::ShardOperation { .. } | Self::Connection { .. } | Self::Closed => self,
            other => Self::ShardOperation {
                shard,
                source: Box::new(other),
            },
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::ShardOperation { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// The shard this error is attributed to, if any.
    pub fn shard(&self) -> Option<ShardRef> {
        match self {
            Self::Connection { shard, .. } | Self::ShardOperation { shard, .. } => Some(*shard),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// The routing layer itself never retries; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::ShardOperation { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Convert sqlx errors to ShardError.
impl From<sqlx::Error> for ShardError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => ShardError::config(format!(
                "Invalid connection configuration: {}",
                msg
            )),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                ShardError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => ShardError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            // Executors report the pool's configured limit; no duration is known here.
            sqlx::Error::PoolTimedOut => ShardError::database(
                "Timed out waiting for a pooled connection",
                None,
                "Raise max_open_conns or acquire_timeout_secs",
            ),
            sqlx::Error::PoolClosed => ShardError::Closed,
            sqlx::Error::Io(io_err) => ShardError::database(
                format!("I/O error: {}", io_err),
                None,
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => ShardError::database(
                format!("TLS error: {}", tls_err),
                None,
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => ShardError::database(
                format!("Protocol error: {}", msg),
                None,
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => ShardError::database(
                format!("Column not found: {}", col),
                None,
                "Check the column names referenced by the query",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                ShardError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => {
                ShardError::internal(format!("Decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => ShardError::internal("Database worker crashed"),
            _ => ShardError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for shard router operations.
pub type ShardResult<T> = Result<T, ShardError>;
