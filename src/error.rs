//! Error types for the execution layer.
//!
//! This module defines all error types using `thiserror`. Driver failures are
//! mapped into a small taxonomy so callers can tell pool exhaustion, statement
//! failures, constraint violations and cleanup failures apart.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Connection pool exhausted: {message}")]
    PoolExhausted { message: String },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Statement failed: {message}")]
    Statement {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Integrity error: {message}")]
    Integrity {
        message: String,
        sql_state: Option<String>,
    },

    /// A rollback issued as failure cleanup failed itself. The failure that
    /// triggered the rollback is kept as the error source.
    #[error("Rollback failed: {message}")]
    Rollback {
        message: String,
        #[source]
        original: Option<Box<DbError>>,
    },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("No row matches the lookup: {sql}")]
    NotFound { sql: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            message: message.into(),
        }
    }

    /// Create a statement error with optional SQL state.
    pub fn statement(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Statement {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn integrity(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Integrity {
            message: message.into(),
            sql_state,
        }
    }

    /// Wrap a failed rollback. `original` is the failure the rollback was
    /// cleaning up after, if any.
    pub fn rollback(cause: DbError, original: Option<DbError>) -> Self {
        Self::Rollback {
            message: cause.to_string(),
            original: original.map(Box::new),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn not_found(sql: impl Into<String>) -> Self {
        Self::NotFound { sql: sql.into() }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Statement { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Raise max_connections or acquire_timeout, or release leases sooner")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::PoolExhausted { .. }
        )
    }

    /// The SQLSTATE reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Statement { sql_state, .. } | Self::Integrity { sql_state, .. } => {
                sql_state.as_deref()
            }
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let is_integrity = matches!(
                    db_err.kind(),
                    sqlx::error::ErrorKind::UniqueViolation
                        | sqlx::error::ErrorKind::ForeignKeyViolation
                        | sqlx::error::ErrorKind::NotNullViolation
                        | sqlx::error::ErrorKind::CheckViolation
                );
                if is_integrity {
                    DbError::integrity(db_err.message(), code)
                } else {
                    DbError::statement(
                        db_err.message(),
                        code,
                        "Check the SQL syntax and referenced objects",
                    )
                }
            }
            sqlx::Error::RowNotFound => DbError::not_found("<driver lookup>"),
            sqlx::Error::PoolTimedOut => DbError::pool_exhausted("driver pool timed out"),
            sqlx::Error::PoolClosed => DbError::PoolClosed,
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
                DbError::decode(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::decode(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::decode(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
