//! Error types for the SQL access layer.
//!
//! Every failure is classified exactly once, where a driver error enters the
//! crate (`From<sqlx::Error>`). Retry decisions elsewhere only look at
//! [`DbError::kind`], never at raw SQLSTATE codes.

use thiserror::Error;

/// Coarse classification used by the retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The server went away or the connection dropped.
    Connectivity,
    /// Deadlock, serialization failure or lock timeout.
    Contention,
    /// Caller supplied something unusable.
    BadValue,
    /// A referenced row does not exist, or another constraint was violated.
    Integrity,
    /// No pooled connection became available before the pool timeout.
    Exhausted,
    /// Anything the driver reported that we do not recognise.
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connectivity => "connectivity",
            Self::Contention => "contention",
            Self::BadValue => "bad value",
            Self::Integrity => "integrity",
            Self::Exhausted => "exhausted",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Failed to connect to database '{database}' address '{address}': {message}")]
    BackendIo {
        database: String,
        address: String,
        message: String,
    },

    #[error("Lock contention: {message}")]
    Contention {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Bad value: {message}")]
    BadValue { message: String },

    #[error("Integrity violation: {message}")]
    Integrity {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Timeout: no pooled connection available after {timeout_secs}s")]
    PoolExhausted { timeout_secs: u64 },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("{operation} gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

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

    /// Create the error reported when a pool cannot reach its database.
    pub fn backend_io(
        database: impl Into<String>,
        address: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BackendIo {
            database: database.into(),
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a lock contention error.
    pub fn contention(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Contention {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a bad value error.
    pub fn bad_value(message: impl Into<String>) -> Self {
        Self::BadValue {
            message: message.into(),
        }
    }

    /// Create an integrity error.
    pub fn integrity(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Integrity {
            message: message.into(),
            sql_state,
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

    /// Wrap the last failure of a bounded retry loop.
    pub fn retries_exhausted(operation: impl Into<String>, attempts: u32, last: DbError) -> Self {
        Self::RetriesExhausted {
            operation: operation.into(),
            attempts,
            source: Box::new(last),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classification used by the retry loops.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } | Self::BackendIo { .. } => ErrorKind::Connectivity,
            Self::Contention { .. } => ErrorKind::Contention,
            Self::BadValue { .. } => ErrorKind::BadValue,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::PoolExhausted { .. } => ErrorKind::Exhausted,
            Self::RetriesExhausted { source, .. } => source.kind(),
            Self::Database { sql_state, .. } => sql_state
                .as_deref()
                .map(classify_sql_state)
                .unwrap_or(ErrorKind::Unknown),
            Self::Internal { .. } => ErrorKind::Unknown,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::RetriesExhausted { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Contention { sql_state, .. }
            | Self::Integrity { sql_state, .. }
            | Self::Database { sql_state, .. } => sql_state.as_deref(),
            Self::RetriesExhausted { source, .. } => source.sql_state(),
            _ => None,
        }
    }

    /// Check if this error is worth another attempt.
    ///
    /// A surfaced [`DbError::RetriesExhausted`] is final even though it keeps
    /// the kind of its cause.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } => false,
            _ => matches!(self.kind(), ErrorKind::Connectivity | ErrorKind::Contention),
        }
    }
}

/// Map a PostgreSQL SQLSTATE to an [`ErrorKind`].
pub fn classify_sql_state(code: &str) -> ErrorKind {
    match code {
        // admin_shutdown, crash_shutdown, cannot_connect_now
        "57P01" | "57P02" | "57P03" => ErrorKind::Connectivity,
        // serialization_failure, deadlock_detected, lock_not_available
        "40001" | "40P01" | "55P03" => ErrorKind::Contention,
        _ if code.starts_with("08") => ErrorKind::Connectivity,
        _ if code.starts_with("23") => ErrorKind::Integrity,
        _ if code.starts_with("22") => ErrorKind::BadValue,
        _ => ErrorKind::Unknown,
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection options and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let message = db_err.message().to_string();
                match code.as_deref().map(classify_sql_state) {
                    Some(ErrorKind::Connectivity) => DbError::connection(
                        message,
                        "The server closed the session; the pool will be rebuilt",
                    ),
                    Some(ErrorKind::Contention) => DbError::contention(message, code),
                    Some(ErrorKind::Integrity) => DbError::integrity(message, code),
                    Some(ErrorKind::BadValue) => DbError::bad_value(message),
                    _ => DbError::database(
                        message,
                        code,
                        "Check the SQL syntax and referenced objects",
                    ),
                }
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted { timeout_secs: 0 },
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
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
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => {
                DbError::connection("Database worker crashed", "Reconnect to the database")
            }
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
