//! Error types for the shipping data-access layer.
//!
//! Every failure raised by the connection factory, the command executor or the
//! scope controller is a [`DataAccessError`]. Driver failures are classified
//! rather than flattened: the original error is kept as the `source` so callers
//! can tell a dropped connection from a constraint violation.

use crate::db::scope::ScopeState;
use std::time::Duration;
use thiserror::Error;

/// Boxed error kept as the cause of a [`DataAccessError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why an operation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The command exceeded its timeout.
    Timeout(Duration),
    /// The flow's cancellation token fired.
    Requested,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
            Self::Requested => write!(f, "cancellation requested"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Command execution failed: {message}")]
    CommandExecution {
        message: String,
        /// e.g., "23505" for a unique violation
        sql_state: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Cannot convert {found} to {target}")]
    Conversion { target: &'static str, found: String },

    #[error("Cancelled: {operation} ({reason})")]
    Cancelled {
        operation: String,
        reason: CancelReason,
    },

    #[error("Invalid scope state: {message}")]
    InvalidScopeState {
        message: String,
        state: Option<ScopeState>,
    },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },
}

impl DataAccessError {
    /// Create a connection error without an underlying cause.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping the original failure.
    pub fn connection_from<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a command execution error without an underlying cause.
    pub fn command(message: impl Into<String>) -> Self {
        Self::CommandExecution {
            message: message.into(),
            sql_state: None,
            source: None,
        }
    }

    /// Create a command execution error wrapping the original failure.
    pub fn command_from<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::CommandExecution {
            message: err.to_string(),
            sql_state: None,
            source: Some(Box::new(err)),
        }
    }

    /// Create a conversion error for a scalar or row that does not fit `target`.
    pub fn conversion(target: &'static str, found: impl Into<String>) -> Self {
        Self::Conversion {
            target,
            found: found.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>, reason: CancelReason) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            reason,
        }
    }

    /// Create a scope misuse error.
    pub fn invalid_scope(message: impl Into<String>, state: Option<ScopeState>) -> Self {
        Self::InvalidScopeState {
            message: message.into(),
            state,
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// SQLSTATE reported by the database, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::CommandExecution { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if this error is worth retrying at the caller's discretion.
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Cancelled {
                    reason: CancelReason::Timeout(_),
                    ..
                }
        )
    }
}

/// Classify sqlx errors into the data-access taxonomy, keeping the original as the cause.
impl From<sqlx::Error> for DataAccessError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(_)
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::AnyDriverError(_) => DataAccessError::connection_from(err),
            sqlx::Error::Database(ref db_err) => {
                let message = db_err.message().to_string();
                let sql_state = db_err.code().map(|c| c.to_string());
                DataAccessError::CommandExecution {
                    message,
                    sql_state,
                    source: Some(Box::new(err)),
                }
            }
            _ => DataAccessError::command_from(err),
        }
    }
}

/// Result type alias for data-access operations.
pub type DbResult<T> = Result<T, DataAccessError>;
