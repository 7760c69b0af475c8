//! Connection abstraction.
//!
//! A [`ConnectionFactory`] hands out unopened [`Connection`] handles for one
//! configured provider. Deciding when to open and close a handle belongs to the
//! caller (the command executor or the scope controller), never to the factory.

use crate::db::command::Command;
use crate::db::row::Row;
use crate::error::DbResult;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Includes MariaDB
    MySql,
    Postgres,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::Postgres)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySql)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Whether bind placeholders are numbered (`$1`) rather than anonymous (`?`).
    pub fn numbered_placeholders(&self) -> bool {
        matches!(self, Self::Postgres)
    }

    pub fn supports_stored_procedures(&self) -> bool {
        !matches!(self, Self::SQLite)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

/// A stateful database connection handle.
///
/// Handles start [`ConnectionState::Closed`]. Whoever opens a handle owns it and
/// must eventually call [`Connection::close`], which consumes the handle so it
/// cannot be closed twice. A handle is not safe for concurrent use; every
/// method takes `&mut self`.
pub trait Connection: Send + 'static {
    fn state(&self) -> ConnectionState;

    fn open(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Close and dispose the handle.
    fn close(self) -> impl Future<Output = DbResult<()>> + Send
    where
        Self: Sized;

    fn begin(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Run a command and collect every returned row.
    fn fetch_all(&mut self, command: &Command) -> impl Future<Output = DbResult<Vec<Row>>> + Send;

    /// Run a command and return at most its first row.
    fn fetch_optional(
        &mut self,
        command: &Command,
    ) -> impl Future<Output = DbResult<Option<Row>>> + Send;

    /// Run a command for its effect and return the affected row count.
    fn execute(&mut self, command: &Command) -> impl Future<Output = DbResult<u64>> + Send;
}

/// Produces new, unopened connections for a configured provider.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: Connection;

    fn provider(&self) -> DatabaseType;

    /// Allocate a new handle in the [`ConnectionState::Closed`] state.
    fn create_connection(&self) -> DbResult<Self::Conn>;
}
