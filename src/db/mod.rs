//! Database abstraction layer.
//!
//! This module provides the ambient data-access context:
//! - Connection abstraction and the sqlx-backed pool factory
//! - Commands with dialect-independent `@name` parameters
//! - Per-flow ambient scope store
//! - Command execution with borrowed or owned connections
//! - Scope controller for shared connections and transactions
//! - Row and scalar conversion

#[macro_use]
mod macros;

pub mod command;
pub mod connection;
pub mod context;
pub mod executor;
pub(crate) mod params;
pub mod pool;
pub mod row;
pub mod scalar;
pub mod scope;
pub mod types;

pub use command::{Command, CommandShape, ParamValue};
pub use connection::{Connection, ConnectionFactory, ConnectionState, DatabaseType};
pub use context::{AmbientPair, DbContext, TransactionHandle};
pub use executor::{CommandExecutor, Executed, Ownership};
pub use pool::{DbPool, SqlxConnection, SqlxConnectionFactory};
pub use row::Row;
pub use scalar::FromScalar;
pub use scope::{ScopeController, ScopeHandle, ScopeId, ScopeState};
