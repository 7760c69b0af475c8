//! Shipping data access library.
//!
//! This library provides the data-access core of a shipping/logistics
//! backend: scoped sharing of one connection and transaction across a chain
//! of calls, private short-lived connections everywhere else, and
//! repositories over the shipping schema (SQLite, PostgreSQL, MySQL).

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repository;

pub use config::Config;
pub use error::{DataAccessError, DbResult};
