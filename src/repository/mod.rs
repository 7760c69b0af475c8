//! Hand-written SQL repositories for the shipping schema.
//!
//! Repositories hold no connection of their own. Each method takes the
//! caller's [`DbContext`](crate::db::DbContext): inside a scope the call runs
//! on the scope's connection and transaction, outside one it gets a private
//! connection for that single statement.
//!
//! Selected columns are aliased with double quotes so the PascalCase names
//! survive PostgreSQL's identifier folding.

pub mod customers;
pub mod fleet;
pub mod routes;
pub mod shipments;
pub mod warehouses;

pub use customers::CustomerRepository;
pub use fleet::FleetRepository;
pub use routes::RouteRepository;
pub use shipments::ShipmentRepository;
pub use warehouses::WarehouseRepository;

use crate::db::DbContext;
use crate::error::{DataAccessError, DbResult};

/// Fail unless `ctx` has an active scope with an open transaction.
pub(crate) fn require_transaction<C: crate::db::Connection>(
    ctx: &DbContext<C>,
    operation: &str,
) -> DbResult<()> {
    match ctx.get() {
        Some(pair) if pair.in_transaction() => Ok(()),
        Some(pair) => Err(DataAccessError::invalid_scope(
            format!(
                "{operation} needs a transaction, but scope {} has none",
                pair.scope_id()
            ),
            None,
        )),
        None => Err(DataAccessError::invalid_scope(
            format!("{operation} must run inside a transactional scope"),
            None,
        )),
    }
}
