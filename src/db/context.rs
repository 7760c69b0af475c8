//! Per-flow data-access context.
//!
//! A [`DbContext`] is the ambient scope of one logical flow (one inbound
//! request, one business transaction). It holds at most one [`AmbientPair`]:
//! the connection published by an active scope, plus that scope's transaction
//! if it started one. Every data-access call takes the context explicitly, so
//! the scope a call runs in is visible at the call site.
//!
//! Isolation between flows comes from ownership: a context is not `Clone`,
//! each flow creates its own, and `&mut` access rules out two overlapping
//! operations on the same pair.

use crate::db::connection::Connection;
use crate::db::scope::ScopeId;
use crate::error::{DataAccessError, DbResult};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Marker for the transaction running on the ambient connection.
#[derive(Debug)]
pub struct TransactionHandle {
    id: String,
    started_at: DateTime<Utc>,
}

impl TransactionHandle {
    pub(crate) fn new() -> Self {
        Self {
            id: generate_transaction_id(),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// The connection (and optional transaction) shared by every call in a scope.
///
/// The transaction can only exist together with the connection it runs on.
#[derive(Debug)]
pub struct AmbientPair<C> {
    scope_id: ScopeId,
    connection: C,
    transaction: Option<TransactionHandle>,
}

impl<C> AmbientPair<C> {
    pub fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn transaction(&self) -> Option<&TransactionHandle> {
        self.transaction.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub(crate) fn take_transaction(&mut self) -> Option<TransactionHandle> {
        self.transaction.take()
    }

    pub(crate) fn into_connection(self) -> C {
        self.connection
    }
}

/// Ambient scope store for one logical flow.
#[derive(Debug)]
pub struct DbContext<C: Connection> {
    ambient: Option<AmbientPair<C>>,
    cancellation: Option<CancellationToken>,
}

impl<C: Connection> DbContext<C> {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            ambient: None,
            cancellation: None,
        }
    }

    /// Attach the flow's cancellation signal. Commands issued through this
    /// context abort with `Cancelled` once the token fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn get(&self) -> Option<&AmbientPair<C>> {
        self.ambient.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut AmbientPair<C>> {
        self.ambient.as_mut()
    }

    pub fn is_active(&self) -> bool {
        self.ambient.is_some()
    }

    /// Publish an open connection (and its transaction) as this flow's
    /// ambient pair. Fails if a pair is already published, handing the
    /// rejected connection back so the caller can still close it.
    pub fn set(
        &mut self,
        connection: C,
        transaction: Option<TransactionHandle>,
    ) -> Result<ScopeId, (DataAccessError, C)> {
        if let Some(current) = &self.ambient {
            let err = DataAccessError::invalid_scope(
                format!("scope {} is already active in this flow", current.scope_id),
                None,
            );
            return Err((err, connection));
        }
        let scope_id = ScopeId::new();
        self.ambient = Some(AmbientPair {
            scope_id,
            connection,
            transaction,
        });
        Ok(scope_id)
    }

    /// Reset the store, handing the pair back to its owner for release.
    pub fn clear(&mut self) -> Option<AmbientPair<C>> {
        self.ambient.take()
    }

    /// Take the pair only if it belongs to `scope_id`.
    pub(crate) fn clear_scope(&mut self, scope_id: ScopeId) -> DbResult<AmbientPair<C>> {
        match &self.ambient {
            Some(pair) if pair.scope_id == scope_id => {
                self.ambient.take().ok_or_else(|| unreachable_scope(scope_id))
            }
            _ => Err(unreachable_scope(scope_id)),
        }
    }

    /// Borrow the pair only if it belongs to `scope_id`.
    pub(crate) fn scope_mut(&mut self, scope_id: ScopeId) -> DbResult<&mut AmbientPair<C>> {
        match self.ambient.as_mut() {
            Some(pair) if pair.scope_id == scope_id => Ok(pair),
            _ => Err(unreachable_scope(scope_id)),
        }
    }
}

impl<C: Connection> Default for DbContext<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> Drop for DbContext<C> {
    fn drop(&mut self) {
        if let Some(pair) = &self.ambient {
            // The connection's own Drop releases it; a pending transaction is
            // abandoned and rolled back by the server.
            warn!(
                scope_id = %pair.scope_id,
                in_transaction = pair.in_transaction(),
                "Context dropped with an active scope"
            );
        }
    }
}

fn unreachable_scope(scope_id: ScopeId) -> DataAccessError {
    DataAccessError::invalid_scope(
        format!("scope {scope_id} is not the active scope of this context"),
        None,
    )
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
