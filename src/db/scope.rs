//! Scope controller for connection-sharing units of work.
//!
//! A scope opens one connection, optionally starts a transaction on it, and
//! publishes both to the flow's [`DbContext`]. Every executor call made with
//! that context while the scope is active runs on the shared connection. The
//! scope ends with a commit or a rollback, after which the context is cleared
//! and the connection closed, whether or not finalizing succeeded.
//!
//! ```text
//! NotStarted -> Active -> { Committed | RolledBack } -> Closed
//! ```

use crate::db::connection::{Connection, ConnectionFactory};
use crate::db::context::{DbContext, TransactionHandle};
use crate::error::{DataAccessError, DbResult};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Identity of one scope instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(uuid::Uuid);

impl ScopeId {
    pub(crate) fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope_{}", self.0.simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    NotStarted,
    Active,
    Committed,
    RolledBack,
    Closed,
}

impl std::fmt::Display for ScopeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Caller-side token for an active scope.
#[derive(Debug)]
pub struct ScopeHandle {
    id: ScopeId,
    state: ScopeState,
    outcome: Option<ScopeState>,
    transactional: bool,
    started_at: Instant,
}

impl ScopeHandle {
    fn new(transactional: bool) -> Self {
        Self {
            id: ScopeId::new(),
            state: ScopeState::NotStarted,
            outcome: None,
            transactional,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// `Committed` or `RolledBack` once the scope finalized a transaction.
    pub fn outcome(&self) -> Option<ScopeState> {
        self.outcome
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    fn ensure_active(&self, operation: &str) -> DbResult<()> {
        if self.state == ScopeState::Active {
            Ok(())
        } else {
            Err(DataAccessError::invalid_scope(
                format!("cannot {operation} scope {} in state '{}'", self.id, self.state),
                Some(self.state),
            ))
        }
    }
}

impl Drop for ScopeHandle {
    fn drop(&mut self) {
        if self.state == ScopeState::Active {
            warn!(
                scope_id = %self.id,
                transactional = self.transactional,
                "Scope handle dropped while active; end it with commit, rollback or end"
            );
        }
    }
}

/// Begins and ends scopes over connections from a factory.
#[derive(Debug, Clone)]
pub struct ScopeController<F: ConnectionFactory> {
    factory: F,
}

impl<F: ConnectionFactory> ScopeController<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Open a connection, optionally begin a transaction, and publish both to
    /// `ctx`. Fails with `InvalidScopeState` if `ctx` already has an active
    /// scope.
    pub async fn begin(
        &self,
        ctx: &mut DbContext<F::Conn>,
        with_transaction: bool,
    ) -> DbResult<ScopeHandle> {
        if let Some(current) = ctx.get() {
            return Err(DataAccessError::invalid_scope(
                format!(
                    "scope {} is already active in this flow",
                    current.scope_id()
                ),
                Some(ScopeState::Active),
            ));
        }

        let mut handle = ScopeHandle::new(with_transaction);
        let mut conn = self.factory.create_connection()?;

        if let Err(e) = conn.open().await {
            release_after_failure(conn, "open").await;
            return Err(e);
        }

        let transaction = if with_transaction {
            if let Err(e) = conn.begin().await {
                release_after_failure(conn, "begin").await;
                return Err(e);
            }
            Some(TransactionHandle::new())
        } else {
            None
        };
        let transaction_id = transaction.as_ref().map(|tx| tx.id().to_string());

        match ctx.set(conn, transaction) {
            Ok(scope_id) => handle.id = scope_id,
            Err((e, mut conn)) => {
                if with_transaction {
                    if let Err(rollback_err) = conn.rollback().await {
                        warn!(error = %rollback_err, "Failed to roll back rejected scope");
                    }
                }
                release_after_failure(conn, "publish").await;
                return Err(e);
            }
        }
        handle.state = ScopeState::Active;

        info!(
            scope_id = %handle.id,
            provider = %self.factory.provider(),
            transaction_id = ?transaction_id,
            "Scope started"
        );
        Ok(handle)
    }

    /// Commit the scope's transaction (if it has one) and end the scope.
    pub async fn commit(
        &self,
        ctx: &mut DbContext<F::Conn>,
        handle: &mut ScopeHandle,
    ) -> DbResult<()> {
        handle.ensure_active("commit")?;
        let pair = ctx.scope_mut(handle.id)?;

        let committed = match pair.take_transaction() {
            Some(tx) => {
                let result = pair.connection_mut().commit().await;
                match &result {
                    Ok(()) => info!(
                        scope_id = %handle.id,
                        transaction_id = %tx.id(),
                        "Transaction committed"
                    ),
                    Err(e) => warn!(
                        scope_id = %handle.id,
                        transaction_id = %tx.id(),
                        error = %e,
                        "Commit failed"
                    ),
                }
                result
            }
            None => Ok(()),
        };
        handle.state = if committed.is_ok() {
            ScopeState::Committed
        } else {
            ScopeState::RolledBack
        };
        handle.outcome = Some(handle.state);

        self.finish(ctx, handle, committed).await
    }

    /// Roll back the scope's transaction (if it has one) and end the scope.
    pub async fn rollback(
        &self,
        ctx: &mut DbContext<F::Conn>,
        handle: &mut ScopeHandle,
    ) -> DbResult<()> {
        handle.ensure_active("roll back")?;
        let pair = ctx.scope_mut(handle.id)?;

        let rolled_back = match pair.take_transaction() {
            Some(tx) => {
                let result = pair.connection_mut().rollback().await;
                if result.is_ok() {
                    info!(
                        scope_id = %handle.id,
                        transaction_id = %tx.id(),
                        "Transaction rolled back"
                    );
                }
                result
            }
            None => Ok(()),
        };
        handle.state = ScopeState::RolledBack;
        handle.outcome = Some(ScopeState::RolledBack);

        self.finish(ctx, handle, rolled_back).await
    }

    /// End a scope that was neither committed nor rolled back. A pending
    /// transaction is rolled back.
    pub async fn end(&self, ctx: &mut DbContext<F::Conn>, handle: &mut ScopeHandle) -> DbResult<()> {
        handle.ensure_active("end")?;
        let pending = ctx
            .scope_mut(handle.id)?
            .transaction()
            .is_some();
        if pending {
            warn!(scope_id = %handle.id, "Ending scope with an open transaction; rolling back");
            return self.rollback(ctx, handle).await;
        }
        self.finish(ctx, handle, Ok(())).await
    }

    /// Run `work` inside a scope: commit when it returns `Ok`, roll back when
    /// it returns `Err`. The scope is ended on both paths.
    ///
    /// If the returned future is dropped before it completes (an outer
    /// timeout, a `select!`, an aborted task), the scope is withdrawn from
    /// `ctx` and its connection dropped without committing.
    pub async fn run<T>(
        &self,
        ctx: &mut DbContext<F::Conn>,
        with_transaction: bool,
        work: impl AsyncFnOnce(&mut DbContext<F::Conn>) -> DbResult<T>,
    ) -> DbResult<T> {
        let handle = self.begin(ctx, with_transaction).await?;
        let mut scope = RunGuard { ctx, handle };

        match work(&mut *scope.ctx).await {
            Ok(value) => {
                if let Err(e) = self.commit(&mut *scope.ctx, &mut scope.handle).await {
                    warn!(
                        scope_id = %scope.handle.id(),
                        error = %e,
                        "Work completed but the scope failed to commit"
                    );
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                debug!(scope_id = %scope.handle.id(), error = %e, "Work failed; rolling back");
                if scope.handle.state() == ScopeState::Active {
                    if let Err(rollback_err) =
                        self.rollback(&mut *scope.ctx, &mut scope.handle).await
                    {
                        warn!(
                            scope_id = %scope.handle.id(),
                            error = %rollback_err,
                            "Rollback after failed work also failed"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Clear the context and close the scope's connection. Runs after every
    /// commit/rollback attempt; `finalized` is the result of that attempt.
    async fn finish(
        &self,
        ctx: &mut DbContext<F::Conn>,
        handle: &mut ScopeHandle,
        finalized: DbResult<()>,
    ) -> DbResult<()> {
        let pair = ctx.clear_scope(handle.id);
        handle.state = ScopeState::Closed;
        let closed = match pair {
            Ok(pair) => pair.into_connection().close().await,
            Err(e) => Err(e),
        };

        debug!(
            scope_id = %handle.id,
            outcome = ?handle.outcome,
            elapsed_ms = handle.started_at.elapsed().as_millis() as u64,
            "Scope closed"
        );

        match (finalized, closed) {
            (Ok(()), closed) => closed,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Failed to close scope connection");
                Err(e)
            }
        }
    }
}

/// Ties a `run` scope to the context it was published on.
struct RunGuard<'a, C: Connection> {
    ctx: &'a mut DbContext<C>,
    handle: ScopeHandle,
}

impl<C: Connection> Drop for RunGuard<'_, C> {
    fn drop(&mut self) {
        if self.handle.state != ScopeState::Active {
            return;
        }
        // Dropping the connection abandons any open transaction
        if let Ok(pair) = self.ctx.clear_scope(self.handle.id) {
            warn!(
                scope_id = %self.handle.id,
                in_transaction = pair.in_transaction(),
                "Scope abandoned before it finished; discarding its connection"
            );
            drop(pair);
        }
        self.handle.state = ScopeState::Closed;
    }
}

async fn release_after_failure<C: Connection>(conn: C, stage: &str) {
    if let Err(e) = conn.close().await {
        warn!(stage, error = %e, "Failed to release connection");
    }
}
