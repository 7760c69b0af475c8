//! Command execution engine.
//!
//! Every operation resolves its connection the same way:
//!
//! 1. If the context has an ambient pair, run on that connection (and its
//!    transaction, if any). The connection is *borrowed*: it is neither opened
//!    nor closed here, whatever the outcome.
//! 2. Otherwise create a fresh connection from the factory. It is *owned*:
//!    opened here if closed, and closed here on every exit path, including
//!    failure, timeout and cancellation.
//!
//! Which of the two happened is reported on each result as [`Ownership`].

use crate::db::command::Command;
use crate::db::connection::{Connection, ConnectionFactory, ConnectionState, DatabaseType};
use crate::db::context::DbContext;
use crate::db::row::Row;
use crate::db::scalar::{self, FromScalar};
use crate::error::{CancelReason, DataAccessError, DbResult};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default command timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Maximum command timeout in seconds.
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Whether the connection used for a call came from the ambient scope or was
/// opened for that call alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Opened and closed by the executor for this call.
    Owned,
    /// Taken from the active scope; left open.
    Borrowed,
}

impl std::fmt::Display for Ownership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owned => write!(f, "owned"),
            Self::Borrowed => write!(f, "borrowed"),
        }
    }
}

/// A result value together with how its connection was resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed<T> {
    pub value: T,
    pub ownership: Ownership,
}

impl<T> Executed<T> {
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Executed<U> {
        Executed {
            value: f(self.value),
            ownership: self.ownership,
        }
    }

    fn try_map<U>(self, f: impl FnOnce(T) -> DbResult<U>) -> DbResult<Executed<U>> {
        Ok(Executed {
            value: f(self.value)?,
            ownership: self.ownership,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    FetchAll,
    FetchOptional,
    Execute,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Self::FetchAll => "query",
            Self::FetchOptional => "query_first",
            Self::Execute => "execute",
        }
    }
}

enum Outcome {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Affected(u64),
}

/// Executes commands against the ambient connection of a [`DbContext`], or a
/// private connection when no scope is active.
pub struct CommandExecutor<F: ConnectionFactory> {
    factory: F,
    default_timeout: Duration,
}

impl<F: ConnectionFactory> CommandExecutor<F> {
    /// Create a new executor with the default timeout.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            default_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }

    /// Create a new executor with a custom default timeout (capped).
    pub fn with_timeout(factory: F, default_timeout: Duration) -> Self {
        Self {
            factory,
            default_timeout: default_timeout.min(Duration::from_secs(MAX_COMMAND_TIMEOUT_SECS)),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn provider(&self) -> DatabaseType {
        self.factory.provider()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run a query and map every row to `T`. No rows yields an empty vector;
    /// a failure yields no rows at all.
    pub async fn query<T: DeserializeOwned>(
        &self,
        ctx: &mut DbContext<F::Conn>,
        command: &Command,
    ) -> DbResult<Executed<Vec<T>>> {
        self.run(ctx, command, Operation::FetchAll)
            .await?
            .try_map(|outcome| match outcome {
                Outcome::Rows(rows) => rows.iter().map(Row::decode).collect(),
                _ => Err(unexpected_outcome()),
            })
    }

    /// Run a query and map its first row to `T`, if there is one. Any further
    /// rows are discarded by the driver, never merged.
    pub async fn query_first_or_default<T: DeserializeOwned>(
        &self,
        ctx: &mut DbContext<F::Conn>,
        command: &Command,
    ) -> DbResult<Executed<Option<T>>> {
        self.run(ctx, command, Operation::FetchOptional)
            .await?
            .try_map(|outcome| match outcome {
                Outcome::Row(row) => row.as_ref().map(Row::decode).transpose(),
                _ => Err(unexpected_outcome()),
            })
    }

    /// Run a command for its effect and return the affected row count.
    pub async fn execute(
        &self,
        ctx: &mut DbContext<F::Conn>,
        command: &Command,
    ) -> DbResult<Executed<u64>> {
        self.run(ctx, command, Operation::Execute)
            .await?
            .try_map(|outcome| match outcome {
                Outcome::Affected(n) => Ok(n),
                _ => Err(unexpected_outcome()),
            })
    }

    /// Run a command and convert the first column of its first row to `T`.
    /// SQL NULL and an empty result both yield `T`'s null value.
    pub async fn execute_scalar<T: FromScalar>(
        &self,
        ctx: &mut DbContext<F::Conn>,
        command: &Command,
    ) -> DbResult<Executed<T>> {
        self.run(ctx, command, Operation::FetchOptional)
            .await?
            .try_map(|outcome| match outcome {
                Outcome::Row(row) => scalar::convert(row.as_ref().and_then(Row::first_value)),
                _ => Err(unexpected_outcome()),
            })
    }

    /// Rows as returned by the driver, without materialization.
    pub async fn query_rows(
        &self,
        ctx: &mut DbContext<F::Conn>,
        command: &Command,
    ) -> DbResult<Executed<Vec<Row>>> {
        self.run(ctx, command, Operation::FetchAll)
            .await?
            .try_map(|outcome| match outcome {
                Outcome::Rows(rows) => Ok(rows),
                _ => Err(unexpected_outcome()),
            })
    }

    async fn run(
        &self,
        ctx: &mut DbContext<F::Conn>,
        command: &Command,
        operation: Operation,
    ) -> DbResult<Executed<Outcome>> {
        let limit = command
            .timeout()
            .unwrap_or(self.default_timeout)
            .min(Duration::from_secs(MAX_COMMAND_TIMEOUT_SECS));
        let cancel = ctx.cancellation().cloned();

        if let Some(pair) = ctx.get_mut() {
            debug!(
                sql = %command.sql(),
                params = command.parameters().len(),
                operation = operation.name(),
                ownership = %Ownership::Borrowed,
                scope_id = %pair.scope_id(),
                in_transaction = pair.in_transaction(),
                "Executing command"
            );
            let conn = pair.connection_mut();
            let outcome = guarded(
                operation,
                limit,
                cancel.as_ref(),
                perform(conn, command, operation),
            )
            .await?;
            return Ok(Executed {
                value: outcome,
                ownership: Ownership::Borrowed,
            });
        }

        debug!(
            sql = %command.sql(),
            params = command.parameters().len(),
            operation = operation.name(),
            ownership = %Ownership::Owned,
            "Executing command"
        );
        let mut conn = self.factory.create_connection()?;
        let result = guarded(operation, limit, cancel.as_ref(), async {
            if conn.state() == ConnectionState::Closed {
                conn.open().await?;
            }
            perform(&mut conn, command, operation).await
        })
        .await;

        // Release unconditionally; a close failure only surfaces if the
        // command itself succeeded.
        let closed = conn.close().await;
        match (result, closed) {
            (Ok(outcome), Ok(())) => Ok(Executed {
                value: outcome,
                ownership: Ownership::Owned,
            }),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Failed to close connection after command failure");
                Err(e)
            }
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for CommandExecutor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("provider", &self.factory.provider())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

async fn perform<C: Connection>(
    conn: &mut C,
    command: &Command,
    operation: Operation,
) -> DbResult<Outcome> {
    match operation {
        Operation::FetchAll => conn.fetch_all(command).await.map(Outcome::Rows),
        Operation::FetchOptional => conn.fetch_optional(command).await.map(Outcome::Row),
        Operation::Execute => conn.execute(command).await.map(Outcome::Affected),
    }
}

/// Bound a database round-trip by the command timeout and the flow's
/// cancellation token.
async fn guarded<T>(
    operation: Operation,
    limit: Duration,
    cancel: Option<&CancellationToken>,
    fut: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    let timed = async {
        match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(DataAccessError::cancelled(
                operation.name(),
                CancelReason::Timeout(limit),
            )),
        }
    };

    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(DataAccessError::cancelled(
                    operation.name(),
                    CancelReason::Requested,
                )),
                result = timed => result,
            }
        }
        None => timed.await,
    }
}

fn unexpected_outcome() -> DataAccessError {
    DataAccessError::command("Driver returned an outcome of the wrong kind")
}
