use crate::db::{Command, CommandExecutor, ConnectionFactory, DbContext};
use crate::error::DbResult;
use crate::models::Route;
use std::sync::Arc;

const COLUMNS: &str = r#"Id AS "Id", Name AS "Name", OriginWarehouseId AS "OriginWarehouseId",
    DestinationWarehouseId AS "DestinationWarehouseId", DistanceKm AS "DistanceKm",
    IsActive AS "IsActive""#;

pub struct RouteRepository<F: ConnectionFactory> {
    executor: Arc<CommandExecutor<F>>,
}

impl<F: ConnectionFactory> RouteRepository<F> {
    pub fn new(executor: Arc<CommandExecutor<F>>) -> Self {
        Self { executor }
    }

    /// Routes currently in service. No ordering is guaranteed.
    pub async fn list_active(&self, ctx: &mut DbContext<F::Conn>) -> DbResult<Vec<Route>> {
        let command = Command::text(format!(
            "SELECT {COLUMNS} FROM Routes WHERE IsActive = @active"
        ))
        .param("active", true);
        Ok(self.executor.query(ctx, &command).await?.into_value())
    }

    pub async fn list(&self, ctx: &mut DbContext<F::Conn>) -> DbResult<Vec<Route>> {
        let command = Command::text(format!("SELECT {COLUMNS} FROM Routes ORDER BY Id"));
        Ok(self.executor.query(ctx, &command).await?.into_value())
    }

    pub async fn get(&self, ctx: &mut DbContext<F::Conn>, id: i64) -> DbResult<Option<Route>> {
        let command =
            Command::text(format!("SELECT {COLUMNS} FROM Routes WHERE Id = @id")).param("id", id);
        Ok(self
            .executor
            .query_first_or_default(ctx, &command)
            .await?
            .into_value())
    }

    /// Returns `false` if no route has that id.
    pub async fn set_active(
        &self,
        ctx: &mut DbContext<F::Conn>,
        id: i64,
        active: bool,
    ) -> DbResult<bool> {
        let command = Command::text("UPDATE Routes SET IsActive = @active WHERE Id = @id")
            .param("active", active)
            .param("id", id);
        Ok(self.executor.execute(ctx, &command).await?.into_value() > 0)
    }
}
