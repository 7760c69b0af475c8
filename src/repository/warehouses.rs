use crate::db::{Command, CommandExecutor, ConnectionFactory, DbContext};
use crate::error::{DataAccessError, DbResult};
use crate::models::{Page, PageRequest, Warehouse};
use crate::repository::require_transaction;
use std::sync::Arc;
use tracing::info;

const COLUMNS: &str = r#"Id AS "Id", Name AS "Name", City AS "City", Country AS "Country",
    MaxCapacityM3 AS "MaxCapacityM3", CurrentCapacityM3 AS "CurrentCapacityM3""#;

pub struct WarehouseRepository<F: ConnectionFactory> {
    executor: Arc<CommandExecutor<F>>,
}

impl<F: ConnectionFactory> WarehouseRepository<F> {
    pub fn new(executor: Arc<CommandExecutor<F>>) -> Self {
        Self { executor }
    }

    pub async fn get(&self, ctx: &mut DbContext<F::Conn>, id: i64) -> DbResult<Option<Warehouse>> {
        let command =
            Command::text(format!("SELECT {COLUMNS} FROM Warehouses WHERE Id = @id")).param("id", id);
        Ok(self
            .executor
            .query_first_or_default(ctx, &command)
            .await?
            .into_value())
    }

    pub async fn count(&self, ctx: &mut DbContext<F::Conn>) -> DbResult<u64> {
        let command = Command::text("SELECT COUNT(*) FROM Warehouses");
        Ok(self.executor.execute_scalar(ctx, &command).await?.into_value())
    }

    pub async fn list(
        &self,
        ctx: &mut DbContext<F::Conn>,
        page: PageRequest,
    ) -> DbResult<Page<Warehouse>> {
        let total = self.count(ctx).await?;
        let command = Command::text(format!(
            "SELECT {COLUMNS} FROM Warehouses ORDER BY Id {}",
            page.paging_clause()
        ));
        let items = self.executor.query(ctx, &command).await?.into_value();
        Ok(Page::new(items, page, total))
    }

    /// Add `delta_m3` to the warehouse's current capacity and return the
    /// updated row.
    ///
    /// Must run inside a transactional scope: the update is applied first and
    /// the result checked afterwards, so a capacity violation leaves the
    /// change in the transaction for the caller to roll back.
    pub async fn adjust_capacity(
        &self,
        ctx: &mut DbContext<F::Conn>,
        id: i64,
        delta_m3: f64,
    ) -> DbResult<Warehouse> {
        require_transaction(ctx, "adjust_capacity")?;

        let command = Command::text(
            "UPDATE Warehouses SET CurrentCapacityM3 = CurrentCapacityM3 + @delta WHERE Id = @id",
        )
        .param("delta", delta_m3)
        .param("id", id);
        let affected = self.executor.execute(ctx, &command).await?.into_value();
        if affected == 0 {
            return Err(DataAccessError::command(format!("warehouse {id} not found")));
        }

        let warehouse = self
            .get(ctx, id)
            .await?
            .ok_or_else(|| DataAccessError::command(format!("warehouse {id} not found")))?;
        if warehouse.current_capacity_m3 < 0.0
            || warehouse.current_capacity_m3 > warehouse.max_capacity_m3
        {
            return Err(DataAccessError::command(format!(
                "capacity of warehouse {id} would be {:.2} m3, outside 0..={:.2}",
                warehouse.current_capacity_m3, warehouse.max_capacity_m3
            )));
        }

        info!(
            warehouse_id = id,
            delta_m3,
            current_m3 = warehouse.current_capacity_m3,
            "Warehouse capacity adjusted"
        );
        Ok(warehouse)
    }
}
