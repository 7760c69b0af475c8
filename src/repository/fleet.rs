use crate::db::{Command, CommandExecutor, ConnectionFactory, DbContext};
use crate::error::DbResult;
use crate::models::{Driver, Vehicle};
use std::sync::Arc;
use tracing::info;

const VEHICLE_COLUMNS: &str = r#"Id AS "Id", RegistrationNumber AS "RegistrationNumber",
    Kind AS "Kind", CapacityKg AS "CapacityKg", WarehouseId AS "WarehouseId""#;

const DRIVER_COLUMNS: &str = r#"Id AS "Id", Name AS "Name", LicenseNumber AS "LicenseNumber",
    VehicleId AS "VehicleId", IsActive AS "IsActive""#;

/// Vehicles and the drivers assigned to them.
pub struct FleetRepository<F: ConnectionFactory> {
    executor: Arc<CommandExecutor<F>>,
}

impl<F: ConnectionFactory> FleetRepository<F> {
    pub fn new(executor: Arc<CommandExecutor<F>>) -> Self {
        Self { executor }
    }

    pub async fn vehicles_at(
        &self,
        ctx: &mut DbContext<F::Conn>,
        warehouse_id: i64,
    ) -> DbResult<Vec<Vehicle>> {
        let command = Command::text(format!(
            "SELECT {VEHICLE_COLUMNS} FROM Vehicles WHERE WarehouseId = @warehouse ORDER BY Id"
        ))
        .param("warehouse", warehouse_id);
        Ok(self.executor.query(ctx, &command).await?.into_value())
    }

    pub async fn active_drivers(&self, ctx: &mut DbContext<F::Conn>) -> DbResult<Vec<Driver>> {
        let command = Command::text(format!(
            "SELECT {DRIVER_COLUMNS} FROM Drivers WHERE IsActive = @active ORDER BY Id"
        ))
        .param("active", true);
        Ok(self.executor.query(ctx, &command).await?.into_value())
    }

    pub async fn driver(&self, ctx: &mut DbContext<F::Conn>, id: i64) -> DbResult<Option<Driver>> {
        let command = Command::text(format!("SELECT {DRIVER_COLUMNS} FROM Drivers WHERE Id = @id"))
            .param("id", id);
        Ok(self
            .executor
            .query_first_or_default(ctx, &command)
            .await?
            .into_value())
    }

    /// Put a driver on a vehicle, or take them off any vehicle with `None`.
    /// Returns `false` if no driver has that id.
    pub async fn assign_driver(
        &self,
        ctx: &mut DbContext<F::Conn>,
        driver_id: i64,
        vehicle_id: Option<i64>,
    ) -> DbResult<bool> {
        let command = match vehicle_id {
            Some(vehicle_id) => {
                Command::text("UPDATE Drivers SET VehicleId = @vehicle WHERE Id = @id")
                    .param("vehicle", vehicle_id)
            }
            None => Command::text("UPDATE Drivers SET VehicleId = NULL WHERE Id = @id"),
        }
        .param("id", driver_id);

        let assigned = self.executor.execute(ctx, &command).await?.into_value() > 0;
        if assigned {
            info!(driver_id, vehicle_id = ?vehicle_id, "Driver assignment changed");
        }
        Ok(assigned)
    }
}
