use crate::db::{Command, CommandExecutor, ConnectionFactory, DbContext, ParamValue};
use crate::error::{DataAccessError, DbResult};
use crate::models::{NewShipment, Package, Page, PageRequest, Shipment, ShipmentStatus};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

const COLUMNS: &str = r#"Id AS "Id", CustomerId AS "CustomerId", RouteId AS "RouteId",
    TrackingNumber AS "TrackingNumber", Status AS "Status", WeightKg AS "WeightKg",
    CreatedAt AS "CreatedAt", DeliveredAt AS "DeliveredAt""#;

const PACKAGE_COLUMNS: &str = r#"Id AS "Id", ShipmentId AS "ShipmentId",
    Description AS "Description", WeightKg AS "WeightKg", LengthCm AS "LengthCm",
    WidthCm AS "WidthCm", HeightCm AS "HeightCm""#;

pub struct ShipmentRepository<F: ConnectionFactory> {
    executor: Arc<CommandExecutor<F>>,
}

impl<F: ConnectionFactory> ShipmentRepository<F> {
    pub fn new(executor: Arc<CommandExecutor<F>>) -> Self {
        Self { executor }
    }

    pub async fn get(&self, ctx: &mut DbContext<F::Conn>, id: i64) -> DbResult<Option<Shipment>> {
        let command =
            Command::text(format!("SELECT {COLUMNS} FROM Shipments WHERE Id = @id")).param("id", id);
        Ok(self
            .executor
            .query_first_or_default(ctx, &command)
            .await?
            .into_value())
    }

    /// A customer's shipments, newest first.
    pub async fn list_for_customer(
        &self,
        ctx: &mut DbContext<F::Conn>,
        customer_id: i64,
        page: PageRequest,
    ) -> DbResult<Page<Shipment>> {
        let count = Command::text("SELECT COUNT(*) FROM Shipments WHERE CustomerId = @customer")
            .param("customer", customer_id);
        let total: u64 = self.executor.execute_scalar(ctx, &count).await?.into_value();

        let command = Command::text(format!(
            "SELECT {COLUMNS} FROM Shipments WHERE CustomerId = @customer \
             ORDER BY CreatedAt DESC, Id DESC {}",
            page.paging_clause()
        ))
        .param("customer", customer_id);
        let items = self.executor.query(ctx, &command).await?.into_value();
        Ok(Page::new(items, page, total))
    }

    /// Insert a pending shipment and return its id.
    ///
    /// The id is looked up by tracking number afterwards, which works the same
    /// in every dialect and on a private connection.
    pub async fn create(&self, ctx: &mut DbContext<F::Conn>, shipment: &NewShipment) -> DbResult<i64> {
        // Leave RouteId out when unset; an untyped NULL parameter is rejected
        // by PostgreSQL for integer columns.
        let (route_column, route_value) = match shipment.route_id {
            Some(_) => (", RouteId", ", @route"),
            None => ("", ""),
        };
        let insert = Command::text(format!(
            "INSERT INTO Shipments (CustomerId, TrackingNumber, Status, WeightKg, CreatedAt{route_column}) \
             VALUES (@customer, @tracking, @status, @weight, @created{route_value})"
        ))
        .param("customer", shipment.customer_id)
        .param("tracking", shipment.tracking_number.as_str())
        .param("status", ShipmentStatus::Pending.as_str())
        .param("weight", shipment.weight_kg)
        .param("created", ParamValue::Timestamp(Utc::now().naive_utc()));
        let insert = match shipment.route_id {
            Some(route_id) => insert.param("route", route_id),
            None => insert,
        };
        self.executor.execute(ctx, &insert).await?;

        let lookup = Command::text("SELECT Id FROM Shipments WHERE TrackingNumber = @tracking")
            .param("tracking", shipment.tracking_number.as_str());
        let id: Option<i64> = self.executor.execute_scalar(ctx, &lookup).await?.into_value();
        let id = id.ok_or_else(|| {
            DataAccessError::command(format!(
                "shipment {} was not found after insert",
                shipment.tracking_number
            ))
        })?;

        info!(
            shipment_id = id,
            tracking_number = %shipment.tracking_number,
            "Shipment created"
        );
        Ok(id)
    }

    /// Move a shipment to `status`. Delivered and cancelled shipments are
    /// final; returns `false` if the shipment is missing or already final.
    pub async fn update_status(
        &self,
        ctx: &mut DbContext<F::Conn>,
        id: i64,
        status: ShipmentStatus,
    ) -> DbResult<bool> {
        let delivered = if status == ShipmentStatus::Delivered {
            "@delivered"
        } else {
            "NULL"
        };
        let command = Command::text(format!(
            "UPDATE Shipments SET Status = @status, DeliveredAt = {delivered} \
             WHERE Id = @id AND Status NOT IN ('Delivered', 'Cancelled')"
        ))
        .param("status", status.as_str())
        .param("delivered", Utc::now().naive_utc())
        .param("id", id);
        let affected = self.executor.execute(ctx, &command).await?.into_value();
        Ok(affected > 0)
    }

    pub async fn packages(
        &self,
        ctx: &mut DbContext<F::Conn>,
        shipment_id: i64,
    ) -> DbResult<Vec<Package>> {
        let command = Command::text(format!(
            "SELECT {PACKAGE_COLUMNS} FROM Packages WHERE ShipmentId = @shipment ORDER BY Id"
        ))
        .param("shipment", shipment_id);
        Ok(self.executor.query(ctx, &command).await?.into_value())
    }
}
