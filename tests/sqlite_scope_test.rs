//! End-to-end tests against a file-backed SQLite database: commit and
//! rollback through a scope, out-of-scope reads, and the repositories.

mod common;

use common::SqliteFixture;
use shipping_data::db::{
    Command, CommandExecutor, Connection, ConnectionFactory, DbContext, Ownership,
    ScopeController, ScopeState, SqlxConnectionFactory,
};
use shipping_data::error::DataAccessError;
use shipping_data::models::{NewShipment, PageRequest, ShipmentStatus, Warehouse};
use shipping_data::repository::{
    CustomerRepository, FleetRepository, RouteRepository, ShipmentRepository, WarehouseRepository,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const WAREHOUSE_3: &str = r#"SELECT Id AS "Id", Name AS "Name", City AS "City", Country AS "Country",
    MaxCapacityM3 AS "MaxCapacityM3", CurrentCapacityM3 AS "CurrentCapacityM3"
    FROM Warehouses WHERE Id = @id"#;

struct Harness {
    _fixture: SqliteFixture,
    factory: SqlxConnectionFactory,
    executor: Arc<CommandExecutor<SqlxConnectionFactory>>,
    scopes: ScopeController<SqlxConnectionFactory>,
}

async fn harness() -> Harness {
    let fixture = SqliteFixture::new().await;
    let factory = fixture.factory.clone();
    Harness {
        executor: Arc::new(CommandExecutor::new(factory.clone())),
        scopes: ScopeController::new(factory.clone()),
        factory,
        _fixture: fixture,
    }
}

async fn capacity_of(h: &Harness, id: i64) -> f64 {
    let mut ctx = DbContext::new();
    let warehouse = h
        .executor
        .query_first_or_default::<Warehouse>(&mut ctx, &Command::text(WAREHOUSE_3).param("id", id))
        .await
        .unwrap();
    assert_eq!(warehouse.ownership, Ownership::Owned);
    warehouse.value.unwrap().current_capacity_m3
}

#[tokio::test]
async fn test_rollback_after_failure_restores_capacity() {
    let h = harness().await;
    let mut ctx = DbContext::new();

    let mut handle = h.scopes.begin(&mut ctx, true).await.unwrap();
    let updated = h
        .executor
        .execute(
            &mut ctx,
            &Command::text(
                "UPDATE Warehouses SET CurrentCapacityM3 = CurrentCapacityM3 + 10 WHERE Id = 3",
            ),
        )
        .await
        .unwrap();
    assert_eq!(updated.value, 1);
    assert_eq!(updated.ownership, Ownership::Borrowed);

    // Visible inside the scope, not outside it
    let inside: f64 = h
        .executor
        .execute_scalar(
            &mut ctx,
            &Command::text("SELECT CurrentCapacityM3 FROM Warehouses WHERE Id = 3"),
        )
        .await
        .unwrap()
        .into_value();
    assert_eq!(inside, 4510.0);
    assert_eq!(capacity_of(&h, 3).await, 4500.0);

    // CHECK (CurrentCapacityM3 >= 0) rejects this one
    let err = h
        .executor
        .execute(
            &mut ctx,
            &Command::text("UPDATE Warehouses SET CurrentCapacityM3 = -1 WHERE Id = 3"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DataAccessError::CommandExecution { .. }));
    assert!(err.sql_state().is_some());

    h.scopes.rollback(&mut ctx, &mut handle).await.unwrap();
    assert_eq!(handle.state(), ScopeState::Closed);
    assert!(!ctx.is_active());

    assert_eq!(capacity_of(&h, 3).await, 4500.0);
}

#[tokio::test]
async fn test_commit_persists_changes() {
    let h = harness().await;
    let mut ctx = DbContext::new();

    let mut handle = h.scopes.begin(&mut ctx, true).await.unwrap();
    h.executor
        .execute(
            &mut ctx,
            &Command::text(
                "UPDATE Warehouses SET CurrentCapacityM3 = CurrentCapacityM3 + @delta WHERE Id = @id",
            )
            .param("delta", 10)
            .param("id", 3),
        )
        .await
        .unwrap();
    h.scopes.commit(&mut ctx, &mut handle).await.unwrap();
    assert_eq!(handle.outcome(), Some(ScopeState::Committed));

    assert_eq!(capacity_of(&h, 3).await, 4510.0);
}

#[tokio::test]
async fn test_active_routes_set_membership() {
    let h = harness().await;
    let mut ctx = DbContext::new();

    let rows = h
        .executor
        .query_rows(&mut ctx, &Command::text("SELECT * FROM Routes WHERE IsActive = 1"))
        .await
        .unwrap();
    assert_eq!(rows.ownership, Ownership::Owned);

    let ids: HashSet<i64> = rows
        .value
        .iter()
        .map(|row| row.get("Id").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(ids, HashSet::from([1, 2, 4]));
    for row in &rows.value {
        assert_eq!(row.get("IsActive"), Some(&serde_json::Value::Bool(true)));
    }

    let routes = RouteRepository::new(h.executor.clone());
    let active: HashSet<i64> = routes
        .list_active(&mut ctx)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(active, ids);
}

#[tokio::test]
async fn test_scalar_against_sqlite() {
    let h = harness().await;
    let mut ctx = DbContext::new();

    let count: i64 = h
        .executor
        .execute_scalar(&mut ctx, &Command::text("SELECT COUNT(*) FROM Routes"))
        .await
        .unwrap()
        .into_value();
    assert_eq!(count, 4);

    let null: i32 = h
        .executor
        .execute_scalar(&mut ctx, &Command::text("SELECT NULL"))
        .await
        .unwrap()
        .into_value();
    assert_eq!(null, 0);

    let missing: f64 = h
        .executor
        .execute_scalar(
            &mut ctx,
            &Command::text("SELECT MaxCapacityM3 FROM Warehouses WHERE Id = 999"),
        )
        .await
        .unwrap()
        .into_value();
    assert_eq!(missing, 0.0);
}

#[tokio::test]
async fn test_adjust_capacity_rolls_back_when_over_limit() {
    let h = harness().await;
    let warehouses = WarehouseRepository::new(h.executor.clone());
    let mut ctx = DbContext::new();

    // Lyon Central holds 2990 of 3000
    let err = h
        .scopes
        .run(&mut ctx, true, async |ctx| {
            warehouses.adjust_capacity(ctx, 2, 50.0).await
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("capacity of warehouse 2"));
    assert!(!ctx.is_active());
    assert_eq!(capacity_of(&h, 2).await, 2990.0);

    let updated = h
        .scopes
        .run(&mut ctx, true, async |ctx| {
            warehouses.adjust_capacity(ctx, 2, 5.0).await
        })
        .await
        .unwrap();
    assert_eq!(updated.current_capacity_m3, 2995.0);
    assert_eq!(capacity_of(&h, 2).await, 2995.0);
}

#[tokio::test]
async fn test_adjust_capacity_requires_transaction() {
    let h = harness().await;
    let warehouses = WarehouseRepository::new(h.executor.clone());
    let mut ctx = DbContext::new();

    let err = warehouses.adjust_capacity(&mut ctx, 1, 1.0).await.unwrap_err();
    assert!(matches!(err, DataAccessError::InvalidScopeState { .. }));

    let mut handle = h.scopes.begin(&mut ctx, false).await.unwrap();
    let err = warehouses.adjust_capacity(&mut ctx, 1, 1.0).await.unwrap_err();
    assert!(matches!(err, DataAccessError::InvalidScopeState { .. }));
    h.scopes.end(&mut ctx, &mut handle).await.unwrap();

    assert_eq!(capacity_of(&h, 1).await, 1200.0);
}

#[tokio::test]
async fn test_warehouse_listing_is_paged() {
    let h = harness().await;
    let warehouses = WarehouseRepository::new(h.executor.clone());
    let mut ctx = DbContext::new();

    let page = warehouses
        .list(&mut ctx, PageRequest::new(2, 2))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.total_pages(), 2);
    assert!(!page.has_next());
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].name, "Rotterdam Port");

    assert_eq!(warehouses.count(&mut ctx).await.unwrap(), 3);
    assert!(warehouses.get(&mut ctx, 42).await.unwrap().is_none());
}

#[tokio::test]
async fn test_route_toggle() {
    let h = harness().await;
    let routes = RouteRepository::new(h.executor.clone());
    let mut ctx = DbContext::new();

    assert!(routes.set_active(&mut ctx, 3, true).await.unwrap());
    assert!(routes.get(&mut ctx, 3).await.unwrap().unwrap().is_active);
    assert!(!routes.set_active(&mut ctx, 99, true).await.unwrap());
    assert_eq!(routes.list_active(&mut ctx).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_shipment_lifecycle() {
    let h = harness().await;
    let shipments = ShipmentRepository::new(h.executor.clone());
    let mut ctx = DbContext::new();

    let id = shipments
        .create(
            &mut ctx,
            &NewShipment {
                customer_id: 1,
                route_id: Some(2),
                tracking_number: "SHP-0001".into(),
                weight_kg: 12.5,
            },
        )
        .await
        .unwrap();
    shipments
        .create(
            &mut ctx,
            &NewShipment {
                customer_id: 1,
                route_id: None,
                tracking_number: "SHP-0002".into(),
                weight_kg: 3.0,
            },
        )
        .await
        .unwrap();

    let shipment = shipments.get(&mut ctx, id).await.unwrap().unwrap();
    assert_eq!(shipment.status, ShipmentStatus::Pending);
    assert_eq!(shipment.route_id, Some(2));
    assert_eq!(shipment.weight_kg, 12.5);
    assert!(shipment.delivered_at.is_none());

    assert!(
        shipments
            .update_status(&mut ctx, id, ShipmentStatus::Delivered)
            .await
            .unwrap()
    );
    let delivered = shipments.get(&mut ctx, id).await.unwrap().unwrap();
    assert_eq!(delivered.status, ShipmentStatus::Delivered);
    assert!(delivered.delivered_at.is_some());

    // Delivered is final
    assert!(
        !shipments
            .update_status(&mut ctx, id, ShipmentStatus::InTransit)
            .await
            .unwrap()
    );

    let page = shipments
        .list_for_customer(&mut ctx, 1, PageRequest::new(1, 1))
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert!(page.has_next());
}

#[tokio::test]
async fn test_duplicate_tracking_number_rolls_back_whole_scope() {
    let h = harness().await;
    let shipments = ShipmentRepository::new(h.executor.clone());
    let mut ctx = DbContext::new();

    let new = |tracking: &str| NewShipment {
        customer_id: 1,
        route_id: None,
        tracking_number: tracking.into(),
        weight_kg: 1.0,
    };

    let err = h
        .scopes
        .run(&mut ctx, true, async |ctx| {
            shipments.create(ctx, &new("SHP-A")).await?;
            shipments.create(ctx, &new("SHP-A")).await?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DataAccessError::CommandExecution { .. }));

    let count: i64 = h
        .executor
        .execute_scalar(&mut ctx, &Command::text("SELECT COUNT(*) FROM Shipments"))
        .await
        .unwrap()
        .into_value();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_connection_dropped_mid_transaction_is_discarded() {
    let h = harness().await;

    let mut conn = h.factory.create_connection().unwrap();
    conn.open().await.unwrap();
    conn.begin().await.unwrap();
    conn.execute(&Command::text(
        "UPDATE Warehouses SET CurrentCapacityM3 = 0 WHERE Id = 1",
    ))
    .await
    .unwrap();
    drop(conn);

    assert_eq!(capacity_of(&h, 1).await, 1200.0);
}

#[tokio::test]
async fn test_undecodable_scalar_is_a_conversion_error() {
    let h = harness().await;
    let mut ctx = DbContext::new();
    h.executor
        .execute(
            &mut ctx,
            &Command::text("CREATE TABLE Pallets (Id INTEGER PRIMARY KEY, Pieces INTEGER)"),
        )
        .await
        .unwrap();
    h.executor
        .execute(
            &mut ctx,
            &Command::text("INSERT INTO Pallets (Id, Pieces) VALUES (1, 12.5), (2, NULL)"),
        )
        .await
        .unwrap();

    let pieces = Command::text("SELECT Pieces FROM Pallets WHERE Id = @id").param("id", 1);
    let err = h
        .executor
        .execute_scalar::<f64>(&mut ctx, &pieces)
        .await
        .unwrap_err();
    assert!(matches!(err, DataAccessError::Conversion { .. }));
    let err = h
        .executor
        .execute_scalar::<String>(&mut ctx, &pieces)
        .await
        .unwrap_err();
    assert!(matches!(err, DataAccessError::Conversion { .. }));
    assert!(h.executor.query_rows(&mut ctx, &pieces).await.is_err());

    // Only a real NULL falls back to the default
    let missing: i64 = h
        .executor
        .execute_scalar(&mut ctx, &Command::text("SELECT Pieces FROM Pallets WHERE Id = 2"))
        .await
        .unwrap()
        .into_value();
    assert_eq!(missing, 0);
    assert!(!ctx.is_active());
}

#[tokio::test]
async fn test_dropped_run_leaves_capacity_untouched() {
    let h = harness().await;
    let mut ctx = DbContext::new();
    let executor = h.executor.clone();

    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        h.scopes.run(&mut ctx, true, async |ctx| {
            executor
                .execute(
                    ctx,
                    &Command::text(
                        "UPDATE Warehouses SET CurrentCapacityM3 = CurrentCapacityM3 + 10 WHERE Id = 3",
                    ),
                )
                .await?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }),
    )
    .await;
    assert!(outcome.is_err());
    assert!(!ctx.is_active());
    assert_eq!(capacity_of(&h, 3).await, 4500.0);

    // The abandoned transaction no longer holds the write lock
    h.scopes
        .run(&mut ctx, true, async |ctx| {
            executor
                .execute(
                    ctx,
                    &Command::text(
                        "UPDATE Warehouses SET CurrentCapacityM3 = CurrentCapacityM3 + 5 WHERE Id = 3",
                    ),
                )
                .await
                .map(|_| ())
        })
        .await
        .unwrap();
    assert_eq!(capacity_of(&h, 3).await, 4505.0);
}

#[tokio::test]
async fn test_customer_lookup_decodes_nullable_phone_and_timestamp() {
    let h = harness().await;
    let customers = CustomerRepository::new(h.executor.clone());
    let mut ctx = DbContext::new();

    let acme = customers.get(&mut ctx, 1).await.unwrap().unwrap();
    assert_eq!(acme.name, "Acme Freight");
    assert_eq!(acme.phone, None);
    assert_eq!(acme.created_at.to_string(), "2024-01-05 09:00:00");

    let by_email = customers
        .find_by_email(&mut ctx, "OPS@ACME.TEST")
        .await
        .unwrap();
    assert_eq!(by_email, Some(acme));
    assert!(customers.get(&mut ctx, 99).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fleet_reads_vehicles_and_active_drivers() {
    let h = harness().await;
    let fleet = FleetRepository::new(h.executor.clone());
    let mut ctx = DbContext::new();

    let at_hamburg = fleet.vehicles_at(&mut ctx, 1).await.unwrap();
    let plates: Vec<_> = at_hamburg
        .iter()
        .map(|v| v.registration_number.as_str())
        .collect();
    assert_eq!(plates, ["HH-LG 101", "LY-77-XZ"]);
    assert_eq!(at_hamburg[1].capacity_kg, 24000.0);

    let van = fleet.vehicles_at(&mut ctx, 3).await.unwrap();
    assert_eq!(van.len(), 1);
    assert_eq!(van[0].kind, "Van");
    assert_eq!(van[0].capacity_kg, 3500.5);
    assert_eq!(van[0].warehouse_id, Some(3));

    let active = fleet.active_drivers(&mut ctx).await.unwrap();
    let names: Vec<_> = active.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["Mila Novak", "Tomas Berg"]);
    assert!(active.iter().all(|d| d.is_active));
    assert_eq!(active[1].vehicle_id, None);
}

#[tokio::test]
async fn test_driver_assignment_follows_the_scope_outcome() {
    let h = harness().await;
    let fleet = FleetRepository::new(h.executor.clone());
    let mut ctx = DbContext::new();

    let err = h
        .scopes
        .run(&mut ctx, true, async |ctx| {
            assert!(fleet.assign_driver(ctx, 2, Some(3)).await?);
            Err::<(), _>(DataAccessError::command("dispatch cancelled"))
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("dispatch cancelled"));
    let tomas = fleet.driver(&mut ctx, 2).await.unwrap().unwrap();
    assert_eq!(tomas.vehicle_id, None);

    h.scopes
        .run(&mut ctx, true, async |ctx| {
            fleet.assign_driver(ctx, 2, Some(3)).await?;
            fleet.assign_driver(ctx, 1, None).await
        })
        .await
        .unwrap();
    assert_eq!(fleet.driver(&mut ctx, 2).await.unwrap().unwrap().vehicle_id, Some(3));
    assert_eq!(fleet.driver(&mut ctx, 1).await.unwrap().unwrap().vehicle_id, None);
    assert!(!fleet.assign_driver(&mut ctx, 42, None).await.unwrap());
}

#[tokio::test]
async fn test_shipment_packages_in_insertion_order() {
    let h = harness().await;
    let shipments = ShipmentRepository::new(h.executor.clone());
    let mut ctx = DbContext::new();

    let id = shipments
        .create(
            &mut ctx,
            &NewShipment {
                customer_id: 1,
                route_id: Some(1),
                tracking_number: "SHP-PKG".into(),
                weight_kg: 14.0,
            },
        )
        .await
        .unwrap();
    h.executor
        .execute(
            &mut ctx,
            &Command::text(
                "INSERT INTO Packages (ShipmentId, Description, WeightKg, LengthCm, WidthCm, HeightCm) \
                 VALUES (@id, 'Brake pads', 9.25, 40, 30, 20.5), (@id, 'Manuals', 4.75, 30, 21, 5)",
            )
            .param("id", id),
        )
        .await
        .unwrap();

    let packages = shipments.packages(&mut ctx, id).await.unwrap();
    assert_eq!(packages.len(), 2);
    assert_eq!(packages[0].description, "Brake pads");
    assert_eq!(packages[0].weight_kg, 9.25);
    assert_eq!(packages[0].height_cm, 20.5);
    assert_eq!(packages[1].length_cm, 30.0);
    assert!(packages.iter().all(|p| p.shipment_id == id));
    assert!(shipments.packages(&mut ctx, id + 1).await.unwrap().is_empty());
}
