//! Shared test doubles and fixtures.

#![allow(dead_code)]

use shipping_data::db::{
    Command, Connection, ConnectionFactory, ConnectionState, DatabaseType, Row,
    SqlxConnectionFactory,
};
use shipping_data::config::DatabaseConfig;
use shipping_data::error::{DataAccessError, DbResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// What a fake connection answers to a command.
#[derive(Debug, Clone)]
pub enum Reply {
    Rows(Vec<Row>),
    Affected(u64),
    Fail(String),
}

type Responder = Arc<dyn Fn(&Command) -> Reply + Send + Sync>;

/// Counters and log shared by every connection of one [`FakeFactory`].
#[derive(Default)]
pub struct FakeState {
    pub created: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub begun: AtomicUsize,
    pub committed: AtomicUsize,
    pub rolled_back: AtomicUsize,
    pub abandoned: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fail_commit: AtomicBool,
    delay_ms: AtomicUsize,
    next_id: AtomicUsize,
    log: Mutex<Vec<(usize, String)>>,
    responder: Mutex<Option<Responder>>,
}

impl FakeState {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.rolled_back.load(Ordering::SeqCst)
    }

    /// Connections dropped while still open, without `close`.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Every call made on connection `id`, in order.
    pub fn calls_on(&self, id: usize) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(conn, _)| *conn == id)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn log(&self) -> Vec<(usize, String)> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, id: usize, call: impl Into<String>) {
        self.log.lock().unwrap().push((id, call.into()));
    }

    fn reply(&self, command: &Command) -> Reply {
        let responder = self.responder.lock().unwrap().clone();
        match responder {
            Some(f) => f(command),
            None => Reply::Rows(Vec::new()),
        }
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::SeqCst) as u64)
    }
}

/// Connection factory whose connections only record what is done to them.
#[derive(Clone, Default)]
pub struct FakeFactory {
    pub state: Arc<FakeState>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command with `f`.
    pub fn respond_with(&self, f: impl Fn(&Command) -> Reply + Send + Sync + 'static) {
        *self.state.responder.lock().unwrap() = Some(Arc::new(f));
    }

    /// Make every command take `delay` before answering.
    pub fn with_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }
}

impl ConnectionFactory for FakeFactory {
    type Conn = FakeConnection;

    fn provider(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn create_connection(&self) -> DbResult<FakeConnection> {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            open: false,
            in_transaction: false,
            state: self.state.clone(),
        })
    }
}

#[derive(Debug)]
pub struct FakeConnection {
    pub id: usize,
    open: bool,
    in_transaction: bool,
    state: Arc<FakeState>,
}

impl std::fmt::Debug for FakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeState")
            .field("opened", &self.opened())
            .field("closed", &self.closed())
            .finish()
    }
}

impl FakeConnection {
    fn ensure_open(&self) -> DbResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DataAccessError::connection("fake connection is not open"))
        }
    }

    async fn answer(&mut self, kind: &str, command: &Command) -> DbResult<Reply> {
        self.ensure_open()?;
        self.state
            .record(self.id, format!("{kind}: {}", command.sql()));
        let delay = self.state.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.state.reply(command) {
            Reply::Fail(message) => Err(DataAccessError::command(message)),
            reply => Ok(reply),
        }
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        if self.open {
            self.state.abandoned.fetch_add(1, Ordering::SeqCst);
            self.state.record(self.id, "abandoned");
        }
    }
}

impl Connection for FakeConnection {
    fn state(&self) -> ConnectionState {
        if self.open {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn open(&mut self) -> DbResult<()> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(DataAccessError::connection("refused"));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.record(self.id, "open");
        self.open = true;
        Ok(())
    }

    async fn close(mut self) -> DbResult<()> {
        self.open = false;
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        self.state.record(self.id, "close");
        Ok(())
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        self.state.begun.fetch_add(1, Ordering::SeqCst);
        self.state.record(self.id, "begin");
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        if self.state.fail_commit.load(Ordering::SeqCst) {
            return Err(DataAccessError::command("commit refused"));
        }
        self.state.committed.fetch_add(1, Ordering::SeqCst);
        self.state.record(self.id, "commit");
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        self.state.rolled_back.fetch_add(1, Ordering::SeqCst);
        self.state.record(self.id, "rollback");
        self.in_transaction = false;
        Ok(())
    }

    async fn fetch_all(&mut self, command: &Command) -> DbResult<Vec<Row>> {
        match self.answer("fetch_all", command).await? {
            Reply::Rows(rows) => Ok(rows),
            _ => Ok(Vec::new()),
        }
    }

    async fn fetch_optional(&mut self, command: &Command) -> DbResult<Option<Row>> {
        match self.answer("fetch_optional", command).await? {
            Reply::Rows(rows) => Ok(rows.into_iter().next()),
            _ => Ok(None),
        }
    }

    async fn execute(&mut self, command: &Command) -> DbResult<u64> {
        match self.answer("execute", command).await? {
            Reply::Affected(n) => Ok(n),
            _ => Ok(0),
        }
    }
}

/// A file-backed SQLite database seeded with the shipping schema.
pub struct SqliteFixture {
    pub factory: SqlxConnectionFactory,
    _dir: TempDir,
}

pub const SCHEMA: &str = r#"
CREATE TABLE Customers (
    Id INTEGER PRIMARY KEY,
    Name TEXT NOT NULL,
    Email TEXT NOT NULL,
    Phone TEXT,
    CreatedAt DATETIME NOT NULL
);
CREATE TABLE Warehouses (
    Id INTEGER PRIMARY KEY,
    Name TEXT NOT NULL,
    City TEXT NOT NULL,
    Country TEXT NOT NULL,
    MaxCapacityM3 DECIMAL(10,2) NOT NULL,
    CurrentCapacityM3 DECIMAL(10,2) NOT NULL CHECK (CurrentCapacityM3 >= 0)
);
CREATE TABLE Routes (
    Id INTEGER PRIMARY KEY,
    Name TEXT NOT NULL,
    OriginWarehouseId INTEGER NOT NULL REFERENCES Warehouses(Id),
    DestinationWarehouseId INTEGER NOT NULL REFERENCES Warehouses(Id),
    DistanceKm DECIMAL(10,1) NOT NULL,
    IsActive BOOLEAN NOT NULL
);
CREATE TABLE Shipments (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    CustomerId INTEGER NOT NULL REFERENCES Customers(Id),
    RouteId INTEGER REFERENCES Routes(Id),
    TrackingNumber TEXT NOT NULL UNIQUE,
    Status TEXT NOT NULL,
    WeightKg DECIMAL(10,2) NOT NULL,
    CreatedAt DATETIME NOT NULL,
    DeliveredAt DATETIME
);
CREATE TABLE Packages (
    Id INTEGER PRIMARY KEY,
    ShipmentId INTEGER NOT NULL REFERENCES Shipments(Id),
    Description TEXT NOT NULL,
    WeightKg DECIMAL(10,2) NOT NULL,
    LengthCm DECIMAL(10,1) NOT NULL,
    WidthCm DECIMAL(10,1) NOT NULL,
    HeightCm DECIMAL(10,1) NOT NULL
);
CREATE TABLE Vehicles (
    Id INTEGER PRIMARY KEY,
    RegistrationNumber TEXT NOT NULL UNIQUE,
    Kind TEXT NOT NULL,
    CapacityKg DECIMAL(10,2) NOT NULL,
    WarehouseId INTEGER REFERENCES Warehouses(Id)
);
CREATE TABLE Drivers (
    Id INTEGER PRIMARY KEY,
    Name TEXT NOT NULL,
    LicenseNumber TEXT NOT NULL,
    VehicleId INTEGER REFERENCES Vehicles(Id),
    IsActive BOOLEAN NOT NULL
);
INSERT INTO Customers VALUES (1, 'Acme Freight', 'ops@acme.test', NULL, '2024-01-05 09:00:00');
INSERT INTO Warehouses VALUES
    (1, 'Hamburg North', 'Hamburg', 'DE', 5000, 1200),
    (2, 'Lyon Central', 'Lyon', 'FR', 3000, 2990),
    (3, 'Rotterdam Port', 'Rotterdam', 'NL', 8000, 4500);
INSERT INTO Routes VALUES
    (1, 'Hamburg-Rotterdam', 1, 3, 465.0, 1),
    (2, 'Rotterdam-Lyon', 3, 2, 980.5, 1),
    (3, 'Lyon-Hamburg', 2, 1, 1110.0, 0),
    (4, 'Hamburg-Lyon', 1, 2, 1100.0, 1);
INSERT INTO Vehicles VALUES
    (1, 'HH-LG 101', 'Truck', 18000, 1),
    (2, 'RT-AB 22', 'Van', 3500.50, 3),
    (3, 'LY-77-XZ', 'Truck', 24000, 1);
INSERT INTO Drivers VALUES
    (1, 'Mila Novak', 'DL-4471', 1, 1),
    (2, 'Tomas Berg', 'DL-9902', NULL, 1),
    (3, 'Ana Ruiz', 'DL-1208', 2, 0);
"#;

impl SqliteFixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipping.db");
        let url = format!("sqlite:{}?max_connections=4", path.display());
        let config = DatabaseConfig::parse(&url).unwrap();
        let factory = SqlxConnectionFactory::connect(&config).await.unwrap();

        let mut conn = factory.create_connection().unwrap();
        conn.open().await.unwrap();
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            conn.execute(&Command::text(statement)).await.unwrap();
        }
        conn.close().await.unwrap();

        Self {
            factory,
            _dir: dir,
        }
    }
}
