//! Shipping data CLI - Main entry point.
//!
//! Runs one data-access flow against the configured database and prints the
//! result as JSON on stdout. Logs go to stderr.

use clap::Parser;
use shipping_data::config::{Commands, Config};
use shipping_data::db::{
    CommandExecutor, DbContext, ScopeController, SqlxConnection, SqlxConnectionFactory,
};
use shipping_data::error::DbResult;
use shipping_data::models::PageRequest;
use shipping_data::repository::{RouteRepository, ShipmentRepository, WarehouseRepository};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run_command(
    command: &Commands,
    factory: SqlxConnectionFactory,
    executor: Arc<CommandExecutor<SqlxConnectionFactory>>,
    ctx: &mut DbContext<SqlxConnection>,
) -> DbResult<serde_json::Value> {
    let to_json = |v: serde_json::Result<serde_json::Value>| {
        v.map_err(|e| shipping_data::DataAccessError::conversion("json", e.to_string()))
    };

    match command {
        Commands::Warehouses { page, page_size } => {
            let repo = WarehouseRepository::new(executor);
            let page = repo.list(ctx, PageRequest::new(*page, *page_size)).await?;
            to_json(serde_json::to_value(page))
        }
        Commands::Routes { active } => {
            let repo = RouteRepository::new(executor);
            let routes = if *active {
                repo.list_active(ctx).await?
            } else {
                repo.list(ctx).await?
            };
            to_json(serde_json::to_value(routes))
        }
        Commands::Shipments {
            customer,
            page,
            page_size,
        } => {
            let repo = ShipmentRepository::new(executor);
            let page = repo
                .list_for_customer(ctx, *customer, PageRequest::new(*page, *page_size))
                .await?;
            to_json(serde_json::to_value(page))
        }
        Commands::AdjustCapacity { warehouse, delta } => {
            let repo = WarehouseRepository::new(executor);
            let scopes = ScopeController::new(factory);
            let updated = scopes
                .run(ctx, true, async |ctx| {
                    repo.adjust_capacity(ctx, *warehouse, *delta).await
                })
                .await?;
            to_json(serde_json::to_value(updated))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!("Starting shipping-data v{}", env!("CARGO_PKG_VERSION"));

    let db_config = config.parse_database()?;
    let factory = SqlxConnectionFactory::connect(&db_config).await?;
    if let Some(version) = factory.pool().server_version().await {
        info!(db_type = %db_config.db_type, version = %version, "Connected");
    }

    let executor = Arc::new(CommandExecutor::with_timeout(
        factory.clone(),
        config.command_timeout_duration(),
    ));

    // Ctrl-C cancels whatever command is in flight
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let mut ctx = DbContext::new().with_cancellation(cancel);
    let result = run_command(&config.command, factory.clone(), executor, &mut ctx).await;
    drop(ctx);
    factory.pool().close().await;

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            Err(e.into())
        }
    }
}
