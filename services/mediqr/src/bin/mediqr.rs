//! services/mediqr/src/bin/mediqr.rs

use mediqr_lib::{
    adapters::db::SqliteKvAdapter,
    config::Config,
    console::{run_console, AppState},
    error::AppError,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    // Stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. Starting MediQR...");

    // --- 2. Open the Store & Run Migrations ---
    info!("Opening database at {}", config.database_url);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(SqliteKvAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Build the Shared AppState ---
    let app_state = AppState::new(db_adapter, config.clone());

    // --- 4. Serve the Console ---
    info!("Reading requests from stdin.");
    run_console(app_state, tokio::io::stdin(), tokio::io::stdout()).await?;

    db_pool.close().await;
    Ok(())
}
