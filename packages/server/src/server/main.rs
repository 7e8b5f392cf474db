// Main entry point for API server

use anyhow::{Context, Result};
use numbering::NumberingEngine;
use server_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,numbering=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting entity numbering API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let numbering_config = config.numbering_config()?;
    tracing::info!(
        entity_types = numbering_config.entity_types().count(),
        lock_timeout_ms = numbering_config.lock_timeout().as_millis() as u64,
        max_attempts = numbering_config.max_attempts(),
        "Configuration loaded"
    );

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    numbering::stores::postgres::ensure_schema(&pool)
        .await
        .context("Failed to create numbering counter table")?;
    tracing::info!("Migrations complete");

    // Build application
    let app = build_app(pool, NumberingEngine::new(numbering_config.into_shared()));

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
