//! Test harness with testcontainers for integration testing.
//!
//! Uses one shared Postgres container across all tests. The container and
//! migrations are initialized once on first test, then reused.

use anyhow::{Context, Result};
use numbering::{NumberingConfig, NumberingEngine, NumberingRule};
use server_core::domains::products::models::{NUMBER_FIELD, PRODUCT_ENTITY};
use sqlx::PgPool;
use std::time::Duration;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    // Keep container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=numbering=debug cargo test -- --ignored --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        numbering::stores::postgres::ensure_schema(&pool)
            .await
            .context("Failed to create numbering counter table")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Per-test context over the shared database.
///
/// Counters persist across tests, so every harness numbers products within
/// its own branch: the rule is scoped by `branch` and `branch` is unique.
pub struct TestHarness {
    pub db_pool: PgPool,
    pub branch: String,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;

        Ok(Self {
            db_pool,
            branch: format!("branch-{}", Uuid::new_v4()),
        })
    }

    /// Engine numbering products per branch: `Prefix-100`, `Prefix-105`, ...
    pub fn engine(&self, lock_timeout: Duration) -> NumberingEngine {
        let config = NumberingConfig::builder()
            .rule(
                PRODUCT_ENTITY,
                NumberingRule::builder()
                    .field_name(NUMBER_FIELD)
                    .scope_fields(vec!["branch".to_string()])
                    .prefix("Prefix-")
                    .start(100)
                    .increment_by(5)
                    .build(),
            )
            .lock_timeout(lock_timeout)
            .build()
            .expect("valid numbering config");
        NumberingEngine::new(config.into_shared())
    }
}
