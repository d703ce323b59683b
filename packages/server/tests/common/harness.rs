//! Test harness with testcontainers for integration testing.
//!
//! One Postgres container is shared across the whole test run; each test
//! gets its own freshly-migrated database inside it, so tests can run in
//! parallel without their queue claims interfering.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use keepsake_core::domains::accounts::TokenManager;
use keepsake_core::kernel::{Kernel, TestDependencies};

/// Shared container that persists across all tests.
struct SharedTestInfra {
    admin_url: String,
    host: String,
    port: u16,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Respect RUST_LOG; try_init() because multiple tests race here.
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

        let host = postgres.get_host().await?.to_string();
        let port = postgres.get_host_port_ipv4(5432).await?;
        let admin_url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        Ok(Self {
            admin_url,
            host,
            port,
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

/// Per-test context: a private database on the shared container, a kernel
/// wired to in-memory fakes, and a token manager.
pub struct TestHarness {
    pub db_pool: PgPool,
    pub deps: TestDependencies,
    pub kernel: Arc<Kernel>,
    pub tokens: Arc<TokenManager>,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        // Database pool is automatically dropped; the throwaway database
        // stays behind in the shared container, which is itself discarded.
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        // Private database per test so parallel tests never claim each
        // other's queue rows.
        let db_name = format!("test_{}", Uuid::new_v4().simple());
        let admin = PgPool::connect(&infra.admin_url)
            .await
            .context("Failed to connect to admin database")?;
        sqlx::query(&format!(r#"CREATE DATABASE "{}""#, db_name))
            .execute(&admin)
            .await
            .context("Failed to create test database")?;
        admin.close().await;

        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/{}",
            infra.host, infra.port, db_name
        );
        let db_pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to test database")?;

        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run migrations")?;

        let deps = TestDependencies::new();
        let kernel = deps.kernel(db_pool.clone());
        let tokens = Arc::new(TokenManager::new(kernel.clone()));

        Ok(Self {
            db_pool,
            deps,
            kernel,
            tokens,
        })
    }
}
