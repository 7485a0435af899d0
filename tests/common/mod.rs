//! Common test utilities for database-backed integration tests
//!
//! The `TestDatabase` struct creates a unique PostgreSQL database per test,
//! giving complete isolation so tests can run in parallel. Migrations run
//! automatically; the database is dropped when the struct goes out of scope,
//! even on panic.
//!
//! Set `TEST_DATABASE_URL` to point somewhere other than
//! `postgresql://localhost/fleetscan_test`.

use anyhow::{Context, Result};
use diesel::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::MigrationHarness;

use fleetscan::db::{MIGRATIONS, PgPool};

/// Manages an isolated test database.
///
/// # Database Lifecycle
///
/// 1. `new()` creates database: `CREATE DATABASE fleetscan_test_<random>`
/// 2. Runs all migrations
/// 3. Test runs with the isolated database
/// 4. `Drop` executes `DROP DATABASE ... WITH (FORCE)` (PostgreSQL 13+)
pub struct TestDatabase {
    db_name: String,
    pool: PgPool,
    admin_url: String,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        dotenvy::dotenv().ok();

        let base_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/fleetscan_test".to_string());

        let (admin_url, db_name) = Self::generate_database_info(&base_url);

        Self::create_database(&admin_url, &db_name)
            .await
            .context("Failed to create test database")?;

        let test_db_url = Self::build_database_url(&base_url, &db_name);

        Self::run_migrations(&test_db_url)
            .await
            .context("Failed to run migrations")?;

        let manager = ConnectionManager::<PgConnection>::new(&test_db_url);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .with_context(|| format!("Failed to create connection pool for {}", db_name))?;

        Ok(TestDatabase {
            db_name,
            pool,
            admin_url,
        })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    #[allow(dead_code)]
    pub fn name(&self) -> &str {
        &self.db_name
    }

    /// Returns (admin_url, db_name); the admin URL points at the `postgres`
    /// database for create/drop operations.
    fn generate_database_info(base_url: &str) -> (String, String) {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let db_name = format!("fleetscan_test_{}", &suffix[..16]);
        let admin_url = base_url.replace("/fleetscan_test", "/postgres");
        (admin_url, db_name)
    }

    fn build_database_url(base_url: &str, db_name: &str) -> String {
        base_url.replace("/fleetscan_test", &format!("/{}", db_name))
    }

    async fn create_database(admin_url: &str, db_name: &str) -> Result<()> {
        let admin_url = admin_url.to_string();
        let db_name = db_name.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = PgConnection::establish(&admin_url).context(
                "Failed to connect to PostgreSQL for database creation. Is PostgreSQL running?",
            )?;

            // db_name is generated hex, safe to interpolate
            let create_sql = format!("CREATE DATABASE \"{}\"", db_name);
            diesel::sql_query(&create_sql)
                .execute(&mut conn)
                .with_context(|| format!("Failed to create database '{}'", db_name))?;

            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("Database creation task panicked")?
    }

    async fn run_migrations(db_url: &str) -> Result<()> {
        let db_url = db_url.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = PgConnection::establish(&db_url)
                .context("Failed to connect to test database for migrations")?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("Migration task panicked")?
    }

    fn cleanup(&self) {
        use std::panic::AssertUnwindSafe;

        let db_name = self.db_name.clone();
        let admin_url = self.admin_url.clone();

        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let mut conn = PgConnection::establish(&admin_url).ok()?;
            let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", db_name);
            diesel::sql_query(&drop_sql).execute(&mut conn).ok()
        }));

        if result.is_err() {
            eprintln!(
                "Warning: Failed to drop test database '{}'. \
                 You may need to manually clean up: DROP DATABASE {};",
                self.db_name, self.db_name
            );
        }
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        self.cleanup();
    }
}
