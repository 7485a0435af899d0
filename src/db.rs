use anyhow::{Context, Result};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::info;

pub mod functions {
    //! SQL function definitions for use with Diesel's query builder.

    use diesel::sql_types::{Nullable, Text};

    diesel::define_sql_function! {
        /// Uppercases text, matching the expression indexes on the code and
        /// registration columns.
        fn upper(x: Text) -> Text;
    }

    diesel::define_sql_function! {
        #[sql_name = "upper"]
        fn upper_nullable(x: Nullable<Text>) -> Nullable<Text>;
    }
}

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");

/// Default connection pool size. The pool is the single globally shared
/// resource between concurrent job tasks.
const POOL_MAX_SIZE: u32 = 20;

/// Create a bounded r2d2 connection pool for the given database URL.
pub fn create_pool(database_url: &str) -> Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(POOL_MAX_SIZE)
        .build(manager)
        .context("Failed to create database connection pool")?;
    Ok(pool)
}

/// Apply any pending embedded migrations.
pub fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut conn = pool
        .get()
        .context("Failed to get connection for migrations")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    if !applied.is_empty() {
        info!("Applied {} pending database migrations", applied.len());
    }
    Ok(())
}
