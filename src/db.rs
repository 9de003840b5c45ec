//! PostgreSQL pool and schema migrations.

use std::time::Duration;

use sqlx::{Pool, Postgres, postgres::PgPoolOptions};

pub type DbPool = Pool<Postgres>;

/// Each reconciliation pass holds one connection for its whole transaction,
/// so this also caps concurrent passes.
const MAX_CONNECTIONS: u32 = 10;

/// A pass waiting longer than this for a connection fails and is deferred
/// instead of stalling the webhook response.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to `database_url`.
///
/// # Errors
///
/// Invalid connection string, unreachable server or failed authentication.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Apply pending files from `migrations/` (tracked in `_sqlx_migrations`).
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
