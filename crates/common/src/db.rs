//! PostgreSQL access for notification records and organizations.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// How long an admission or status callback waits for a free connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle connections beyond the warm minimum are closed after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Pool shared by the admission pipeline and the status reconciler.
///
/// Size it with `AppConfig::db_max_connections` (default 20). One connection
/// is kept warm so the first request after a quiet period skips the handshake.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1.min(max_connections))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Notification store pool ready");
    Ok(pool)
}

/// Create the `organizations` and `notifications` tables if missing.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
