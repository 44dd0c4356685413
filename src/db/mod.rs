pub mod models;
pub mod queries;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 1;
/// Per-attempt acquire timeout.
const DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Connect to Postgres, retrying a bounded number of times with a fixed delay.
///
/// Returns the last connection error once `attempts` is exhausted; callers
/// treat that as fatal.
pub async fn connect_with_retry(
    database_url: &str,
    attempts: u32,
    delay: Duration,
) -> Result<PgPool, sqlx::Error> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = PgPoolOptions::new()
            .max_connections(DB_POOL_MAX_CONNECTIONS)
            .min_connections(DB_POOL_MIN_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(DB_ACQUIRE_TIMEOUT_SECS))
            .connect(database_url)
            .await;

        match result {
            Ok(pool) => {
                tracing::info!("Connected to database (attempt {}/{})", attempt, attempts);
                return Ok(pool);
            }
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    "Database not reachable (attempt {}/{}): {}; retrying in {:?}",
                    attempt,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("Giving up on database after {} attempts: {}", attempts, e);
                return Err(e);
            }
        }
    }
}
