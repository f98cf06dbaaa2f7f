use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

/// Busy-handler wait for a locked database. Must cover at least one outbox
/// dispatcher poll interval, so a writer that collides with a dispatch
/// cycle waits it out instead of surfacing `SQLITE_BUSY`.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Session pragmas applied to every pooled connection:
/// - `foreign_keys`: interactions, handoffs, and artifacts reference
///   customer/ticket rows; audit export assumes no orphans.
/// - `journal_mode = WAL`: readers (handoff queue, metrics, audit) stay
///   live while the dispatcher and SLA watchdog commit.
const SESSION_PRAGMAS: &[&str] = &["PRAGMA foreign_keys = ON", "PRAGMA journal_mode = WAL"];

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                for pragma in SESSION_PRAGMAS {
                    sqlx::query(pragma).execute(&mut *conn).await?;
                }
                sqlx::query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use super::connect_with_settings;

    #[tokio::test]
    async fn connections_enforce_foreign_keys_and_busy_timeout() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");

        let (foreign_keys,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("pragma query");
        assert_eq!(foreign_keys, 1);

        let (busy_timeout,): (i64,) = sqlx::query_as("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .expect("pragma query");
        assert_eq!(busy_timeout, 5_000);

        pool.close().await;
    }
}
