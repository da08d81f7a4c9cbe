//! Database connection and pool management.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// One orchestrating caller per deploy; a couple of spare connections cover
// readers such as stats reporting.
const MAX_CONNECTIONS: u32 = 2;

/// Connection pool for the cache database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Query-based PRAGMAs must run on every pooled connection, not
            // just the first one handed out.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the cache database file at the given path.
    ///
    /// Creates the file if it doesn't exist and runs migrations. Connecting
    /// to an existing database keeps its contents.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options().filename(path.as_ref()).create_if_missing(true);
        Self::new(options, MAX_CONNECTIONS).await
    }

    /// Connect to an in-memory database.
    ///
    /// Not gated behind `#[cfg(test)]` so downstream crates can use it in
    /// their own tests. The database disappears when the pool closes.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Every connection to ":memory:" is a separate database.
        Self::new(options, 1).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(1500))
    }

    /// PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA cache_size = -4096;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    #[instrument("performing cache migrations")]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    ///
    /// Closing twice is harmless.
    pub async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
