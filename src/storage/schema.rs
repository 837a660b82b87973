use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::types::StorageError;

// ============================================================================
// Database
// ============================================================================

/// SQLite-backed storage collaborator.
///
/// Reads go straight to the pool. Every write acquires `write_lock` first, so
/// concurrent refreshes commit one after another instead of racing for the
/// SQLite writer slot.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database shared by all pooled
    /// connections.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Create the file owner-only before SQLite does, so it never exists
        // with umask permissions
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                if let Err(e) = std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600)) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if db_path.parent().is_some_and(|p| p.exists()) {
                // On failure SQLite reports the error at connect time
                let _ = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path);
            }
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY (e.g. another process holding the file).
        let options = SqliteConnectOptions::from_str(&url)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        let db = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };
        db.migrate()
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        db.recover_interrupted_refreshes().await?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All migrations use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS folders (
                id INTEGER PRIMARY KEY,
                name TEXT UNIQUE NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                url TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                site_url TEXT,
                folder_id INTEGER REFERENCES folders(id) ON DELETE CASCADE,
                icon BLOB,
                last_refresh INTEGER,
                status TEXT NOT NULL DEFAULT 'idle',
                error TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // No uniqueness constraint on items: duplicates are removed by the
        // reconciliation pass of every refresh.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT,
                description TEXT,
                url TEXT NOT NULL,
                published INTEGER,
                read INTEGER NOT NULL DEFAULT 0,
                fetched_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_feed_read ON items(feed_id, read)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_feed_published ON items(feed_id, published DESC)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_folder ON feeds(folder_id)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// A process that died mid-refresh leaves its feeds marked `refreshing`.
    /// Nothing can be in flight at open time, so those go back to idle.
    async fn recover_interrupted_refreshes(&self) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE feeds SET status = 'idle' WHERE status = 'refreshing'")
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            tracing::info!(
                feeds = result.rows_affected(),
                "Reset feeds left in refreshing state by an interrupted run"
            );
        }
        Ok(())
    }
}
