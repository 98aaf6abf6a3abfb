use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Configure SQLite connection options with busy_timeout pragma.
        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. This handles transient lock contention
        // between concurrent refresh transactions automatically.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::Other)?
            .pragma("busy_timeout", "5000");

        // A pooled :memory: database would give each connection its own copy,
        // so tests get a single-connection pool.
        let max_connections = if path == ":memory:" { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::Other)?;
        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All migrations use `IF NOT EXISTS` for idempotency, so re-running on
    /// an existing database is a no-op.
    async fn migrate(&self) -> Result<()> {
        // Enable foreign keys (per-connection setting, outside the transaction)
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                feed_url TEXT NOT NULL,
                site_url TEXT NOT NULL,
                title TEXT NOT NULL,
                etag_header TEXT,
                last_modified_header TEXT,
                checked_at INTEGER,
                next_check_at INTEGER,
                parsing_error_count INTEGER NOT NULL DEFAULT 0,
                parsing_error_msg TEXT,
                disabled INTEGER NOT NULL DEFAULT 0,
                crawler INTEGER NOT NULL DEFAULT 0,
                blocklist_rules TEXT,
                keeplist_rules TEXT,
                rewrite_rules TEXT,
                url_rewrite_rules TEXT,
                user_agent TEXT,
                cookie TEXT,
                username TEXT,
                password TEXT,
                proxy_url TEXT,
                allow_self_signed_certificates INTEGER NOT NULL DEFAULT 0,
                disable_http2 INTEGER NOT NULL DEFAULT 0,
                UNIQUE(user_id, feed_url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                hash TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                published_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                changed_at INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'unread',
                starred INTEGER NOT NULL DEFAULT 0,
                tags TEXT NOT NULL DEFAULT '[]',
                enclosures TEXT NOT NULL DEFAULT '[]',
                UNIQUE(feed_id, hash)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Sweep query filters on disabled + next_check_at
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_next_check ON feeds(next_check_at) WHERE disabled = 0",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feeds_user ON feeds(user_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_feed ON entries(feed_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_status ON entries(status)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_feed_published ON entries(feed_id, published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
