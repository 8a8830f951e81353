use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StorageError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// `path` is a filesystem path or `":memory:"`. Parent directories of a
    /// file path are created.
    ///
    /// # Errors
    ///
    /// Every failure here is [`StorageError::Unavailable`]: without the store
    /// a run cannot guarantee anything.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let in_memory = path == ":memory:";
        if !in_memory {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StorageError::Unavailable(format!(
                            "cannot create database directory '{}': {e}",
                            parent.display()
                        ))
                    })?;
                }
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5s for a competing writer (a dashboard
        // reading the same file) before surfacing SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // An in-memory database lives only as long as its connections and
        // shared-cache table locks ignore busy_timeout, so keep it to one.
        let max_connections = if in_memory { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match e {
            StorageError::Unavailable(msg) | StorageError::ConstraintViolation(msg) => {
                StorageError::Unavailable(format!("migration failed: {msg}"))
            }
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publishing_days (
                date TEXT NOT NULL,
                newsletter_type TEXT NOT NULL,
                country_code TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN (
                    'pending', 'fetched', 'parsed', 'enriched', 'stored',
                    'failed', 'skipped_holiday', 'not_published'
                )),
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (date, newsletter_type)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Natural key enforced by the store, not just by the upsert logic
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                source_url TEXT NOT NULL,
                publish_date TEXT NOT NULL,
                newsletter_type TEXT NOT NULL,
                title TEXT NOT NULL,
                summary_raw TEXT NOT NULL,
                title_translated TEXT,
                summary_translated TEXT,
                audio_path TEXT,
                reading_time_minutes INTEGER,
                position INTEGER NOT NULL DEFAULT 0,
                fetched_at INTEGER NOT NULL,
                UNIQUE (source_url, publish_date, newsletter_type)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_day ON articles(publish_date, newsletter_type, position)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_days_status ON publishing_days(newsletter_type, status)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY,
                newsletter_type TEXT NOT NULL,
                range_start TEXT NOT NULL,
                range_end TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                days_stored INTEGER NOT NULL DEFAULT 0,
                days_failed INTEGER NOT NULL DEFAULT 0,
                days_skipped INTEGER NOT NULL DEFAULT 0,
                articles_stored INTEGER NOT NULL DEFAULT 0,
                cancelled INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
