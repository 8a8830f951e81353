use chrono::NaiveDate;

use super::schema::Database;
use super::types::{format_date, RunDbRow, RunRecord, RunTotals, StorageError};

impl Database {
    // ========================================================================
    // Run Bookkeeping
    // ========================================================================

    /// Open a run row, returning its id.
    pub async fn begin_run(
        &self,
        newsletter_type: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<i64, StorageError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO runs (newsletter_type, range_start, range_end, started_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(newsletter_type)
        .bind(format_date(start))
        .bind(format_date(end))
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Close a run row with its totals.
    pub async fn finish_run(&self, run_id: i64, totals: &RunTotals) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE runs SET
                finished_at = ?,
                days_stored = ?,
                days_failed = ?,
                days_skipped = ?,
                articles_stored = ?,
                cancelled = ?
            WHERE id = ?
        "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(i64::from(totals.days_stored))
        .bind(i64::from(totals.days_failed))
        .bind(i64::from(totals.days_skipped))
        .bind(i64::from(totals.articles_stored))
        .bind(totals.cancelled)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>, StorageError> {
        let rows = sqlx::query_as::<_, RunDbRow>(
            r#"
            SELECT id, newsletter_type, range_start, range_end, started_at, finished_at,
                   days_stored, days_failed, days_skipped, articles_stored, cancelled
            FROM runs
            ORDER BY id DESC
            LIMIT ?
        "#,
        )
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RunDbRow::into_record).collect()
    }
}
