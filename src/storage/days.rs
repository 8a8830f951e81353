use chrono::NaiveDate;

use super::schema::Database;
use super::types::{format_date, DayDbRow, DayStatus, PublishingDay, StorageError};
use crate::util::{truncate_chars, MAX_ERROR_LEN};

impl Database {
    // ========================================================================
    // Day Operations
    // ========================================================================

    /// Insert or update a day's processing record.
    ///
    /// A row already at `stored` is never modified: the statement's
    /// `ON CONFLICT ... WHERE` guard makes the write a no-op. Returns whether a
    /// row was written.
    pub async fn upsert_day(&self, day: &PublishingDay) -> Result<bool, StorageError> {
        let now = chrono::Utc::now().timestamp();
        let last_error = day
            .last_error
            .as_deref()
            .map(|e| truncate_chars(e, MAX_ERROR_LEN).into_owned());

        let result = sqlx::query(
            r#"
            INSERT INTO publishing_days
                (date, newsletter_type, country_code, status, attempt_count, last_error, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (date, newsletter_type) DO UPDATE SET
                country_code = excluded.country_code,
                status = excluded.status,
                attempt_count = excluded.attempt_count,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            WHERE publishing_days.status != 'stored'
        "#,
        )
        .bind(format_date(day.date))
        .bind(&day.newsletter_type)
        .bind(&day.country_code)
        .bind(day.status.as_str())
        .bind(i64::from(day.attempt_count))
        .bind(last_error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Current status of a day, or `None` if it was never scheduled.
    pub async fn get_day_status(
        &self,
        date: NaiveDate,
        newsletter_type: &str,
    ) -> Result<Option<DayStatus>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM publishing_days WHERE date = ? AND newsletter_type = ?",
        )
        .bind(format_date(date))
        .bind(newsletter_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(s,)| s.parse()).transpose()
    }

    pub async fn get_day(
        &self,
        date: NaiveDate,
        newsletter_type: &str,
    ) -> Result<Option<PublishingDay>, StorageError> {
        let row = sqlx::query_as::<_, DayDbRow>(
            r#"
            SELECT date, newsletter_type, country_code, status, attempt_count, last_error, updated_at
            FROM publishing_days
            WHERE date = ? AND newsletter_type = ?
        "#,
        )
        .bind(format_date(date))
        .bind(newsletter_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DayDbRow::into_day).transpose()
    }

    /// All recorded days of one newsletter in `[start, end]`, ascending.
    pub async fn list_days(
        &self,
        newsletter_type: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PublishingDay>, StorageError> {
        let rows = sqlx::query_as::<_, DayDbRow>(
            r#"
            SELECT date, newsletter_type, country_code, status, attempt_count, last_error, updated_at
            FROM publishing_days
            WHERE newsletter_type = ? AND date BETWEEN ? AND ?
            ORDER BY date ASC
        "#,
        )
        .bind(newsletter_type)
        .bind(format_date(start))
        .bind(format_date(end))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DayDbRow::into_day).collect()
    }

    /// Number of recorded days per status for one newsletter.
    pub async fn count_days_by_status(
        &self,
        newsletter_type: &str,
    ) -> Result<Vec<(DayStatus, i64)>, StorageError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM publishing_days
            WHERE newsletter_type = ?
            GROUP BY status
            ORDER BY status
        "#,
        )
        .bind(newsletter_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(s, n)| s.parse().map(|st| (st, n)))
            .collect()
    }
}
