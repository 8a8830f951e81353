use chrono::NaiveDate;
use sqlx::{QueryBuilder, SqliteConnection};

use super::schema::Database;
use super::types::{
    format_date, ArticleDbRow, ArticleRecord, CommitOutcome, DayStatus, PublishingDay,
    StorageError,
};
use crate::util::{truncate_chars, MAX_ERROR_LEN};

/// 10 columns * 50 rows stays well under SQLite's bound-parameter limit.
const BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Upsert articles by natural key, returns the number of new rows.
    ///
    /// Re-upserting an existing `(source_url, publish_date, newsletter_type)`
    /// refreshes its text fields but keeps enrichment columns a previous run
    /// filled when the new record leaves them `None`.
    pub async fn upsert_articles(&self, articles: &[ArticleRecord]) -> Result<usize, StorageError> {
        if articles.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let inserted = write_articles(&mut tx, articles).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    /// Atomically store a day's articles and mark the day `stored`.
    ///
    /// Either every article plus the `stored` transition commits, or nothing
    /// does. A day already `stored` is left untouched.
    pub async fn commit_day(
        &self,
        day: &PublishingDay,
        articles: &[ArticleRecord],
    ) -> Result<CommitOutcome, StorageError> {
        let date = format_date(day.date);
        let mut tx = self.pool.begin().await?;

        let current: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM publishing_days WHERE date = ? AND newsletter_type = ?",
        )
        .bind(&date)
        .bind(&day.newsletter_type)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((status,)) = current {
            if status.parse::<DayStatus>()? == DayStatus::Stored {
                tx.rollback().await?;
                return Ok(CommitOutcome::AlreadyStored);
            }
        }

        let inserted = write_articles(&mut tx, articles).await?;

        let last_error = day
            .last_error
            .as_deref()
            .map(|e| truncate_chars(e, MAX_ERROR_LEN).into_owned());
        sqlx::query(
            r#"
            INSERT INTO publishing_days
                (date, newsletter_type, country_code, status, attempt_count, last_error, updated_at)
            VALUES (?, ?, ?, 'stored', ?, ?, ?)
            ON CONFLICT (date, newsletter_type) DO UPDATE SET
                country_code = excluded.country_code,
                status = 'stored',
                attempt_count = excluded.attempt_count,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(&date)
        .bind(&day.newsletter_type)
        .bind(&day.country_code)
        .bind(i64::from(day.attempt_count))
        .bind(last_error)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CommitOutcome::Committed { inserted })
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Articles of one day in digest order.
    pub async fn articles_for_day(
        &self,
        date: NaiveDate,
        newsletter_type: &str,
    ) -> Result<Vec<ArticleRecord>, StorageError> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(
            r#"
            SELECT source_url, title, summary_raw, title_translated, summary_translated,
                   audio_path, reading_time_minutes, position, newsletter_type, publish_date
            FROM articles
            WHERE publish_date = ? AND newsletter_type = ?
            ORDER BY position ASC, id ASC
        "#,
        )
        .bind(format_date(date))
        .bind(newsletter_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ArticleDbRow::into_article).collect()
    }

    pub async fn count_articles(&self) -> Result<i64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Article counts per day for one newsletter in `[start, end]`.
    pub async fn article_counts(
        &self,
        newsletter_type: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(String, i64)>, StorageError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT publish_date, COUNT(*) FROM articles
            WHERE newsletter_type = ? AND publish_date BETWEEN ? AND ?
            GROUP BY publish_date
            ORDER BY publish_date
        "#,
        )
        .bind(newsletter_type)
        .bind(format_date(start))
        .bind(format_date(end))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Two-phase write inside the caller's transaction.
///
/// Phase 1 inserts unseen keys with `INSERT OR IGNORE` and counts them with
/// `changes()`. Phase 2 refreshes every row, keeping enrichment columns when
/// the incoming value is NULL.
async fn write_articles(
    conn: &mut SqliteConnection,
    articles: &[ArticleRecord],
) -> Result<usize, StorageError> {
    let now = chrono::Utc::now().timestamp();
    let mut total_inserted = 0usize;

    for chunk in articles.chunks(BATCH_SIZE) {
        let mut insert_builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO articles (source_url, publish_date, newsletter_type, title, \
             summary_raw, title_translated, summary_translated, audio_path, reading_time_minutes, \
             position, fetched_at) ",
        );

        insert_builder.push_values(chunk, |mut b, article| {
            b.push_bind(&article.source_url)
                .push_bind(format_date(article.publish_date))
                .push_bind(&article.newsletter_type)
                .push_bind(&article.title)
                .push_bind(&article.summary_raw)
                .push_bind(&article.title_translated)
                .push_bind(&article.summary_translated)
                .push_bind(&article.audio_path)
                .push_bind(article.reading_time_minutes.map(i64::from))
                .push_bind(i64::from(article.position))
                .push_bind(now);
        });

        insert_builder.build().execute(&mut *conn).await?;

        let (changes,): (i64,) = sqlx::query_as("SELECT changes()")
            .fetch_one(&mut *conn)
            .await?;
        total_inserted += usize::try_from(changes).unwrap_or(0);
    }

    for article in articles {
        sqlx::query(
            r#"
            UPDATE articles SET
                title = ?,
                summary_raw = ?,
                title_translated = COALESCE(?, title_translated),
                summary_translated = COALESCE(?, summary_translated),
                audio_path = COALESCE(?, audio_path),
                reading_time_minutes = COALESCE(?, reading_time_minutes),
                position = ?
            WHERE source_url = ? AND publish_date = ? AND newsletter_type = ?
        "#,
        )
        .bind(&article.title)
        .bind(&article.summary_raw)
        .bind(&article.title_translated)
        .bind(&article.summary_translated)
        .bind(&article.audio_path)
        .bind(article.reading_time_minutes.map(i64::from))
        .bind(i64::from(article.position))
        .bind(&article.source_url)
        .bind(format_date(article.publish_date))
        .bind(&article.newsletter_type)
        .execute(&mut *conn)
        .await?;
    }

    Ok(total_inserted)
}
