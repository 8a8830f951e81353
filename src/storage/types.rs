use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors, split by how the orchestrator must react to them.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A uniqueness/foreign-key/check constraint rejected the write.
    ///
    /// On a natural-key duplicate this means the data is already stored.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The store cannot be reached or trusted (I/O, lock timeout, corrupt row).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
                || db_err.is_check_violation()
            {
                return StorageError::ConstraintViolation(db_err.message().to_string());
            }
        }
        StorageError::Unavailable(err.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_sqlx(err)
    }
}

// ============================================================================
// Day Status
// ============================================================================

/// Persisted processing status of a publishing day.
///
/// Terminal statuses are `Stored`, `Failed`, `SkippedHoliday` and
/// `NotPublished`. `Failed` is terminal for a run but may be re-attempted by a
/// later run when `retry_failed_days` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayStatus {
    Pending,
    Fetched,
    Parsed,
    Enriched,
    Stored,
    Failed,
    SkippedHoliday,
    NotPublished,
}

impl DayStatus {
    pub const ALL: [DayStatus; 8] = [
        DayStatus::Pending,
        DayStatus::Fetched,
        DayStatus::Parsed,
        DayStatus::Enriched,
        DayStatus::Stored,
        DayStatus::Failed,
        DayStatus::SkippedHoliday,
        DayStatus::NotPublished,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DayStatus::Pending => "pending",
            DayStatus::Fetched => "fetched",
            DayStatus::Parsed => "parsed",
            DayStatus::Enriched => "enriched",
            DayStatus::Stored => "stored",
            DayStatus::Failed => "failed",
            DayStatus::SkippedHoliday => "skipped_holiday",
            DayStatus::NotPublished => "not_published",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DayStatus::Stored | DayStatus::Failed | DayStatus::SkippedHoliday | DayStatus::NotPublished
        )
    }
}

impl fmt::Display for DayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DayStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| StorageError::Unavailable(format!("unknown day status '{s}' in store")))
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Processing record for one (date, newsletter_type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishingDay {
    pub date: NaiveDate,
    pub newsletter_type: String,
    pub country_code: String,
    pub status: DayStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Unix seconds of the last write; `None` until the row is read back.
    pub updated_at: Option<i64>,
}

impl PublishingDay {
    pub fn pending(date: NaiveDate, newsletter_type: &str, country_code: &str) -> Self {
        Self {
            date,
            newsletter_type: newsletter_type.to_string(),
            country_code: country_code.to_string(),
            status: DayStatus::Pending,
            attempt_count: 0,
            last_error: None,
            updated_at: None,
        }
    }

    /// Whether a `not_published` verdict was reached only after the date was over.
    ///
    /// A 404 seen on or before the digest date may just mean "not out yet",
    /// so such rows stay eligible for another fetch.
    pub fn absence_confirmed(&self) -> bool {
        self.status == DayStatus::NotPublished
            && self
                .updated_at
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .is_some_and(|at| at.date_naive() > self.date)
    }
}

/// One article extracted from a digest.
///
/// `(source_url, publish_date, newsletter_type)` is the natural key.
/// The `Option` fields are filled by enrichment and may stay `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRecord {
    pub source_url: String,
    pub title: String,
    pub summary_raw: String,
    pub title_translated: Option<String>,
    pub summary_translated: Option<String>,
    pub audio_path: Option<String>,
    pub reading_time_minutes: Option<u32>,
    /// Zero-based position in the digest.
    pub position: u32,
    pub newsletter_type: String,
    pub publish_date: NaiveDate,
}

/// Result of committing a day atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Articles and the `stored` status were written; `inserted` rows are new.
    Committed { inserted: usize },
    /// The day was already `stored`; nothing was written.
    AlreadyStored,
}

/// Summary row written for every orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub newsletter_type: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub days_stored: u32,
    pub days_failed: u32,
    pub days_skipped: u32,
    pub articles_stored: u32,
    pub cancelled: bool,
}

/// Totals used to close a run row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub days_stored: u32,
    pub days_failed: u32,
    pub days_skipped: u32,
    pub articles_stored: u32,
    pub cancelled: bool,
}

// ============================================================================
// Row Types
// ============================================================================

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| StorageError::Unavailable(format!("corrupt date '{s}' in store: {e}")))
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DayDbRow {
    pub date: String,
    pub newsletter_type: String,
    pub country_code: String,
    pub status: String,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

impl DayDbRow {
    pub(crate) fn into_day(self) -> Result<PublishingDay, StorageError> {
        Ok(PublishingDay {
            date: parse_date(&self.date)?,
            newsletter_type: self.newsletter_type,
            country_code: self.country_code,
            status: self.status.parse()?,
            attempt_count: u32::try_from(self.attempt_count).unwrap_or(0),
            last_error: self.last_error,
            updated_at: Some(self.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub source_url: String,
    pub title: String,
    pub summary_raw: String,
    pub title_translated: Option<String>,
    pub summary_translated: Option<String>,
    pub audio_path: Option<String>,
    pub reading_time_minutes: Option<i64>,
    pub position: i64,
    pub newsletter_type: String,
    pub publish_date: String,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Result<ArticleRecord, StorageError> {
        Ok(ArticleRecord {
            publish_date: parse_date(&self.publish_date)?,
            source_url: self.source_url,
            title: self.title,
            summary_raw: self.summary_raw,
            title_translated: self.title_translated,
            summary_translated: self.summary_translated,
            audio_path: self.audio_path,
            reading_time_minutes: self.reading_time_minutes.and_then(|m| u32::try_from(m).ok()),
            position: u32::try_from(self.position).unwrap_or(0),
            newsletter_type: self.newsletter_type,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RunDbRow {
    pub id: i64,
    pub newsletter_type: String,
    pub range_start: String,
    pub range_end: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub days_stored: i64,
    pub days_failed: i64,
    pub days_skipped: i64,
    pub articles_stored: i64,
    pub cancelled: bool,
}

impl RunDbRow {
    pub(crate) fn into_record(self) -> Result<RunRecord, StorageError> {
        let count = |v: i64| u32::try_from(v).unwrap_or(0);
        Ok(RunRecord {
            id: self.id,
            newsletter_type: self.newsletter_type,
            range_start: parse_date(&self.range_start)?,
            range_end: parse_date(&self.range_end)?,
            started_at: self.started_at,
            finished_at: self.finished_at,
            days_stored: count(self.days_stored),
            days_failed: count(self.days_failed),
            days_skipped: count(self.days_skipped),
            articles_stored: count(self.articles_stored),
            cancelled: self.cancelled,
        })
    }
}
