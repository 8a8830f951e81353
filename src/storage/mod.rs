//! SQLite persistence for publishing days, articles and run records.
//!
//! Writes are idempotent: days are keyed by `(date, newsletter_type)`,
//! articles by `(source_url, publish_date, newsletter_type)`, and a day's
//! articles commit together with its `stored` status in one transaction.

mod articles;
mod days;
mod runs;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    ArticleRecord, CommitOutcome, DayStatus, PublishingDay, RunRecord, RunTotals, StorageError,
};
