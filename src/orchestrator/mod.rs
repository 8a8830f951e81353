//! Drives a newsletter over a date range, one publishing day at a time.
//!
//! Days are processed sequentially in ascending order. Each day moves through
//! the [`DayState`] machine (see [`state`]) and its status is persisted after
//! every step, so a crashed or cancelled run resumes where it stopped:
//!
//! - `stored` days are never fetched again
//! - `not_published` days are final once recorded after their date was over
//! - `failed` days are re-attempted only with `retry_failed_days`
//! - any in-flight status is reprocessed from the fetch
//! - dates after the clock's today are deferred: no fetch, no row
//!
//! Retries are budgeted per day per run by the [`RetryLedger`]. Cancellation
//! is honoured between days; a day already in flight runs to a terminal state.

mod ledger;
mod state;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::calendar::{BusinessDayResolver, DayKind};
use crate::digest::{Clock, DigestParser, DigestSource, FetchError, ParseError, SystemClock};
use crate::enrich::EnrichmentPipeline;
use crate::storage::{
    ArticleRecord, CommitOutcome, Database, DayStatus, PublishingDay, RunTotals, StorageError,
};

pub use ledger::{Backoff, RetryLedger, RetryPolicy};
pub use state::{transition, DayEvent, DayState, FailureClass, InvalidTransition};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that abort a whole run. Per-day problems never surface here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

// ============================================================================
// Settings & Report
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub newsletter_type: String,
    pub country_code: String,
    pub max_articles: usize,
    /// Translate into this language when a translator is configured.
    pub target_language: Option<String>,
    pub retry: RetryPolicy,
    /// Pause between consecutive processed days.
    pub delay_between_days: Duration,
    pub retry_failed_days: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            newsletter_type: "tech".to_string(),
            country_code: "US".to_string(),
            max_articles: 20,
            target_language: None,
            retry: RetryPolicy::default(),
            delay_between_days: Duration::from_secs(2),
            retry_failed_days: true,
        }
    }
}

/// What happened to one date during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayOutcome {
    pub date: NaiveDate,
    pub state: DayState,
    /// Attempts made in this run.
    pub attempts: u32,
    /// Articles committed for the day (0 unless newly stored).
    pub articles: usize,
    /// Of `articles`, rows that did not exist before.
    pub inserted: usize,
    /// Enrichment stage failures across the day's articles.
    pub enrichment_failures: usize,
    pub error: Option<String>,
    /// The terminal state was found in the store, not produced by this run.
    pub from_previous_run: bool,
}

impl DayOutcome {
    /// A publishing day not reached yet; left for a later run.
    fn deferred(date: NaiveDate) -> Self {
        Self {
            date,
            state: DayState::Pending,
            attempts: 0,
            articles: 0,
            inserted: 0,
            enrichment_failures: 0,
            error: None,
            from_previous_run: false,
        }
    }

    fn carried_over(day: &PublishingDay, state: DayState) -> Self {
        Self {
            date: day.date,
            state,
            attempts: 0,
            articles: 0,
            inserted: 0,
            enrichment_failures: 0,
            error: day.last_error.clone(),
            from_previous_run: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Option<i64>,
    pub days: Vec<DayOutcome>,
    pub cancelled: bool,
    pub translation_suspended: bool,
    /// Error that tripped the translation breaker.
    pub translation_suspension_reason: Option<String>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&DayOutcome) -> bool) -> usize {
        self.days.iter().filter(|d| pred(d)).count()
    }

    /// Days stored by this run.
    pub fn stored(&self) -> usize {
        self.count(|d| d.state == DayState::Stored && !d.from_previous_run)
    }

    /// Days that end the run as failed, including ones not retried.
    pub fn failed(&self) -> usize {
        self.count(|d| d.state == DayState::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(|d| d.state == DayState::SkippedHoliday)
    }

    /// Future publishing days left untouched.
    pub fn deferred(&self) -> usize {
        self.count(|d| d.state == DayState::Pending)
    }

    pub fn not_published(&self) -> usize {
        self.count(|d| d.state == DayState::NotPublished && !d.from_previous_run)
    }

    /// Days found already complete (stored or confirmed unpublished).
    pub fn already_done(&self) -> usize {
        self.count(|d| {
            d.from_previous_run && matches!(d.state, DayState::Stored | DayState::NotPublished)
        })
    }

    pub fn articles_stored(&self) -> usize {
        self.days.iter().map(|d| d.articles).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn totals(&self) -> RunTotals {
        let n = |v: usize| u32::try_from(v).unwrap_or(u32::MAX);
        RunTotals {
            days_stored: n(self.stored()),
            days_failed: n(self.failed()),
            days_skipped: n(self.skipped()),
            articles_stored: n(self.articles_stored()),
            cancelled: self.cancelled,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

enum AttemptEnd {
    Stored {
        articles: usize,
        inserted: usize,
        enrichment_failures: usize,
    },
    NotFound,
    Failed {
        class: FailureClass,
        error: String,
        retry_after: Option<Duration>,
    },
}

pub struct Orchestrator {
    db: Database,
    resolver: BusinessDayResolver,
    source: Arc<dyn DigestSource>,
    parser: Arc<dyn DigestParser>,
    pipeline: EnrichmentPipeline,
    settings: RunSettings,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        resolver: BusinessDayResolver,
        source: Arc<dyn DigestSource>,
        parser: Arc<dyn DigestParser>,
        pipeline: EnrichmentPipeline,
        settings: RunSettings,
    ) -> Self {
        Self {
            db,
            resolver,
            source,
            parser,
            pipeline,
            settings,
            cancel: CancellationToken::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Clock deciding which dates are still in the future. Share it with the source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Processes every date in `[start, end]`.
    ///
    /// Returns `Err` only for problems that make continuing pointless
    /// (store unavailable, bad range). Day failures are in the report.
    pub async fn run(&self, start: NaiveDate, end: NaiveDate) -> Result<RunReport, RunError> {
        if start > end {
            return Err(RunError::InvalidRange { start, end });
        }

        let kind = &self.settings.newsletter_type;
        let run_id = self.db.begin_run(kind, start, end).await?;
        tracing::info!(run_id, newsletter = %kind, %start, %end, "Starting run");

        let mut ledger = RetryLedger::new();
        let mut report = RunReport {
            run_id: Some(run_id),
            ..RunReport::default()
        };
        let mut processed_any = false;
        let today = self.clock.today();

        for (date, day_kind) in self.resolver.walk(start, end) {
            if self.cancel.is_cancelled() {
                tracing::info!(%date, "Run cancelled, stopping before next day");
                report.cancelled = true;
                break;
            }

            let existing = self.db.get_day(date, kind).await?;

            if day_kind != DayKind::Publishing {
                report.days.push(self.skip_day(date, day_kind, existing).await?);
                continue;
            }

            let prior = match existing {
                Some(day) => match day.status {
                    DayStatus::Stored => {
                        tracing::debug!(%date, "Already stored, skipping");
                        report.days.push(DayOutcome::carried_over(&day, DayState::Stored));
                        continue;
                    }
                    DayStatus::NotPublished if day.absence_confirmed() => {
                        tracing::debug!(%date, "Known unpublished, skipping");
                        report.days.push(DayOutcome::carried_over(&day, DayState::NotPublished));
                        continue;
                    }
                    DayStatus::NotPublished => {
                        tracing::info!(%date, "Unpublished as of its own date, checking again");
                        Some(day)
                    }
                    DayStatus::Failed if !self.settings.retry_failed_days => {
                        tracing::info!(%date, "Previously failed, not retrying");
                        report.days.push(DayOutcome::carried_over(&day, DayState::Failed));
                        continue;
                    }
                    DayStatus::Failed => {
                        transition(DayState::Failed, DayEvent::Requeue, 0, 0)?;
                        tracing::info!(%date, previous_attempts = day.attempt_count, "Retrying previously failed day");
                        Some(day)
                    }
                    status => {
                        if status != DayStatus::SkippedHoliday {
                            tracing::info!(%date, %status, "Resuming interrupted day");
                        }
                        Some(day)
                    }
                },
                None => None,
            };

            if date > today {
                tracing::debug!(%date, %today, "Date not reached yet, deferring");
                report.days.push(DayOutcome::deferred(date));
                continue;
            }

            if processed_any && !self.settings.delay_between_days.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.delay_between_days) => {}
                    _ = self.cancel.cancelled() => {
                        tracing::info!(%date, "Run cancelled, stopping before next day");
                        report.cancelled = true;
                        break;
                    }
                }
            }
            processed_any = true;

            let outcome = self.process_day(date, prior, &mut ledger).await?;
            report.days.push(outcome);
        }

        report.translation_suspended = self.pipeline.context().translation_suspended();
        report.translation_suspension_reason = self.pipeline.context().suspension_reason();
        self.db.finish_run(run_id, &report.totals()).await?;

        tracing::info!(
            run_id,
            stored = report.stored(),
            failed = report.failed(),
            skipped = report.skipped(),
            not_published = report.not_published(),
            deferred = report.deferred(),
            already_done = report.already_done(),
            articles = report.articles_stored(),
            cancelled = report.cancelled,
            translation_suspended = report.translation_suspended,
            "Run finished"
        );
        Ok(report)
    }

    async fn skip_day(
        &self,
        date: NaiveDate,
        day_kind: DayKind,
        existing: Option<PublishingDay>,
    ) -> Result<DayOutcome, RunError> {
        // A later calendar change must not rewrite a day that already reached an outcome.
        let mut day = match existing {
            Some(day) => match day.status {
                DayStatus::Stored => return Ok(DayOutcome::carried_over(&day, DayState::Stored)),
                DayStatus::Failed => return Ok(DayOutcome::carried_over(&day, DayState::Failed)),
                DayStatus::NotPublished => {
                    return Ok(DayOutcome::carried_over(&day, DayState::NotPublished))
                }
                DayStatus::SkippedHoliday => {
                    return Ok(DayOutcome::carried_over(&day, DayState::SkippedHoliday))
                }
                // Interrupted mid-pipeline; keeps its attempt history
                DayStatus::Pending | DayStatus::Fetched | DayStatus::Parsed | DayStatus::Enriched => {
                    tracing::info!(%date, status = %day.status, "Day is no longer a publishing day");
                    day
                }
            },
            None => PublishingDay::pending(
                date,
                &self.settings.newsletter_type,
                &self.settings.country_code,
            ),
        };

        let state = transition(DayState::Pending, DayEvent::NotPublishingDay, 0, 0)?;
        if day_kind == DayKind::Holiday {
            tracing::debug!(
                %date,
                holiday = self.resolver.calendar().holiday_name(date).unwrap_or("holiday"),
                "Skipping holiday"
            );
        }

        day.status = state.persisted_status();
        self.persist(&day).await?;

        Ok(DayOutcome {
            date,
            state,
            attempts: 0,
            articles: 0,
            inserted: 0,
            enrichment_failures: 0,
            error: day.last_error.clone(),
            from_previous_run: false,
        })
    }

    async fn process_day(
        &self,
        date: NaiveDate,
        prior: Option<PublishingDay>,
        ledger: &mut RetryLedger,
    ) -> Result<DayOutcome, RunError> {
        let kind = &self.settings.newsletter_type;
        let mut day = match prior {
            Some(mut d) => {
                d.country_code = self.settings.country_code.clone();
                d
            }
            None => PublishingDay::pending(date, kind, &self.settings.country_code),
        };

        let mut state = DayState::Pending;
        day.status = state.persisted_status();
        self.persist(&day).await?;

        loop {
            let attempts = ledger.record_attempt(date, kind);
            day.attempt_count = day.attempt_count.saturating_add(1);
            state = transition(state, DayEvent::StartAttempt, attempts, self.settings.retry.max_attempts)?;
            day.status = state.persisted_status();
            self.persist(&day).await?;

            tracing::info!(%date, attempt = attempts, "Processing day");
            let end = self.attempt(&mut day, &mut state).await?;

            let outcome = |state: DayState, day: &PublishingDay| DayOutcome {
                date,
                state,
                attempts,
                articles: 0,
                inserted: 0,
                enrichment_failures: 0,
                error: day.last_error.clone(),
                from_previous_run: false,
            };

            match end {
                AttemptEnd::Stored {
                    articles,
                    inserted,
                    enrichment_failures,
                } => {
                    state = transition(state, DayEvent::Committed, attempts, self.settings.retry.max_attempts)?;
                    tracing::info!(%date, articles, inserted, enrichment_failures, "Day stored");
                    return Ok(DayOutcome {
                        articles,
                        inserted,
                        enrichment_failures,
                        error: None,
                        ..outcome(state, &day)
                    });
                }
                AttemptEnd::NotFound => {
                    state = transition(state, DayEvent::NotFound, attempts, self.settings.retry.max_attempts)?;
                    day.status = state.persisted_status();
                    day.last_error = Some(FetchError::NotFound.to_string());
                    self.persist(&day).await?;
                    tracing::info!(%date, "No digest published");
                    return Ok(outcome(state, &day));
                }
                AttemptEnd::Failed {
                    class,
                    error,
                    retry_after,
                } => {
                    state = transition(
                        state,
                        DayEvent::Failure(class),
                        attempts,
                        self.settings.retry.max_attempts,
                    )?;
                    day.status = state.persisted_status();
                    day.last_error = Some(error.clone());
                    self.persist(&day).await?;

                    if state == DayState::Failed {
                        tracing::error!(%date, attempts, error = %error, "Day failed");
                        return Ok(outcome(state, &day));
                    }

                    let delay = self.settings.retry.delay_for(attempts, retry_after);
                    tracing::warn!(
                        %date,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One pass from fetch to commit. Updates `state` as steps complete.
    async fn attempt(
        &self,
        day: &mut PublishingDay,
        state: &mut DayState,
    ) -> Result<AttemptEnd, RunError> {
        let max = self.settings.retry.max_attempts;
        let date = day.date;

        let raw = match self.source.fetch(date, &self.settings.newsletter_type).await {
            Ok(raw) => raw,
            Err(FetchError::NotFound) => return Ok(AttemptEnd::NotFound),
            Err(e) => {
                return Ok(AttemptEnd::Failed {
                    class: FailureClass::Retryable,
                    retry_after: e.retry_after(),
                    error: e.to_string(),
                })
            }
        };
        *state = transition(*state, DayEvent::Fetched, 0, max)?;
        day.status = state.persisted_status();
        self.persist(day).await?;

        let records = match self.parser.parse(&raw, self.settings.max_articles) {
            Ok(records) => records,
            Err(e @ ParseError::StructureChanged(_)) => {
                return Ok(AttemptEnd::Failed {
                    class: FailureClass::Fatal,
                    error: e.to_string(),
                    retry_after: None,
                })
            }
        };
        *state = transition(*state, DayEvent::Parsed, 0, max)?;
        day.status = state.persisted_status();
        self.persist(day).await?;

        let enriched = self
            .pipeline
            .enrich_all(records, self.settings.target_language.as_deref())
            .await;
        let enrichment_failures = enriched.iter().map(|a| a.failure_count()).sum();
        let articles: Vec<ArticleRecord> = enriched.into_iter().map(|a| a.record).collect();
        *state = transition(*state, DayEvent::Enriched, 0, max)?;
        day.status = state.persisted_status();
        self.persist(day).await?;

        let count = articles.len();
        day.last_error = None;
        let inserted = match self.db.commit_day(day, &articles).await {
            Ok(CommitOutcome::Committed { inserted }) => inserted,
            Ok(CommitOutcome::AlreadyStored) => {
                tracing::info!(%date, "Day was stored concurrently, nothing written");
                0
            }
            Err(StorageError::ConstraintViolation(msg)) => {
                tracing::warn!(%date, error = %msg, "Constraint violation on commit, treating day as already stored");
                // The transaction rolled back, so the status must be written on its own
                day.status = DayStatus::Stored;
                self.persist(day).await?;
                0
            }
            Err(e) => return Err(e.into()),
        };
        day.status = DayStatus::Stored;

        Ok(AttemptEnd::Stored {
            articles: count,
            inserted,
            enrichment_failures,
        })
    }

    async fn persist(&self, day: &PublishingDay) -> Result<(), RunError> {
        match self.db.upsert_day(day).await {
            Ok(_) => Ok(()),
            Err(StorageError::ConstraintViolation(msg)) => {
                tracing::warn!(date = %day.date, error = %msg, "Constraint violation recording day status");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
