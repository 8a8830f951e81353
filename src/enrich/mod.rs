//! Optional per-article enrichment: translation and audio narration.
//!
//! Enrichment never fails a day. Each stage yields a [`StageOutcome`] and the
//! article is stored with whatever fields succeeded. A translation quota error
//! trips a run-wide breaker held in [`EnrichmentContext`]; later articles then
//! skip translation without calling the service.

mod narrate;
mod translate;

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;

use crate::storage::ArticleRecord;

pub use narrate::{audio_path_for, CommandNarrator, Narrator, VoiceSettings};
pub use translate::{HttpTranslator, Translator, TranslatorSetupError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Translation,
    Narration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Translation => f.write_str("translation"),
            Stage::Narration => f.write_str("narration"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentErrorKind {
    /// The service refuses further work for this run (quota, billing, auth).
    QuotaExceeded,
    /// Worth retrying: timeouts, 429, 5xx, non-zero TTS exit.
    Transient,
    /// This input or setup cannot be handled (bad language, missing binary).
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed ({kind:?}): {message}")]
pub struct EnrichmentError {
    pub stage: Stage,
    pub kind: EnrichmentErrorKind,
    pub message: String,
}

impl EnrichmentError {
    pub fn new(stage: Stage, kind: EnrichmentErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == EnrichmentErrorKind::Transient
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No service configured or no target language set.
    NotConfigured,
    /// Translation was suspended earlier in this run.
    CircuitOpen,
    /// Nothing to process (empty text).
    NothingToDo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Done,
    Skipped(SkipReason),
    Failed(EnrichmentError),
}

impl StageOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }
}

/// An article plus what happened to it in each enrichment stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedArticle {
    pub record: ArticleRecord,
    pub translation: StageOutcome,
    pub narration: StageOutcome,
}

impl EnrichedArticle {
    pub fn failure_count(&self) -> usize {
        usize::from(self.translation.is_failed()) + usize::from(self.narration.is_failed())
    }
}

// ============================================================================
// Run-wide State
// ============================================================================

/// Shared state for one orchestrator run.
#[derive(Debug, Default)]
pub struct EnrichmentContext {
    translation_suspended: AtomicBool,
    suspension_reason: Mutex<Option<String>>,
}

impl EnrichmentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translation_suspended(&self) -> bool {
        self.translation_suspended.load(Ordering::Acquire)
    }

    pub fn suspension_reason(&self) -> Option<String> {
        self.suspension_reason
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Trips the translation breaker. Returns `true` only for the call that tripped it.
    pub fn suspend_translation(&self, reason: &str) -> bool {
        let first = !self.translation_suspended.swap(true, Ordering::AcqRel);
        if first {
            if let Ok(mut slot) = self.suspension_reason.lock() {
                *slot = Some(reason.to_string());
            }
        }
        first
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    pub audio_dir: PathBuf,
    /// Articles enriched in parallel within one day.
    pub concurrency: usize,
    /// Extra attempts per stage on transient errors.
    pub stage_retries: u32,
    pub stage_backoff: Duration,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("data/audio"),
            concurrency: 4,
            stage_retries: 2,
            stage_backoff: Duration::from_millis(500),
        }
    }
}

pub struct EnrichmentPipeline {
    translator: Option<Arc<dyn Translator>>,
    narrator: Option<Arc<dyn Narrator>>,
    context: Arc<EnrichmentContext>,
    settings: EnrichmentSettings,
}

impl EnrichmentPipeline {
    pub fn new(
        translator: Option<Arc<dyn Translator>>,
        narrator: Option<Arc<dyn Narrator>>,
        context: Arc<EnrichmentContext>,
        settings: EnrichmentSettings,
    ) -> Self {
        Self {
            translator,
            narrator,
            context,
            settings,
        }
    }

    /// A pipeline with both stages off; articles pass through untouched.
    pub fn disabled() -> Self {
        Self::new(
            None,
            None,
            Arc::new(EnrichmentContext::new()),
            EnrichmentSettings::default(),
        )
    }

    pub fn context(&self) -> &Arc<EnrichmentContext> {
        &self.context
    }

    /// Enriches one article. Never returns an error; failures are in the outcomes.
    pub async fn enrich(
        &self,
        mut record: ArticleRecord,
        target_language: Option<&str>,
    ) -> EnrichedArticle {
        let translation = match (target_language, &self.translator) {
            (Some(lang), Some(translator)) => {
                if self.context.translation_suspended() {
                    StageOutcome::Skipped(SkipReason::CircuitOpen)
                } else {
                    self.translate(translator.as_ref(), &mut record, lang).await
                }
            }
            _ => StageOutcome::Skipped(SkipReason::NotConfigured),
        };

        let narration = match &self.narrator {
            Some(narrator) => self.narrate(narrator.as_ref(), &mut record).await,
            None => StageOutcome::Skipped(SkipReason::NotConfigured),
        };

        EnrichedArticle {
            record,
            translation,
            narration,
        }
    }

    /// Enriches a day's articles with bounded parallelism, preserving input order.
    pub async fn enrich_all(
        &self,
        records: Vec<ArticleRecord>,
        target_language: Option<&str>,
    ) -> Vec<EnrichedArticle> {
        let lang = target_language;
        let mut indexed: Vec<(usize, EnrichedArticle)> = stream::iter(records.into_iter().enumerate())
            .map(|(i, record)| async move { (i, self.enrich(record, lang).await) })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, a)| a).collect()
    }

    async fn translate(
        &self,
        translator: &dyn Translator,
        record: &mut ArticleRecord,
        lang: &str,
    ) -> StageOutcome {
        if record.title.is_empty() && record.summary_raw.is_empty() {
            return StageOutcome::Skipped(SkipReason::NothingToDo);
        }

        // Title first; a failure on the summary keeps the translated title.
        let fields = [
            (record.title.clone(), true),
            (record.summary_raw.clone(), false),
        ];
        for (text, is_title) in fields {
            if text.is_empty() {
                continue;
            }
            match self
                .with_retries(|| translator.translate(&text, lang))
                .await
            {
                Ok(translated) if is_title => record.title_translated = Some(translated),
                Ok(translated) => record.summary_translated = Some(translated),
                Err(err) => {
                    if err.kind == EnrichmentErrorKind::QuotaExceeded
                        && self.context.suspend_translation(&err.message)
                    {
                        tracing::error!(
                            error = %err,
                            "Translation quota exhausted, suspending translation for the rest of the run"
                        );
                    } else {
                        tracing::warn!(url = %record.source_url, error = %err, "Translation failed");
                    }
                    return StageOutcome::Failed(err);
                }
            }
        }
        StageOutcome::Done
    }

    async fn narrate(&self, narrator: &dyn Narrator, record: &mut ArticleRecord) -> StageOutcome {
        let path = audio_path_for(&self.settings.audio_dir, record);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            record.audio_path = Some(path.display().to_string());
            return StageOutcome::Done;
        }

        let text = narration_text(record);
        if text.is_empty() {
            return StageOutcome::Skipped(SkipReason::NothingToDo);
        }

        match self.with_retries(|| narrator.narrate(&text, &path)).await {
            Ok(()) => {
                record.audio_path = Some(path.display().to_string());
                StageOutcome::Done
            }
            Err(err) => {
                tracing::warn!(url = %record.source_url, error = %err, "Narration failed");
                StageOutcome::Failed(err)
            }
        }
    }

    async fn with_retries<T, F, Fut>(&self, mut op: F) -> Result<T, EnrichmentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EnrichmentError>>,
    {
        let mut retry = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && retry < self.settings.stage_retries => {
                    let delay = self.settings.stage_backoff.saturating_mul(1 << retry.min(6));
                    tracing::debug!(
                        stage = %e.stage,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying enrichment stage after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Text read aloud: the translation when present, else the original.
fn narration_text(record: &ArticleRecord) -> String {
    let title = record.title_translated.as_deref().unwrap_or(&record.title);
    let summary = record
        .summary_translated
        .as_deref()
        .unwrap_or(&record.summary_raw);
    match (title.is_empty(), summary.is_empty()) {
        (true, true) => String::new(),
        (false, true) => title.to_string(),
        (true, false) => summary.to_string(),
        (false, false) => format!("{title}. {summary}"),
    }
}
