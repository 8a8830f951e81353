use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// How long to wait between attempts at the same day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed per day per run.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(60_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, after `attempts_used` attempts (1-based).
    ///
    /// A server `Retry-After` hint can only lengthen the delay, and the result
    /// never exceeds `max_delay`.
    pub fn delay_for(&self, attempts_used: u32, retry_after: Option<Duration>) -> Duration {
        let computed = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let exp = attempts_used.saturating_sub(1).min(16);
                self.base_delay.saturating_mul(1u32 << exp)
            }
        };
        computed
            .max(retry_after.unwrap_or(Duration::ZERO))
            .min(self.max_delay)
    }
}

/// Attempts spent per (date, newsletter_type) in the current run.
///
/// Separate from the persisted `attempt_count`, which is cumulative across runs.
#[derive(Debug, Default)]
pub struct RetryLedger {
    attempts: HashMap<(NaiveDate, String), u32>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one attempt and returns the attempts used so far.
    pub fn record_attempt(&mut self, date: NaiveDate, newsletter_type: &str) -> u32 {
        let n = self
            .attempts
            .entry((date, newsletter_type.to_string()))
            .or_insert(0);
        *n += 1;
        *n
    }
}
