use std::fmt;

use thiserror::Error;

use crate::storage::DayStatus;

/// In-memory processing state of one publishing day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayState {
    Pending,
    Fetching,
    Parsing,
    Enriching,
    Storing,
    Stored,
    Failed,
    SkippedHoliday,
    NotPublished,
}

impl DayState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DayState::Stored | DayState::Failed | DayState::SkippedHoliday | DayState::NotPublished
        )
    }

    /// Status written to the store while in this state.
    ///
    /// Each in-flight state persists the last step that completed.
    pub fn persisted_status(self) -> DayStatus {
        match self {
            DayState::Pending | DayState::Fetching => DayStatus::Pending,
            DayState::Parsing => DayStatus::Fetched,
            DayState::Enriching => DayStatus::Parsed,
            DayState::Storing => DayStatus::Enriched,
            DayState::Stored => DayStatus::Stored,
            DayState::Failed => DayStatus::Failed,
            DayState::SkippedHoliday => DayStatus::SkippedHoliday,
            DayState::NotPublished => DayStatus::NotPublished,
        }
    }
}

impl fmt::Display for DayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DayState::Pending => "pending",
            DayState::Fetching => "fetching",
            DayState::Parsing => "parsing",
            DayState::Enriching => "enriching",
            DayState::Storing => "storing",
            DayState::Stored => "stored",
            DayState::Failed => "failed",
            DayState::SkippedHoliday => "skipped_holiday",
            DayState::NotPublished => "not_published",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retried until the per-day attempt budget runs out.
    Retryable,
    /// Fails the day immediately.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayEvent {
    /// The calendar says no digest is published on this date.
    NotPublishingDay,
    StartAttempt,
    Fetched,
    /// The source confirmed there is no digest for this date.
    NotFound,
    Parsed,
    Enriched,
    Committed,
    Failure(FailureClass),
    /// A previously failed day is picked up again by a later run.
    Requeue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} in state {from}")]
pub struct InvalidTransition {
    pub from: DayState,
    pub event: DayEvent,
}

/// Computes the next state. Pure; the orchestrator owns persistence.
///
/// `attempts_used` counts attempts already made for this day in the current
/// run, including the one that just failed. A retryable failure goes back to
/// `Pending` while `attempts_used < max_attempts`, otherwise to `Failed`.
pub fn transition(
    from: DayState,
    event: DayEvent,
    attempts_used: u32,
    max_attempts: u32,
) -> Result<DayState, InvalidTransition> {
    use DayEvent as E;
    use DayState as S;

    let next = match (from, event) {
        (S::Pending, E::NotPublishingDay) => S::SkippedHoliday,
        (S::Pending, E::StartAttempt) => S::Fetching,
        (S::Fetching, E::Fetched) => S::Parsing,
        (S::Fetching, E::NotFound) => S::NotPublished,
        (S::Parsing, E::Parsed) => S::Enriching,
        (S::Enriching, E::Enriched) => S::Storing,
        (S::Storing, E::Committed) => S::Stored,
        (S::Fetching | S::Parsing | S::Enriching | S::Storing, E::Failure(class)) => match class {
            FailureClass::Retryable if attempts_used < max_attempts => S::Pending,
            _ => S::Failed,
        },
        (S::Failed, E::Requeue) => S::Pending,
        _ => return Err(InvalidTransition { from, event }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_happy_path() {
        let mut s = DayState::Pending;
        for event in [
            DayEvent::StartAttempt,
            DayEvent::Fetched,
            DayEvent::Parsed,
            DayEvent::Enriched,
            DayEvent::Committed,
        ] {
            s = transition(s, event, 1, 3).unwrap();
        }
        assert_eq!(s, DayState::Stored);
    }

    #[test]
    fn test_holiday_and_not_found() {
        assert_eq!(
            transition(DayState::Pending, DayEvent::NotPublishingDay, 0, 3).unwrap(),
            DayState::SkippedHoliday
        );
        assert_eq!(
            transition(DayState::Fetching, DayEvent::NotFound, 1, 3).unwrap(),
            DayState::NotPublished
        );
    }

    #[test]
    fn test_retryable_failure_respects_budget() {
        let retry = DayEvent::Failure(FailureClass::Retryable);
        assert_eq!(transition(DayState::Fetching, retry, 1, 3).unwrap(), DayState::Pending);
        assert_eq!(transition(DayState::Fetching, retry, 2, 3).unwrap(), DayState::Pending);
        assert_eq!(transition(DayState::Fetching, retry, 3, 3).unwrap(), DayState::Failed);
        assert_eq!(transition(DayState::Storing, retry, 1, 1).unwrap(), DayState::Failed);
    }

    #[test]
    fn test_fatal_failure_is_immediate() {
        let fatal = DayEvent::Failure(FailureClass::Fatal);
        assert_eq!(transition(DayState::Parsing, fatal, 1, 10).unwrap(), DayState::Failed);
    }

    #[test]
    fn test_requeue_only_from_failed() {
        assert_eq!(
            transition(DayState::Failed, DayEvent::Requeue, 0, 3).unwrap(),
            DayState::Pending
        );
        assert!(transition(DayState::Stored, DayEvent::Requeue, 0, 3).is_err());
    }

    #[test]
    fn test_terminal_states_reject_everything_else() {
        let events = [
            DayEvent::NotPublishingDay,
            DayEvent::StartAttempt,
            DayEvent::Fetched,
            DayEvent::NotFound,
            DayEvent::Parsed,
            DayEvent::Enriched,
            DayEvent::Committed,
            DayEvent::Failure(FailureClass::Retryable),
            DayEvent::Failure(FailureClass::Fatal),
        ];
        for state in [DayState::Stored, DayState::SkippedHoliday, DayState::NotPublished] {
            for event in events {
                assert!(transition(state, event, 0, 3).is_err(), "{state} {event:?}");
            }
        }
    }

    #[test]
    fn test_steps_cannot_be_skipped() {
        assert!(transition(DayState::Pending, DayEvent::Committed, 0, 3).is_err());
        assert!(transition(DayState::Fetching, DayEvent::Parsed, 1, 3).is_err());
        assert!(transition(DayState::Pending, DayEvent::Failure(FailureClass::Fatal), 0, 3).is_err());
    }

    #[test]
    fn test_persisted_status_mapping() {
        assert_eq!(DayState::Fetching.persisted_status(), DayStatus::Pending);
        assert_eq!(DayState::Parsing.persisted_status(), DayStatus::Fetched);
        assert_eq!(DayState::Storing.persisted_status(), DayStatus::Enriched);
        assert_eq!(DayState::NotPublished.persisted_status(), DayStatus::NotPublished);
    }
}
