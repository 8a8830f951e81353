//! Publishing-day resolution: which calendar dates a digest is expected on.
//!
//! A date is a publishing day unless it falls on a weekend or on a holiday in
//! the configured country's calendar. The holiday calendar is built once at
//! startup from a static rule table (see [`holidays`]) plus any extra dates
//! the operator configured, and never changes during a run.
//!
//! Enumeration is lazy and ascending; the orchestrator relies on that order
//! when it logs where a run resumed.

mod holidays;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};

pub use holidays::supported_countries;
use holidays::{is_weekend, table_for, CountryTable};

/// How far `next_publishing_day` / `previous_publishing_day` will search.
pub const MAX_SEARCH_DAYS: i64 = 14;

/// Non-fatal configuration problem detected while building a calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No holiday table exists for this country; only weekends are skipped.
    UnknownCountry(String),
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::UnknownCountry(code) => write!(
                f,
                "no holiday table for country '{code}' (known: {}), falling back to weekend-only rules",
                supported_countries().collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

/// Why a calendar date is or is not a publishing day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayKind {
    Publishing,
    Weekend,
    Holiday,
}

/// Immutable set of non-publishing holiday dates for one country.
#[derive(Debug, Clone)]
pub struct HolidayCalendar {
    country_code: String,
    table: Option<&'static CountryTable>,
    extra: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    /// Builds the calendar for `country_code`.
    ///
    /// An unknown code still yields a usable (weekend-only plus `extra`)
    /// calendar, together with a [`ConfigWarning`] for the caller to report.
    pub fn for_country(
        country_code: &str,
        extra: impl IntoIterator<Item = NaiveDate>,
    ) -> (Self, Option<ConfigWarning>) {
        let table = table_for(country_code);
        let warning = table
            .is_none()
            .then(|| ConfigWarning::UnknownCountry(country_code.to_string()));

        let calendar = Self {
            country_code: country_code.to_ascii_uppercase(),
            table,
            extra: extra.into_iter().collect(),
        };
        (calendar, warning)
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    /// True if the date is a (observed) holiday or an operator-configured extra date.
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        if self.extra.contains(&date) {
            return true;
        }
        self.table.is_some_and(|t| {
            t.holidays_in_year(date.year())
                .iter()
                .any(|(d, _)| *d == date)
        })
    }

    /// Name of the holiday on `date`, if any.
    pub fn holiday_name(&self, date: NaiveDate) -> Option<&'static str> {
        if self.extra.contains(&date) {
            return Some("configured holiday");
        }
        self.table.and_then(|t| {
            t.holidays_in_year(date.year())
                .into_iter()
                .find(|(d, _)| *d == date)
                .map(|(_, name)| name)
        })
    }
}

/// Decides publishing days for a single country.
#[derive(Debug, Clone)]
pub struct BusinessDayResolver {
    calendar: HolidayCalendar,
}

impl BusinessDayResolver {
    pub fn new(calendar: HolidayCalendar) -> Self {
        Self { calendar }
    }

    /// Builds a resolver from a country code, logging a warning for unknown codes.
    pub fn for_country(country_code: &str, extra: impl IntoIterator<Item = NaiveDate>) -> Self {
        let (calendar, warning) = HolidayCalendar::for_country(country_code, extra);
        if let Some(w) = warning {
            tracing::warn!(country = %country_code, "{}", w);
        }
        Self::new(calendar)
    }

    pub fn calendar(&self) -> &HolidayCalendar {
        &self.calendar
    }

    pub fn classify(&self, date: NaiveDate) -> DayKind {
        if is_weekend(date) {
            DayKind::Weekend
        } else if self.calendar.is_holiday(date) {
            DayKind::Holiday
        } else {
            DayKind::Publishing
        }
    }

    pub fn is_publishing_day(&self, date: NaiveDate) -> bool {
        self.classify(date) == DayKind::Publishing
    }

    /// Lazily enumerates publishing days in `[start, end]`, ascending.
    ///
    /// The iterator is `Clone`, so a consumer can restart from the beginning
    /// without recomputing anything up front.
    pub fn enumerate_publishing_days(&self, start: NaiveDate, end: NaiveDate) -> PublishingDays<'_> {
        PublishingDays {
            walk: self.walk(start, end),
        }
    }

    /// Every calendar date in `[start, end]` paired with its [`DayKind`].
    pub fn walk(&self, start: NaiveDate, end: NaiveDate) -> CalendarWalk<'_> {
        CalendarWalk {
            resolver: self,
            next: (start <= end).then_some(start),
            end,
        }
    }

    /// First publishing day strictly after `date`, within [`MAX_SEARCH_DAYS`].
    pub fn next_publishing_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        (1..=MAX_SEARCH_DAYS)
            .map(|n| date + Duration::days(n))
            .find(|d| self.is_publishing_day(*d))
    }

    /// Last publishing day strictly before `date`, within [`MAX_SEARCH_DAYS`].
    pub fn previous_publishing_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        (1..=MAX_SEARCH_DAYS)
            .map(|n| date - Duration::days(n))
            .find(|d| self.is_publishing_day(*d))
    }
}

/// Stateless convenience check using only the built-in table for `country_code`.
pub fn is_publishing_day(date: NaiveDate, country_code: &str) -> bool {
    let (calendar, _) = HolidayCalendar::for_country(country_code, []);
    BusinessDayResolver::new(calendar).is_publishing_day(date)
}

/// First and last date of a month, or `None` for an invalid month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let last = NaiveDate::from_ymd_opt(ny, nm, 1)? - Duration::days(1);
    Some((first, last))
}

/// Iterator over `(date, kind)` for each day of a range.
#[derive(Debug, Clone)]
pub struct CalendarWalk<'a> {
    resolver: &'a BusinessDayResolver,
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for CalendarWalk<'_> {
    type Item = (NaiveDate, DayKind);

    fn next(&mut self) -> Option<Self::Item> {
        let date = self.next?;
        self.next = date.succ_opt().filter(|d| *d <= self.end);
        Some((date, self.resolver.classify(date)))
    }
}

/// Iterator over publishing days of a range.
#[derive(Debug, Clone)]
pub struct PublishingDays<'a> {
    walk: CalendarWalk<'a>,
}

impl Iterator for PublishingDays<'_> {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<Self::Item> {
        self.walk
            .by_ref()
            .find(|(_, kind)| *kind == DayKind::Publishing)
            .map(|(date, _)| date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn us() -> BusinessDayResolver {
        BusinessDayResolver::for_country("US", [])
    }

    #[test]
    fn test_first_week_of_2024_us() {
        let days: Vec<_> = us()
            .enumerate_publishing_days(d(2024, 1, 1), d(2024, 1, 7))
            .collect();
        assert_eq!(
            days,
            vec![d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4), d(2024, 1, 5)]
        );
    }

    #[test]
    fn test_enumeration_is_restartable() {
        let resolver = us();
        let iter = resolver.enumerate_publishing_days(d(2024, 2, 1), d(2024, 2, 29));
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 20); // 21 weekdays minus Presidents' Day
    }

    #[test]
    fn test_empty_when_start_after_end() {
        assert_eq!(
            us().enumerate_publishing_days(d(2024, 1, 7), d(2024, 1, 1))
                .count(),
            0
        );
    }

    #[test]
    fn test_single_day_range() {
        let days: Vec<_> = us()
            .enumerate_publishing_days(d(2024, 1, 2), d(2024, 1, 2))
            .collect();
        assert_eq!(days, vec![d(2024, 1, 2)]);
    }

    #[test]
    fn test_unknown_country_falls_back_to_weekends() {
        let (calendar, warning) = HolidayCalendar::for_country("ZZ", []);
        assert_eq!(warning, Some(ConfigWarning::UnknownCountry("ZZ".into())));
        let resolver = BusinessDayResolver::new(calendar);
        assert!(resolver.is_publishing_day(d(2024, 1, 1)));
        assert!(!resolver.is_publishing_day(d(2024, 1, 6)));
    }

    #[test]
    fn test_extra_holidays_respected() {
        let resolver = BusinessDayResolver::for_country("US", [d(2024, 1, 3)]);
        assert_eq!(resolver.classify(d(2024, 1, 3)), DayKind::Holiday);
        assert_eq!(
            resolver.calendar().holiday_name(d(2024, 1, 3)),
            Some("configured holiday")
        );
    }

    #[test]
    fn test_walk_classifies_every_day() {
        let kinds: Vec<_> = us()
            .walk(d(2024, 1, 1), d(2024, 1, 7))
            .map(|(_, k)| k)
            .collect();
        assert_eq!(
            kinds,
            vec![
                DayKind::Holiday,
                DayKind::Publishing,
                DayKind::Publishing,
                DayKind::Publishing,
                DayKind::Publishing,
                DayKind::Weekend,
                DayKind::Weekend,
            ]
        );
    }

    #[test]
    fn test_next_and_previous_skip_weekend_and_holiday() {
        let resolver = us();
        // Fri 2023-12-29 → next is Tue 2024-01-02 (weekend + New Year's Day)
        assert_eq!(
            resolver.next_publishing_day(d(2023, 12, 29)),
            Some(d(2024, 1, 2))
        );
        assert_eq!(
            resolver.previous_publishing_day(d(2024, 1, 2)),
            Some(d(2023, 12, 29))
        );
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(month_bounds(2024, 2), Some((d(2024, 2, 1), d(2024, 2, 29))));
        assert_eq!(
            month_bounds(2023, 12),
            Some((d(2023, 12, 1), d(2023, 12, 31)))
        );
        assert_eq!(month_bounds(2024, 13), None);
    }

    #[test]
    fn test_free_function_matches_resolver() {
        assert!(!is_publishing_day(d(2024, 7, 4), "US"));
        assert!(is_publishing_day(d(2024, 7, 4), "FR"));
        assert!(!is_publishing_day(d(2024, 7, 14), "FR")); // Sunday anyway
    }

    proptest! {
        #[test]
        fn prop_weekends_and_holidays_never_publish(
            offset in 0i64..(365 * 30),
            country in prop::sample::select(vec!["US", "GB", "FR", "DE", "CA", "ZZ"]),
        ) {
            let date = d(2000, 1, 1) + Duration::days(offset);
            let (calendar, _) = HolidayCalendar::for_country(country, []);
            let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
            if weekend || calendar.is_holiday(date) {
                prop_assert!(!is_publishing_day(date, country));
            } else {
                prop_assert!(is_publishing_day(date, country));
            }
        }

        #[test]
        fn prop_enumeration_ascending_and_within_range(
            offset in 0i64..3650,
            len in 0i64..90,
        ) {
            let start = d(2015, 1, 1) + Duration::days(offset);
            let end = start + Duration::days(len);
            let resolver = BusinessDayResolver::for_country("US", []);
            let days: Vec<_> = resolver.enumerate_publishing_days(start, end).collect();
            prop_assert!(days.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(days.iter().all(|d| *d >= start && *d <= end));
        }
    }
}
