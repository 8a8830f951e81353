//! Static public-holiday rule tables, keyed by ISO country code.
//!
//! Rules are evaluated per year, so the tables never go stale and need no I/O.
//! Dates follow the national (not regional) calendars.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

#[derive(Debug, Clone, Copy)]
enum Rule {
    /// Same month/day every year.
    Fixed { month: u32, day: u32 },
    /// n-th weekday of a month; negative n counts from the end (-1 = last).
    NthWeekday { month: u32, weekday: Weekday, n: i8 },
    /// Days relative to Western Easter Sunday.
    Easter(i64),
    /// Last given weekday strictly before month/day (Canada's Victoria Day).
    WeekdayBefore { month: u32, day: u32, weekday: Weekday },
}

#[derive(Debug, Clone, Copy)]
struct HolidayRule {
    name: &'static str,
    rule: Rule,
    /// First year the holiday was observed.
    since: Option<i32>,
}

/// How a holiday falling on a weekend moves to a weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observance {
    /// Weekend holidays are lost.
    None,
    /// Saturday moves to Friday, Sunday to Monday (US federal).
    NearestWeekday,
    /// Moves to the next free weekday (UK and Canadian substitute days).
    NextFreeWeekday,
}

#[derive(Debug)]
pub(crate) struct CountryTable {
    pub(crate) code: &'static str,
    observance: Observance,
    rules: &'static [HolidayRule],
}

const fn fixed(name: &'static str, month: u32, day: u32) -> HolidayRule {
    HolidayRule { name, rule: Rule::Fixed { month, day }, since: None }
}

const fn nth(name: &'static str, month: u32, weekday: Weekday, n: i8) -> HolidayRule {
    HolidayRule { name, rule: Rule::NthWeekday { month, weekday, n }, since: None }
}

const fn easter(name: &'static str, offset: i64) -> HolidayRule {
    HolidayRule { name, rule: Rule::Easter(offset), since: None }
}

static US: CountryTable = CountryTable {
    code: "US",
    observance: Observance::NearestWeekday,
    rules: &[
        fixed("New Year's Day", 1, 1),
        nth("Martin Luther King Jr. Day", 1, Weekday::Mon, 3),
        nth("Presidents' Day", 2, Weekday::Mon, 3),
        nth("Memorial Day", 5, Weekday::Mon, -1),
        HolidayRule {
            name: "Juneteenth",
            rule: Rule::Fixed { month: 6, day: 19 },
            since: Some(2021),
        },
        fixed("Independence Day", 7, 4),
        nth("Labor Day", 9, Weekday::Mon, 1),
        nth("Columbus Day", 10, Weekday::Mon, 2),
        fixed("Veterans Day", 11, 11),
        nth("Thanksgiving Day", 11, Weekday::Thu, 4),
        fixed("Christmas Day", 12, 25),
    ],
};

static GB: CountryTable = CountryTable {
    code: "GB",
    observance: Observance::NextFreeWeekday,
    rules: &[
        fixed("New Year's Day", 1, 1),
        easter("Good Friday", -2),
        easter("Easter Monday", 1),
        nth("Early May Bank Holiday", 5, Weekday::Mon, 1),
        nth("Spring Bank Holiday", 5, Weekday::Mon, -1),
        nth("Summer Bank Holiday", 8, Weekday::Mon, -1),
        fixed("Christmas Day", 12, 25),
        fixed("Boxing Day", 12, 26),
    ],
};

static FR: CountryTable = CountryTable {
    code: "FR",
    observance: Observance::None,
    rules: &[
        fixed("Jour de l'an", 1, 1),
        easter("Lundi de Pâques", 1),
        fixed("Fête du Travail", 5, 1),
        fixed("Victoire 1945", 5, 8),
        easter("Ascension", 39),
        easter("Lundi de Pentecôte", 50),
        fixed("Fête nationale", 7, 14),
        fixed("Assomption", 8, 15),
        fixed("Toussaint", 11, 1),
        fixed("Armistice", 11, 11),
        fixed("Noël", 12, 25),
    ],
};

static DE: CountryTable = CountryTable {
    code: "DE",
    observance: Observance::None,
    rules: &[
        fixed("Neujahr", 1, 1),
        easter("Karfreitag", -2),
        easter("Ostermontag", 1),
        fixed("Tag der Arbeit", 5, 1),
        easter("Christi Himmelfahrt", 39),
        easter("Pfingstmontag", 50),
        fixed("Tag der Deutschen Einheit", 10, 3),
        fixed("Erster Weihnachtstag", 12, 25),
        fixed("Zweiter Weihnachtstag", 12, 26),
    ],
};

static CA: CountryTable = CountryTable {
    code: "CA",
    observance: Observance::NextFreeWeekday,
    rules: &[
        fixed("New Year's Day", 1, 1),
        easter("Good Friday", -2),
        HolidayRule {
            name: "Victoria Day",
            rule: Rule::WeekdayBefore { month: 5, day: 25, weekday: Weekday::Mon },
            since: None,
        },
        fixed("Canada Day", 7, 1),
        nth("Labour Day", 9, Weekday::Mon, 1),
        nth("Thanksgiving", 10, Weekday::Mon, 2),
        fixed("Christmas Day", 12, 25),
        fixed("Boxing Day", 12, 26),
    ],
};

static TABLES: &[&CountryTable] = &[&US, &GB, &FR, &DE, &CA];

/// Looks up the rule table for a country code (case-insensitive).
pub(crate) fn table_for(country_code: &str) -> Option<&'static CountryTable> {
    TABLES
        .iter()
        .copied()
        .find(|t| t.code.eq_ignore_ascii_case(country_code))
}

/// Country codes with a built-in table.
pub fn supported_countries() -> impl Iterator<Item = &'static str> {
    TABLES.iter().map(|t| t.code)
}

impl CountryTable {
    /// All non-publishing holiday dates whose *observed* date falls in `year`.
    ///
    /// Observed dates can spill across a year boundary (US New Year's Day on a
    /// Saturday is observed on Dec 31), so the following year's rules are
    /// evaluated too and filtered back down.
    pub(crate) fn holidays_in_year(&self, year: i32) -> Vec<(NaiveDate, &'static str)> {
        let mut out: Vec<(NaiveDate, &'static str)> = self
            .observed_for_rule_year(year)
            .into_iter()
            .chain(self.observed_for_rule_year(year + 1))
            .filter(|(d, _)| d.year() == year)
            .collect();
        out.sort_by_key(|(d, _)| *d);
        out.dedup_by_key(|(d, _)| *d);
        out
    }

    fn observed_for_rule_year(&self, year: i32) -> Vec<(NaiveDate, &'static str)> {
        let mut actual: Vec<(NaiveDate, &'static str)> = self
            .rules
            .iter()
            .filter(|r| r.since.map_or(true, |since| year >= since))
            .filter_map(|r| r.rule.date_in(year).map(|d| (d, r.name)))
            .collect();
        actual.sort_by_key(|(d, _)| *d);

        let mut observed = Vec::with_capacity(actual.len() * 2);
        match self.observance {
            Observance::None => observed.extend(actual),
            Observance::NearestWeekday => {
                for (date, name) in actual {
                    observed.push((date, name));
                    match date.weekday() {
                        Weekday::Sat => observed.push((date - Duration::days(1), name)),
                        Weekday::Sun => observed.push((date + Duration::days(1), name)),
                        _ => {}
                    }
                }
            }
            Observance::NextFreeWeekday => {
                let taken: Vec<NaiveDate> = actual.iter().map(|(d, _)| *d).collect();
                let mut substitutes: Vec<NaiveDate> = Vec::new();
                for (date, name) in actual {
                    observed.push((date, name));
                    if is_weekend(date) {
                        let mut sub = date + Duration::days(1);
                        while is_weekend(sub) || taken.contains(&sub) || substitutes.contains(&sub) {
                            sub += Duration::days(1);
                        }
                        substitutes.push(sub);
                        observed.push((sub, name));
                    }
                }
            }
        }
        observed
    }
}

impl Rule {
    fn date_in(self, year: i32) -> Option<NaiveDate> {
        match self {
            Rule::Fixed { month, day } => NaiveDate::from_ymd_opt(year, month, day),
            Rule::NthWeekday { month, weekday, n } if n > 0 => {
                NaiveDate::from_weekday_of_month_opt(year, month, weekday, n as u8)
            }
            Rule::NthWeekday { month, weekday, .. } => last_weekday_of_month(year, month, weekday),
            Rule::Easter(offset) => easter_sunday(year).map(|e| e + Duration::days(offset)),
            Rule::WeekdayBefore { month, day, weekday } => {
                let anchor = NaiveDate::from_ymd_opt(year, month, day)?;
                let mut d = anchor - Duration::days(1);
                while d.weekday() != weekday {
                    d -= Duration::days(1);
                }
                Some(d)
            }
        }
    }
}

pub(crate) fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let mut d = NaiveDate::from_ymd_opt(ny, nm, 1)? - Duration::days(1);
    while d.weekday() != weekday {
        d -= Duration::days(1);
    }
    Some(d)
}

/// Western (Gregorian) Easter Sunday, anonymous Gregorian algorithm.
pub(crate) fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}
