//! Calendar time-expression value object
//!
//! This module implements `TimeSpec`, the five-field cron-like calendar
//! expression (minute, hour, day-of-month, month, day-of-week) together with
//! the `@hourly`/`@daily`/`@weekly`/`@monthly`/`@yearly` aliases, and a lazy
//! generator that produces the increasing sequence of timestamps matching it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing or validating a [`TimeSpec`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeSpecError {
    #[error("malformed time expression: {0:?}")]
    Malformed(String),
    #[error("invalid {field} value: {value:?}")]
    InvalidValue { field: &'static str, value: String },
    #[error("{field} value {value} not in range ({min}-{max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("{field} last value {value} not in range ({lo}-{hi})")]
    InvalidRange {
        field: &'static str,
        value: i64,
        lo: i64,
        hi: i64,
    },
    #[error("{field} step value {value} not in range (1-{max})")]
    InvalidStep {
        field: &'static str,
        value: i64,
        max: i64,
    },
    #[error("{field} except value {value} not in range ({lo}-{hi})")]
    ExceptOutOfRange {
        field: &'static str,
        value: i64,
        lo: i64,
        hi: i64,
    },
}

fn asterisk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\*(?:/(\d+))?$").unwrap())
}

fn single_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-zA-Z0-9]+)$").unwrap())
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-zA-Z0-9]+)-([a-zA-Z0-9]+)(?:/(\d+))?((?:~[a-zA-Z0-9]+)*)$").unwrap()
    })
}

fn except_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"~([a-zA-Z0-9]+)").unwrap())
}

fn month_names() -> &'static [(&'static str, u32)] {
    &[
        ("jan", 1),
        ("feb", 2),
        ("mar", 3),
        ("apr", 4),
        ("may", 5),
        ("jun", 6),
        ("jul", 7),
        ("aug", 8),
        ("sep", 9),
        ("oct", 10),
        ("nov", 11),
        ("dec", 12),
    ]
}

fn weekday_names() -> &'static [(&'static str, u32)] {
    &[
        ("sun", 0),
        ("mon", 1),
        ("tue", 2),
        ("wed", 3),
        ("thu", 4),
        ("fri", 5),
        ("sat", 6),
    ]
}

fn lookup_name(names: &[(&'static str, u32)], value: &str) -> Option<u32> {
    names
        .iter()
        .find(|(name, _)| *name == value)
        .map(|(_, n)| *n)
}

/// Parses one atom (`*`, `*/step`, `n`, or `lo-hi[/step][~exc]*`) found in a
/// comma-separated field, resolving symbolic names against `names` if given.
fn parse_atom(
    field: &'static str,
    min: i64,
    max: i64,
    atom: &str,
    names: &[(&'static str, u32)],
) -> Result<BTreeSet<u32>, TimeSpecError> {
    let resolve = |field: &'static str, token: &str| -> Result<i64, TimeSpecError> {
        if let Ok(n) = token.parse::<i64>() {
            return Ok(n);
        }
        lookup_name(names, token)
            .map(|n| n as i64)
            .ok_or_else(|| TimeSpecError::InvalidValue {
                field,
                value: token.to_string(),
            })
    };

    if let Some(caps) = asterisk_re().captures(atom) {
        let step = caps
            .get(1)
            .map(|m| m.as_str().parse::<i64>().unwrap())
            .unwrap_or(1);
        if !(1..max).contains(&step) {
            return Err(TimeSpecError::InvalidStep {
                field,
                value: step,
                max: max - 1,
            });
        }
        let mut set = BTreeSet::new();
        let mut v = min;
        while v < max {
            set.insert(v as u32);
            v += step;
        }
        return Ok(set);
    }

    if let Some(caps) = range_re().captures(atom) {
        let first = resolve(field, &caps[1])?;
        if !(min..max).contains(&first) {
            return Err(TimeSpecError::OutOfRange {
                field,
                value: first,
                min,
                max: max - 1,
            });
        }
        let last = resolve(field, &caps[2])?;
        if !(first..max).contains(&last) {
            return Err(TimeSpecError::InvalidRange {
                field,
                value: last,
                lo: first,
                hi: max - 1,
            });
        }
        let step = caps
            .get(3)
            .map(|m| m.as_str().parse::<i64>().unwrap())
            .unwrap_or(1);
        if !(1..max).contains(&step) {
            return Err(TimeSpecError::InvalidStep {
                field,
                value: step,
                max: max - 1,
            });
        }

        let mut exceptions = BTreeSet::new();
        for exc in except_re().captures_iter(&caps[4]) {
            let value = resolve(field, &exc[1])?;
            if !(first..=last).contains(&value) {
                return Err(TimeSpecError::ExceptOutOfRange {
                    field,
                    value,
                    lo: first,
                    hi: last,
                });
            }
            exceptions.insert(value);
        }

        let mut set = BTreeSet::new();
        let mut v = first;
        while v <= last {
            if !exceptions.contains(&v) {
                set.insert(v as u32);
            }
            v += step;
        }
        return Ok(set);
    }

    if single_re().is_match(atom) {
        let value = resolve(field, atom)?;
        if !(min..max).contains(&value) {
            return Err(TimeSpecError::OutOfRange {
                field,
                value,
                min,
                max: max - 1,
            });
        }
        let mut set = BTreeSet::new();
        set.insert(value as u32);
        return Ok(set);
    }

    Err(TimeSpecError::InvalidValue {
        field,
        value: atom.to_string(),
    })
}

fn parse_field(
    field: &'static str,
    min: i64,
    max: i64,
    value: &str,
    names: &[(&'static str, u32)],
) -> Result<BTreeSet<u32>, TimeSpecError> {
    let mut result = BTreeSet::new();
    for atom in value.split(',') {
        result.extend(parse_atom(field, min, max, atom, names)?);
    }
    Ok(result)
}

/// A five-field calendar expression: minute, hour, day-of-month, month, and
/// day-of-week, plus the original string for display and round-tripping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSpec {
    raw: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl TimeSpec {
    /// Parses a five-field spec or one of the `@`-aliases. `@reboot` is a
    /// sentinel recognized upstream by the crontab loader, not here.
    pub fn parse(value: &str) -> Result<Self, TimeSpecError> {
        let canonical = match value.trim() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };

        let fields: Vec<&str> = canonical.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(TimeSpecError::Malformed(value.to_string()));
        };

        let day_of_month_restricted = *dom != "*";
        let day_of_week_restricted = *dow != "*";

        let minutes = parse_field("minute", 0, 60, minute, &[])?;
        let hours = parse_field("hour", 0, 24, hour, &[])?;
        let days_of_month = parse_field("day of month", 1, 32, dom, &[])?;
        let months = parse_field("month", 1, 13, month, month_names())?;
        let mut days_of_week = parse_field("day of week", 0, 8, dow, weekday_names())?;
        // Both 0 and 7 denote Sunday.
        if days_of_week.remove(&7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            raw: value.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            day_of_month_restricted,
            day_of_week_restricted,
        })
    }

    /// Whether `dt` (truncated to the minute) satisfies this expression.
    pub fn matches(&self, dt: NaiveDateTime) -> bool {
        if !self.minutes.contains(&dt.minute()) {
            return false;
        }
        if !self.hours.contains(&dt.hour()) {
            return false;
        }
        if !self.months.contains(&dt.month()) {
            return false;
        }

        let dom_match = self.days_of_month.contains(&dt.day());
        let dow_match = self
            .days_of_week
            .contains(&dt.weekday().num_days_from_sunday());

        match (self.day_of_month_restricted, self.day_of_week_restricted) {
            (true, true) => dom_match || dow_match,
            (true, false) => dom_match,
            (false, true) => dow_match,
            (false, false) => true,
        }
    }

    /// Finds the first matching minute strictly after `after`, bounded to
    /// avoid looping forever on an impossible expression (e.g. Feb 30th).
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let limit = after + Duration::days(366 * 8);
        let mut candidate = truncate_to_minute(after) + Duration::minutes(1);

        loop {
            if candidate > limit {
                return None;
            }
            if !self.months.contains(&candidate.month()) {
                candidate = start_of_next_month(candidate);
                continue;
            }
            if !self.day_matches(candidate) {
                candidate = start_of_next_day(candidate);
                continue;
            }
            if !self.hours.contains(&candidate.hour()) {
                candidate = start_of_next_hour(candidate);
                continue;
            }
            if !self.minutes.contains(&candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate);
        }
    }

    fn day_matches(&self, dt: NaiveDateTime) -> bool {
        let dom_match = self.days_of_month.contains(&dt.day());
        let dow_match = self
            .days_of_week
            .contains(&dt.weekday().num_days_from_sunday());
        match (self.day_of_month_restricted, self.day_of_week_restricted) {
            (true, true) => dom_match || dow_match,
            (true, false) => dom_match,
            (false, true) => dow_match,
            (false, false) => true,
        }
    }

    /// A lazy, infinite iterator of increasing matching timestamps.
    pub fn generator(&self, start: NaiveDateTime) -> CalendarGenerator<'_> {
        CalendarGenerator {
            spec: self,
            cursor: start,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn truncate_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_second(0).unwrap().with_nanosecond(0).unwrap()
}

fn start_of_next_month(dt: NaiveDateTime) -> NaiveDateTime {
    let (year, month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    dt.with_year(year)
        .unwrap()
        .with_month(month)
        .unwrap()
        .with_day(1)
        .unwrap()
        .with_hour(0)
        .unwrap()
        .with_minute(0)
        .unwrap()
        .with_second(0)
        .unwrap()
}

fn start_of_next_day(dt: NaiveDateTime) -> NaiveDateTime {
    (dt + Duration::days(1))
        .with_hour(0)
        .unwrap()
        .with_minute(0)
        .unwrap()
        .with_second(0)
        .unwrap()
}

fn start_of_next_hour(dt: NaiveDateTime) -> NaiveDateTime {
    (dt + Duration::hours(1))
        .with_minute(0)
        .unwrap()
        .with_second(0)
        .unwrap()
}

/// Lazy generator over the timestamps matching a [`TimeSpec`].
pub struct CalendarGenerator<'a> {
    spec: &'a TimeSpec,
    cursor: NaiveDateTime,
}

impl<'a> Iterator for CalendarGenerator<'a> {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<NaiveDateTime> {
        let next = self.spec.next_after(self.cursor)?;
        self.cursor = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn parses_aliases() {
        let daily = TimeSpec::parse("@daily").unwrap();
        assert!(daily.matches(dt(2024, 3, 1, 0, 0)));
        assert!(!daily.matches(dt(2024, 3, 1, 0, 1)));

        let weekly = TimeSpec::parse("@weekly").unwrap();
        // 2024-03-03 is a Sunday.
        assert!(weekly.matches(dt(2024, 3, 3, 0, 0)));
        assert!(!weekly.matches(dt(2024, 3, 4, 0, 0)));

        let monthly = TimeSpec::parse("@monthly").unwrap();
        assert!(monthly.matches(dt(2024, 3, 1, 0, 0)));
        assert!(!monthly.matches(dt(2024, 3, 2, 0, 0)));

        let hourly = TimeSpec::parse("@hourly").unwrap();
        assert!(hourly.matches(dt(2024, 3, 1, 5, 0)));
        assert!(!hourly.matches(dt(2024, 3, 1, 5, 1)));
    }

    #[test]
    fn day_field_union_semantics() {
        // Every Sunday AND every second day of month.
        let spec = TimeSpec::parse("0 0 */2 * sun").unwrap();
        // 2024-03-03 is a Sunday but an odd day of month.
        assert!(spec.matches(dt(2024, 3, 3, 0, 0)));
        // 2024-03-04 is a Monday but an even day of month.
        assert!(spec.matches(dt(2024, 3, 4, 0, 0)));
        // 2024-03-05 is neither.
        assert!(!spec.matches(dt(2024, 3, 5, 0, 0)));
    }

    #[test]
    fn day_field_single_restriction() {
        let spec = TimeSpec::parse("0 0 1 * *").unwrap();
        assert!(spec.matches(dt(2024, 3, 1, 0, 0)));
        assert!(!spec.matches(dt(2024, 3, 3, 0, 0)));
    }

    #[test]
    fn rejects_bad_range() {
        let err = TimeSpec::parse("0 0 10-5 * *").unwrap_err();
        assert!(matches!(err, TimeSpecError::InvalidRange { .. }));
    }

    #[test]
    fn rejects_out_of_range_step() {
        let err = TimeSpec::parse("*/0 * * * *").unwrap_err();
        assert!(matches!(err, TimeSpecError::InvalidStep { .. }));
    }

    #[test]
    fn generator_is_strictly_increasing() {
        let spec = TimeSpec::parse("*/15 * * * *").unwrap();
        let mut gen = spec.generator(dt(2024, 3, 1, 0, 0));
        let first = gen.next().unwrap();
        let second = gen.next().unwrap();
        assert!(second > first);
        assert!(second - first >= Duration::minutes(1));
    }

    #[test]
    fn generator_hits_every_15_minutes_in_a_day() {
        let spec = TimeSpec::parse("*/15 * * * *").unwrap();
        let start = dt(1970, 1, 5, 0, 0);
        let count = spec
            .generator(start)
            .take_while(|&t| t < start + Duration::days(1))
            .count();
        assert_eq!(count, 96);
    }

    #[test]
    fn wednesday_only_never_matches_a_monday_window() {
        let spec = TimeSpec::parse("0 0 * * wed").unwrap();
        let start = dt(1970, 1, 5, 0, 0); // Monday
        let count = spec
            .generator(start)
            .take_while(|&t| t < start + Duration::days(1))
            .count();
        assert_eq!(count, 0);
    }

    /// Scenario 1 from the test-plan: an 24-hour window starting Monday
    /// 1970-01-05, one-minute quantum, against all eight named templates.
    #[test]
    fn one_day_tick_counts_across_named_templates() {
        let start = dt(1970, 1, 5, 0, 0);
        let window_end = start + Duration::days(1);
        let count_of = |expr: &str| {
            TimeSpec::parse(expr)
                .unwrap()
                .generator(start)
                .take_while(|&t| t < window_end)
                .count()
        };

        assert_eq!(count_of("*/15 * * * *"), 96); // foo, thud
        assert_eq!(count_of("0 * * * *"), 24); // baz
        assert_eq!(count_of("0 */4 * * *"), 6); // qux
        assert_eq!(count_of("* * * * *"), 1440); // quux
        assert_eq!(count_of("*/2 * * * *"), 720); // corge
        assert_eq!(count_of("30 4 5 1 *"), 1); // grault: fixed 1970-01-05 04:30
        assert_eq!(count_of("0 0 * * wed"), 0); // garply: wednesdays only
    }

    proptest::proptest! {
        /// Parsing a step-based expression and reformatting via `Display`
        /// round-trips to a spec with the same match set.
        #[test]
        fn step_spec_round_trips(step in 1u32..=59) {
            let expr = format!("*/{step} * * * *");
            let spec = TimeSpec::parse(&expr).unwrap();
            let reparsed = TimeSpec::parse(&spec.to_string()).unwrap();
            let start = dt(2024, 1, 1, 0, 0);
            for minute in 0..60 {
                let probe = start + Duration::minutes(minute);
                prop_assert_eq!(spec.matches(probe), reparsed.matches(probe));
            }
        }
    }
}
