//! Fixed-period interval value object (combined month/week/day/hour/minute
//! triggers, e.g. `1w2d3h30`).

use std::fmt;
use std::sync::OnceLock;

use chrono::{Duration, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::format::format_duration;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntervalSpecError {
    #[error("malformed interval expression: {0:?}")]
    Malformed(String),
    #[error("interval must be positive, got {0}")]
    NotPositive(i64),
}

fn interval_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:(?P<month>\d+)m)?(?:(?P<week>\d+)w)?(?:(?P<day>\d+)d)?(?:(?P<hour>\d+)h)?(?:(?P<minute>\d+))?$",
        )
        .unwrap()
    })
}

/// A period built from an optional trailing sequence of month(`m`, 4
/// weeks)/week(`w`)/day(`d`)/hour(`h`) components followed by an optional
/// bare minute count (no suffix), e.g. `1w2d3h30`. Anchored to a reference
/// instant so that restarts resume on the same cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntervalSpec {
    period: Duration,
}

impl IntervalSpec {
    /// Parses the combined `<month>m<week>w<day>d<hour>h<minute>` grammar,
    /// every component optional but only valid in that order; a bare
    /// trailing number with no suffix is taken as minutes. At least one
    /// component must be present and the resulting period must be positive.
    pub fn parse(value: &str) -> Result<Self, IntervalSpecError> {
        let trimmed = value.trim();
        let captures = interval_re()
            .captures(trimmed)
            .filter(|_| !trimmed.is_empty())
            .ok_or_else(|| IntervalSpecError::Malformed(value.to_string()))?;

        let component = |name: &str| -> Result<i64, IntervalSpecError> {
            match captures.name(name) {
                Some(m) => m
                    .as_str()
                    .parse::<i64>()
                    .map_err(|_| IntervalSpecError::Malformed(value.to_string())),
                None => Ok(0),
            }
        };

        let months = component("month")?;
        let weeks = component("week")?;
        let days = component("day")?;
        let hours = component("hour")?;
        let minutes = component("minute")?;

        let period = Duration::weeks(months * 4 + weeks)
            + Duration::days(days)
            + Duration::hours(hours)
            + Duration::minutes(minutes);

        if period.num_seconds() <= 0 {
            return Err(IntervalSpecError::NotPositive(period.num_seconds()));
        }

        Ok(Self { period })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Next occurrence strictly after `after`, counted from `anchor`. The
    /// anchor is rebased (not the period) whenever a post-dependency fires,
    /// so interval jobs chained after another job stay phase-locked to it.
    pub fn next_after(&self, anchor: NaiveDateTime, after: NaiveDateTime) -> NaiveDateTime {
        if self.period.num_seconds() <= 0 {
            return after;
        }
        let elapsed = after - anchor;
        let periods_elapsed = elapsed.num_seconds().div_euclid(self.period.num_seconds()) + 1;
        anchor + self.period * periods_elapsed as i32
    }

    /// A lazy, infinite iterator of increasing matching timestamps anchored
    /// at `anchor`, starting the search from `start`.
    pub fn generator(&self, anchor: NaiveDateTime, start: NaiveDateTime) -> IntervalGenerator<'_> {
        IntervalGenerator {
            spec: self,
            anchor,
            cursor: start,
        }
    }
}

impl fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_duration(self.period))
    }
}

/// Lazy generator over the timestamps matching an [`IntervalSpec`].
pub struct IntervalGenerator<'a> {
    spec: &'a IntervalSpec,
    anchor: NaiveDateTime,
    cursor: NaiveDateTime,
}

impl<'a> IntervalGenerator<'a> {
    /// Rebase the anchor to `new_anchor` without otherwise disturbing the
    /// cursor, used when a post-dependency job completes.
    pub fn rebase_anchor(&mut self, new_anchor: NaiveDateTime) {
        self.anchor = new_anchor;
    }
}

impl<'a> Iterator for IntervalGenerator<'a> {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<NaiveDateTime> {
        let next = self.spec.next_after(self.anchor, self.cursor);
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
    fn month_means_four_weeks() {
        assert_eq!(IntervalSpec::parse("1m").unwrap().period(), Duration::weeks(4));
        assert_eq!(IntervalSpec::parse("3m").unwrap().period(), Duration::weeks(12));
    }

    #[test]
    fn week_component() {
        assert_eq!(IntervalSpec::parse("1w").unwrap().period(), Duration::weeks(1));
        assert_eq!(IntervalSpec::parse("23w").unwrap().period(), Duration::weeks(23));
        assert_eq!(IntervalSpec::parse("123w").unwrap().period(), Duration::weeks(123));
    }

    #[test]
    fn day_and_hour_components() {
        assert_eq!(IntervalSpec::parse("1d").unwrap().period(), Duration::days(1));
        assert_eq!(IntervalSpec::parse("7d").unwrap().period(), Duration::weeks(1));
        assert_eq!(IntervalSpec::parse("1h").unwrap().period(), Duration::hours(1));
        assert_eq!(IntervalSpec::parse("144h").unwrap().period(), Duration::hours(144));
    }

    #[test]
    fn bare_digits_are_minutes() {
        assert_eq!(IntervalSpec::parse("23").unwrap().period(), Duration::minutes(23));
        assert_eq!(IntervalSpec::parse("1").unwrap().period(), Duration::minutes(1));
    }

    #[test]
    fn combined_components_in_order() {
        assert_eq!(
            IntervalSpec::parse("1m1w1d1h1").unwrap().period(),
            Duration::weeks(5) + Duration::days(1) + Duration::hours(1) + Duration::minutes(1)
        );
        assert_eq!(
            IntervalSpec::parse("2m1d1h").unwrap().period(),
            Duration::weeks(8) + Duration::days(1) + Duration::hours(1)
        );
        assert_eq!(
            IntervalSpec::parse("21d23").unwrap().period(),
            Duration::weeks(3) + Duration::minutes(23)
        );
    }

    #[test]
    fn out_of_order_components_are_rejected() {
        assert!(matches!(
            IntervalSpec::parse("1h2d"),
            Err(IntervalSpecError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_empty_and_zero() {
        assert!(matches!(
            IntervalSpec::parse(""),
            Err(IntervalSpecError::Malformed(_))
        ));
        assert!(matches!(
            IntervalSpec::parse("0"),
            Err(IntervalSpecError::NotPositive(0))
        ));
    }

    #[test]
    fn next_after_is_strictly_increasing() {
        let spec = IntervalSpec::parse("5").unwrap();
        let anchor = dt(2024, 1, 1, 0, 0);
        let first = spec.next_after(anchor, anchor);
        assert_eq!(first, dt(2024, 1, 1, 0, 5));
        let second = spec.next_after(anchor, first);
        assert_eq!(second, dt(2024, 1, 1, 0, 10));
    }

    #[test]
    fn rebasing_anchor_shifts_future_ticks() {
        let spec = IntervalSpec::parse("10").unwrap();
        let mut gen = spec.generator(dt(2024, 1, 1, 0, 0), dt(2024, 1, 1, 0, 0));
        assert_eq!(gen.next().unwrap(), dt(2024, 1, 1, 0, 10));
        gen.rebase_anchor(dt(2024, 1, 1, 0, 13));
        assert_eq!(gen.next().unwrap(), dt(2024, 1, 1, 0, 23));
    }

    proptest::proptest! {
        /// The generator's output is strictly increasing regardless of the
        /// chosen period or how many ticks are pulled.
        #[test]
        fn generator_is_strictly_increasing(minutes in 1i64..=10_080, ticks in 1usize..=50) {
            let spec = IntervalSpec::parse(&minutes.to_string()).unwrap();
            let anchor = dt(2024, 1, 1, 0, 0);
            let gen = spec.generator(anchor, anchor);
            let seen: Vec<_> = gen.take(ticks).collect();
            for w in seen.windows(2) {
                prop_assert!(w[1] > w[0]);
            }
        }

        /// Any combination of week/day/hour component counts parses to the
        /// sum of their durations, in any positive quantity.
        #[test]
        fn week_day_hour_combination_sums_durations(weeks in 0i64..=50, days in 0i64..=20, hours in 0i64..=20) {
            prop_assume!(weeks + days + hours > 0);
            let mut raw = String::new();
            if weeks > 0 { raw.push_str(&format!("{weeks}w")); }
            if days > 0 { raw.push_str(&format!("{days}d")); }
            if hours > 0 { raw.push_str(&format!("{hours}h")); }
            let spec = IntervalSpec::parse(&raw).unwrap();
            let expected = Duration::weeks(weeks) + Duration::days(days) + Duration::hours(hours);
            prop_assert_eq!(spec.period(), expected);
        }
    }
}
