//! Time Provider: a testable clock, an "infinity" sentinel for the wait
//! loop, and a "next minute boundary" helper used by the crontab grammar's
//! minute granularity.

use chrono::{Duration, NaiveDateTime, Timelike};

/// A timestamp far enough in the future that the scheduler never needs to
/// distinguish it from "no job is scheduled"; used when every template's
/// `next_run` is absent so the main loop still has a sleep ceiling.
pub const INFINITY: Duration = Duration::hours(1);

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// The start of the next whole minute after `now()`.
    fn next_minute(&self) -> NaiveDateTime {
        next_minute_after(self.now())
    }
}

pub fn next_minute_after(dt: NaiveDateTime) -> NaiveDateTime {
    let truncated = dt
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap();
    truncated + Duration::minutes(1)
}

/// The real wall-clock, backed by the local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}
