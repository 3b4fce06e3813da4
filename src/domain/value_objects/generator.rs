//! Merged trigger generator: combines a calendar generator and an interval
//! generator into a single strictly-increasing stream, replacing the
//! coroutine-merge pattern of the reference implementation with a pull-based
//! struct that retains both cursors.

use chrono::NaiveDateTime;

use super::interval_spec::IntervalSpec;
use super::time_spec::TimeSpec;

/// Which trigger produced a given tick. On a tie, [`Trigger::Time`] wins so
/// that a calendar occurrence is never silently absorbed by a coincident
/// interval tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Time,
    Interval,
}

/// Produces the merged, strictly-increasing sequence of `(Trigger, instant)`
/// pairs for a job template that may carry a calendar spec, an interval
/// spec, or both.
pub struct TemplateGenerator<'a> {
    calendar: Option<std::iter::Peekable<super::time_spec::CalendarGenerator<'a>>>,
    interval: Option<super::interval_spec::IntervalGenerator<'a>>,
    interval_peek: Option<NaiveDateTime>,
}

impl<'a> TemplateGenerator<'a> {
    pub fn new(
        time_spec: Option<&'a TimeSpec>,
        interval_spec: Option<&'a IntervalSpec>,
        start: NaiveDateTime,
    ) -> Self {
        Self {
            calendar: time_spec.map(|spec| spec.generator(start).peekable()),
            interval: interval_spec.map(|spec| spec.generator(start, start)),
            interval_peek: None,
        }
    }

    /// Rebases the interval anchor, used after a post-dependency fires so
    /// the interval component of a combined spec restarts from completion.
    pub fn reset_interval_anchor(&mut self, anchor: NaiveDateTime) {
        if let Some(gen) = self.interval.as_mut() {
            gen.rebase_anchor(anchor);
            self.interval_peek = None;
        }
    }
}

impl<'a> Iterator for TemplateGenerator<'a> {
    type Item = (Trigger, NaiveDateTime);

    fn next(&mut self) -> Option<Self::Item> {
        let calendar_peek = self.calendar.as_mut().and_then(|g| g.peek().copied());
        if self.interval_peek.is_none() {
            self.interval_peek = self.interval.as_mut().and_then(|g| g.next());
        }

        match (calendar_peek, self.interval_peek) {
            (Some(c), Some(i)) => {
                if c <= i {
                    self.calendar.as_mut().unwrap().next();
                    Some((Trigger::Time, c))
                } else {
                    let tick = self.interval_peek.take().unwrap();
                    Some((Trigger::Interval, tick))
                }
            }
            (Some(c), None) => {
                self.calendar.as_mut().unwrap().next();
                Some((Trigger::Time, c))
            }
            (None, Some(_)) => {
                let tick = self.interval_peek.take().unwrap();
                Some((Trigger::Interval, tick))
            }
            (None, None) => None,
        }
    }
}
