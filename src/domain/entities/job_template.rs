//! Job template entity: an immutable crontab-derived definition plus a
//! mutable scheduling cursor.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::value_objects::generator::Trigger as GeneratorOrigin;
use crate::domain::value_objects::{IntervalSpec, TemplateGenerator, TimeSpec};

use super::job_instance::JobInstance;

/// What to do when a new instance would overlap a running or queued one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    Ignore,
    Skip,
    Mail,
    Kill,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::Ignore
    }
}

/// When to notify the mailer about a finished instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailPolicy {
    Never,
    Always,
    Error,
    Output,
}

impl Default for MailPolicy {
    fn default() -> Self {
        MailPolicy::Error
    }
}

/// Which generator produced a given instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobTrigger {
    Time,
    Interval,
    Post,
    Reboot,
}

#[derive(Debug, Error)]
pub enum JobTemplateError {
    #[error("template name {0:?} does not match ^\\w+(-\\w+|\\.\\w+)*$")]
    InvalidName(String),
    #[error("template {0:?} has none of time, interval, or post")]
    NoTrigger(String),
}

/// An immutable job definition parsed from the crontab, carrying its own
/// scheduling cursor (`next_trigger`, `next_run`, `last_run`).
///
/// The merged timestamp generator itself is never stored on the template:
/// it borrows the template's `time`/`interval` specs, and Rust has no way to
/// own a self-referential struct. Instead [`JobTemplate::next_tick`] builds
/// one transiently, pulls a single `(trigger, time)` pair from it, and lets
/// it drop — equivalent to a pull-based generator that persists only its
/// cursor (`next_run`) and anchor (`interval_anchor`) between calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub name: String,
    pub command: String,
    pub active: bool,
    pub condition: Option<String>,
    pub group: String,
    pub conflict: ConflictPolicy,
    pub time: Option<TimeSpec>,
    pub interval: Option<IntervalSpec>,
    pub is_reboot: bool,
    pub post: Vec<String>,
    pub mail: MailPolicy,
    pub mailto: Option<String>,
    pub sendmail: String,

    pub next_trigger: Option<JobTrigger>,
    pub next_run: Option<NaiveDateTime>,
    pub last_run: Option<NaiveDateTime>,
    pub interval_anchor: Option<NaiveDateTime>,

    #[serde(skip)]
    pub serial: u64,
}

const DEFAULT_SENDMAIL: &str = "/usr/lib/sendmail";

impl JobTemplate {
    /// Builds a template, rejecting malformed names and definitions with no
    /// trigger source at all.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        command: String,
        active: bool,
        condition: Option<String>,
        group: Option<String>,
        conflict: ConflictPolicy,
        time: Option<TimeSpec>,
        interval: Option<IntervalSpec>,
        post: Vec<String>,
        mail: MailPolicy,
        mailto: Option<String>,
        sendmail: Option<String>,
    ) -> Result<Self, JobTemplateError> {
        if !is_valid_name(&name) {
            return Err(JobTemplateError::InvalidName(name));
        }

        let is_reboot = matches!(time.as_ref().map(TimeSpec::as_str), Some("@reboot"));
        let time = if is_reboot { None } else { time };

        if time.is_none() && interval.is_none() && post.is_empty() && !is_reboot {
            return Err(JobTemplateError::NoTrigger(name));
        }

        let group = group.unwrap_or_else(|| name.clone());

        Ok(Self {
            command,
            active,
            condition,
            group,
            conflict,
            time,
            interval,
            is_reboot,
            post,
            mail,
            mailto,
            sendmail: sendmail.unwrap_or_else(|| DEFAULT_SENDMAIL.to_string()),
            next_trigger: None,
            next_run: None,
            last_run: None,
            interval_anchor: None,
            serial: 0,
            name,
        })
    }

    /// Produces a new instance for `trigger` at `this_run`, bumping the
    /// per-template serial counter.
    pub fn instantiate(&mut self, trigger: JobTrigger, this_run: NaiveDateTime) -> JobInstance {
        self.serial += 1;
        JobInstance::new(self.name.clone(), self.serial, trigger, this_run, self.group.clone())
    }

    /// Computes the next `(trigger, time)` pair strictly after `cursor`,
    /// using `anchor` as the interval baseline. Neither `time` nor
    /// `interval` need be present; a template with only `post` triggers
    /// returns `None` and is never enrolled in the periodic wheel.
    pub fn next_tick(&self, anchor: NaiveDateTime, cursor: NaiveDateTime) -> Option<(JobTrigger, NaiveDateTime)> {
        if self.time.is_none() && self.interval.is_none() {
            return None;
        }
        let mut gen = TemplateGenerator::new(self.time.as_ref(), self.interval.as_ref(), cursor);
        gen.reset_interval_anchor(anchor);
        gen.next().map(|(origin, time)| {
            let trigger = match origin {
                GeneratorOrigin::Time => JobTrigger::Time,
                GeneratorOrigin::Interval => JobTrigger::Interval,
            };
            (trigger, time)
        })
    }

    /// Advances `next_trigger`/`next_run` from the current cursor, rebasing
    /// the interval anchor (and the cursor itself) to `new_anchor` if given
    /// — used after a `post` trigger fires on a dependency, so the interval
    /// component is due `Δ` after completion rather than after its
    /// previous tick.
    pub fn advance(&mut self, now: NaiveDateTime, new_anchor: Option<NaiveDateTime>) {
        let cursor = match new_anchor {
            Some(anchor) => {
                self.interval_anchor = Some(anchor);
                anchor
            }
            None => self.next_run.unwrap_or(now),
        };
        let anchor = self.interval_anchor.unwrap_or(now);
        match self.next_tick(anchor, cursor) {
            Some((trigger, time)) => {
                self.next_trigger = Some(trigger);
                self.next_run = Some(time);
            }
            None => {
                self.next_trigger = None;
                self.next_run = None;
            }
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let mut chars = name.chars();
    let mut seen_separator_group = false;
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';

    let mut rest = name;
    let first_word_end = rest.find(|c: char| !is_word(c)).unwrap_or(rest.len());
    if first_word_end == 0 {
        return false;
    }
    rest = &rest[first_word_end..];

    while !rest.is_empty() {
        let sep = rest.chars().next().unwrap();
        if sep != '-' && sep != '.' {
            return false;
        }
        rest = &rest[1..];
        let word_end = rest.find(|c: char| !is_word(c)).unwrap_or(rest.len());
        if word_end == 0 {
            return false;
        }
        rest = &rest[word_end..];
        seen_separator_group = true;
    }

    let _ = &mut chars;
    let _ = seen_separator_group;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_name() {
        assert!(is_valid_name("backup"));
    }

    #[test]
    fn accepts_dotted_and_hyphenated_names() {
        assert!(is_valid_name("backup.weekly"));
        assert!(is_valid_name("backup-weekly"));
        assert!(is_valid_name("a.b-c.d"));
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(".backup"));
        assert!(!is_valid_name("backup."));
        assert!(!is_valid_name("back up"));
    }

    #[test]
    fn rejects_definition_without_trigger() {
        let err = JobTemplate::new(
            "job".into(),
            "true".into(),
            true,
            None,
            None,
            ConflictPolicy::Ignore,
            None,
            None,
            Vec::new(),
            MailPolicy::Error,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, JobTemplateError::NoTrigger(_)));
    }

    #[test]
    fn defaults_group_to_name() {
        let tmpl = JobTemplate::new(
            "job".into(),
            "true".into(),
            true,
            None,
            None,
            ConflictPolicy::Ignore,
            Some(TimeSpec::parse("@hourly").unwrap()),
            None,
            Vec::new(),
            MailPolicy::Error,
            None,
            None,
        )
        .unwrap();
        assert_eq!(tmpl.group, "job");
    }

    #[test]
    fn instantiate_bumps_serial() {
        let mut tmpl = JobTemplate::new(
            "job".into(),
            "true".into(),
            true,
            None,
            None,
            ConflictPolicy::Ignore,
            Some(TimeSpec::parse("@hourly").unwrap()),
            None,
            Vec::new(),
            MailPolicy::Error,
            None,
            None,
        )
        .unwrap();
        let first = tmpl.instantiate(JobTrigger::Time, chrono::Local::now().naive_local());
        let second = tmpl.instantiate(JobTrigger::Time, chrono::Local::now().naive_local());
        assert_eq!(first.id, "job-1");
        assert_eq!(second.id, "job-2");
    }

    #[test]
    fn advance_picks_up_next_calendar_tick() {
        use chrono::NaiveDate;
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut tmpl = JobTemplate::new(
            "job".into(),
            "true".into(),
            true,
            None,
            None,
            ConflictPolicy::Ignore,
            Some(TimeSpec::parse("0 * * * *").unwrap()),
            None,
            Vec::new(),
            MailPolicy::Error,
            None,
            None,
        )
        .unwrap();
        tmpl.next_run = Some(start);
        tmpl.advance(start, None);
        assert_eq!(
            tmpl.next_run,
            Some(
                NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(1, 0, 0)
                    .unwrap()
            )
        );
        assert_eq!(tmpl.next_trigger, Some(JobTrigger::Time));
    }

    #[test]
    fn advance_rebases_interval_anchor() {
        use chrono::NaiveDate;
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut tmpl = JobTemplate::new(
            "job".into(),
            "true".into(),
            true,
            None,
            None,
            ConflictPolicy::Ignore,
            None,
            Some(IntervalSpec::parse("10").unwrap()),
            Vec::new(),
            MailPolicy::Error,
            None,
            None,
        )
        .unwrap();
        tmpl.next_run = Some(start + chrono::Duration::minutes(10));
        tmpl.interval_anchor = Some(start);
        let rebased = start + chrono::Duration::minutes(3);
        tmpl.advance(rebased, Some(rebased));
        assert_eq!(tmpl.next_run, Some(rebased + chrono::Duration::minutes(10)));
    }
}
