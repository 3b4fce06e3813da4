//! Scheduler Core: owns the job table, per-group queues, and the running
//! set; runs the main loop that dispatches triggers, starts queued
//! instances, reaps finished instances, and sleeps until the next decision
//! point.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::domain::entities::{ConflictPolicy, JobInstance, JobTemplate, JobTrigger, MailPolicy};
use crate::domain::ports::Runner;
use crate::domain::value_objects::format_time;
use crate::infrastructure::clock::{next_minute_after, Clock, INFINITY};
use crate::infrastructure::environ::{build_environ, AccountInfo};
use crate::infrastructure::mail::{ConflictOutcome, JobOutcome, MailContext, Mailer};
use crate::infrastructure::parsers::crontab_parser;
use crate::infrastructure::process::ChildRunner;
use crate::infrastructure::signals::{wait_for_signal, SchedulerSignal};
use crate::infrastructure::state::{load_state, save_state};

use super::queue::GroupQueues;

/// What [`Scheduler::enqueue_job`] decided to do with a newly-created
/// instance, surfaced mainly for testability.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Dropped,
    KilledRunningAndEnqueued,
}

pub struct Scheduler {
    pcron_dir: PathBuf,
    clock: Box<dyn Clock>,
    account: AccountInfo,
    init_code: String,
    templates: HashMap<String, JobTemplate>,
    queues: GroupQueues,
    mailer: Mailer,
    running: bool,
}

impl Scheduler {
    pub fn new(pcron_dir: impl Into<PathBuf>, clock: Box<dyn Clock>) -> Self {
        Self {
            pcron_dir: pcron_dir.into(),
            clock,
            account: AccountInfo::current(),
            init_code: String::new(),
            templates: HashMap::new(),
            queues: GroupQueues::new(),
            mailer: Mailer::new(),
            running: true,
        }
    }

    fn crontab_path(&self) -> PathBuf {
        self.pcron_dir.join("crontab.ini")
    }

    fn environment_path(&self) -> PathBuf {
        self.pcron_dir.join("environment.sh")
    }

    fn state_path(&self) -> PathBuf {
        self.pcron_dir.join("state.db")
    }

    pub fn jobs_dir(&self, name: &str) -> PathBuf {
        self.pcron_dir.join("jobs").join(name)
    }

    /// Parses the crontab and `environment.sh`, replacing the job table.
    /// Templates present in both the old and new crontab keep their
    /// scheduling cursor; new ones are seeded from "now"; removed ones are
    /// dropped (their queued/running instances are left to drain).
    pub fn load(&mut self) {
        self.init_code = std::fs::read_to_string(self.environment_path()).unwrap_or_default();

        let loaded = match crontab_parser::load(&self.crontab_path()) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "cannot use crontab because it contains errors, continuing with empty crontab");
                return;
            }
        };

        let now = self.clock.now();
        let mut new_templates = HashMap::new();

        for mut template in loaded.startup.into_iter().chain(loaded.crontab.into_iter()) {
            if let Some(old) = self.templates.remove(&template.name) {
                template.next_run = old.next_run;
                template.next_trigger = old.next_trigger;
                template.last_run = old.last_run;
                template.interval_anchor = old.interval_anchor;
                template.serial = old.serial;
            }
            if template.next_run.is_none() && !template.is_reboot {
                template.advance(now, Some(now));
            }
            new_templates.insert(template.name.clone(), template);
        }

        for removed in self.templates.keys() {
            info!(job = %removed, "removed job no longer in crontab");
        }

        self.templates = new_templates;
    }

    pub fn load_state(&mut self) {
        let state = load_state(&self.state_path());
        for (name, next_run) in state {
            if let Some(template) = self.templates.get_mut(&name) {
                template.next_run = Some(next_run);
            }
        }
    }

    pub fn save_state(&self) {
        let mut next_run = HashMap::new();
        for template in self.templates.values() {
            if let Some(run) = template.next_run {
                next_run.insert(template.name.clone(), run);
            }
        }
        if let Err(e) = save_state(&self.state_path(), &next_run) {
            warn!(error = %e, "failed to persist state");
        }
    }

    /// Enqueues every active `@reboot` template once, then runs the main
    /// loop until a shutdown signal (`INT`/`TERM`) is observed.
    pub fn mainloop(&mut self) {
        let now = self.clock.now();
        let reboot_names: Vec<String> = self
            .templates
            .values()
            .filter(|t| t.is_reboot && t.active)
            .map(|t| t.name.clone())
            .collect();
        for name in reboot_names {
            self.enqueue_job(&name, JobTrigger::Reboot, now);
        }

        while self.running {
            self.process_pending_jobs();
            self.process_finished_jobs();
            self.process_waiting_jobs();
            self.wait();
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        info!("shutting down, terminating running instances");
        for group in self.queues.group_keys() {
            if let Some(mut instance) = self.queues.remove_running(&group) {
                let _ = instance.terminate();
            }
        }
        self.save_state();
    }

    /// For every active template whose `next_run` has arrived, creates an
    /// instance and advances its generator.
    pub fn process_pending_jobs(&mut self) {
        let now = self.clock.now();
        let due: Vec<String> = self
            .templates
            .values()
            .filter(|t| t.active && t.next_run.map(|run| run <= now).unwrap_or(false))
            .map(|t| t.name.clone())
            .collect();

        if due.is_empty() {
            return;
        }

        for name in due {
            let trigger = self.templates[&name].next_trigger.unwrap_or(JobTrigger::Time);
            if self.condition_passes(&name) {
                self.enqueue_job(&name, trigger, now);
            } else {
                debug!(job = %name, "condition failed, skipping this run");
            }
            if let Some(template) = self.templates.get_mut(&name) {
                template.last_run = Some(now);
                template.advance(now, None);
            }
        }

        self.save_state();
    }

    /// Runs a template's `condition` command to completion, if it has one;
    /// only an exit code of zero allows the triggered instance to enqueue.
    fn condition_passes(&self, template_name: &str) -> bool {
        let Some(template) = self.templates.get(template_name) else {
            return false;
        };
        let Some(condition) = template.condition.clone() else {
            return true;
        };

        let job_dir = self.jobs_dir(template_name).join("condition");
        let environ = build_environ(
            &self.account,
            &self.pcron_dir.to_string_lossy(),
            template_name,
            template_name,
            &template.group,
        );

        match ChildRunner::spawn(&job_dir, &self.account.shell, &self.init_code, &condition, &environ) {
            Ok(mut runner) => match runner.wait() {
                Ok(0) => true,
                Ok(code) => {
                    debug!(job = %template_name, exit_code = code, "condition command did not pass");
                    false
                }
                Err(e) => {
                    warn!(job = %template_name, error = %e, "condition command failed to run");
                    false
                }
            },
            Err(e) => {
                warn!(job = %template_name, error = %e, "failed to spawn condition command");
                false
            }
        }
    }

    /// Creates a new instance of `template_name` and applies its conflict
    /// policy against the Running Set and its own queue.
    pub fn enqueue_job(&mut self, template_name: &str, trigger: JobTrigger, now: NaiveDateTime) -> EnqueueOutcome {
        let Some(template) = self.templates.get_mut(template_name) else {
            return EnqueueOutcome::Dropped;
        };
        let group = template.group.clone();
        let conflict = template.conflict;
        let mailto = template.mailto.clone().unwrap_or_else(|| self.account.user.clone());
        let sendmail = template.sendmail.clone();
        let command = template.command.clone();
        let instance = template.instantiate(trigger, now);

        let running_same_template = self
            .queues
            .running(&group)
            .map(|r| r.template_name == template_name)
            .unwrap_or(false);

        let outcome = if running_same_template {
            warn!(job = %template_name, "new instance exceeds runtime of the previous one");
            match conflict {
                ConflictPolicy::Kill => {
                    if let Some(mut old) = self.queues.remove_running(&group) {
                        let _ = old.terminate();
                        self.notify_conflict(template_name, &mailto, &sendmail, &command, now, ConflictOutcome::KilledRunning);
                        self.queues.push(instance);
                        EnqueueOutcome::KilledRunningAndEnqueued
                    } else {
                        self.queues.push(instance);
                        EnqueueOutcome::Enqueued
                    }
                }
                ConflictPolicy::Skip => {
                    let pid = self.queues.running(&group).and_then(|r| r.pid());
                    self.notify_conflict(template_name, &mailto, &sendmail, &command, now, ConflictOutcome::SkippedRunning { pid });
                    EnqueueOutcome::Dropped
                }
                ConflictPolicy::Mail => {
                    let pid = self.queues.running(&group).and_then(|r| r.pid());
                    self.notify_conflict(template_name, &mailto, &sendmail, &command, now, ConflictOutcome::SkippedRunning { pid });
                    EnqueueOutcome::Dropped
                }
                ConflictPolicy::Ignore => {
                    self.queues.push(instance);
                    EnqueueOutcome::Enqueued
                }
            }
        } else if self.queues.has_pending(&group, template_name) {
            match conflict {
                ConflictPolicy::Ignore => {
                    self.queues.push(instance);
                    EnqueueOutcome::Enqueued
                }
                ConflictPolicy::Mail => {
                    self.notify_conflict(template_name, &mailto, &sendmail, &command, now, ConflictOutcome::SkippedWaiting);
                    EnqueueOutcome::Dropped
                }
                ConflictPolicy::Skip | ConflictPolicy::Kill => EnqueueOutcome::Dropped,
            }
        } else {
            self.queues.push(instance);
            EnqueueOutcome::Enqueued
        };

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn notify_conflict(
        &self,
        template_name: &str,
        mailto: &str,
        sendmail: &str,
        command: &str,
        now: NaiveDateTime,
        outcome: ConflictOutcome,
    ) {
        let working_dir = self.jobs_dir(template_name);
        let ctx = MailContext {
            job_id: template_name,
            mailto,
            username: &self.account.user,
            this_run: now,
            command,
            sendmail,
            working_dir: &working_dir,
            environ: &HashMap::new(),
        };
        self.mailer.send_conflict_mail(&ctx, outcome);
    }

    /// Reaps every finished instance in the Running Set, finalizes it,
    /// mails it, then enqueues any `post`-dependent templates.
    pub fn process_finished_jobs(&mut self) {
        let now = self.clock.now();
        let groups = self.queues.group_keys();
        let mut finished_templates = Vec::new();
        let mut changed = false;

        for group in &groups {
            let is_finished = self
                .queues
                .running_mut(group)
                .map(|instance| instance.has_finished())
                .unwrap_or(false);
            if !is_finished {
                continue;
            }

            let Some(mut instance) = self.queues.remove_running(group) else {
                continue;
            };
            let exit_code = match instance.finalize() {
                Ok(code) => code,
                Err(e) => {
                    warn!(job = %instance.id, error = %e, "failed to finalize instance");
                    0
                }
            };
            let output = instance.read_output().unwrap_or_default();
            let _ = instance.close();

            self.mail_finished_instance(&instance, exit_code, &output);

            finished_templates.push(instance.template_name.clone());
            changed = true;
        }

        for finished in &finished_templates {
            let dependents: Vec<String> = self
                .templates
                .values()
                .filter(|t| t.active && t.post.contains(finished))
                .map(|t| t.name.clone())
                .collect();

            for dependent in dependents {
                self.enqueue_job(&dependent, JobTrigger::Post, now);
                if let Some(template) = self.templates.get_mut(&dependent) {
                    let next_minute = next_minute_after(now);
                    template.advance(next_minute, Some(next_minute));
                }
            }
        }

        if changed {
            self.save_state();
        }
    }

    fn mail_finished_instance(&self, instance: &JobInstance, exit_code: i32, output: &str) {
        let Some(template) = self.templates.get(&instance.template_name) else {
            return;
        };
        let outcome = if exit_code == 0 {
            JobOutcome::Success
        } else if exit_code > 0 {
            JobOutcome::Error { exit_code }
        } else {
            JobOutcome::Killed { signal: -exit_code }
        };

        if !Mailer::should_send_job_mail(template.mail, &outcome, !output.is_empty()) {
            return;
        }

        let mailto = template.mailto.clone().unwrap_or_else(|| self.account.user.clone());
        let working_dir = self.jobs_dir(&template.name);
        let ctx = MailContext {
            job_id: &instance.id,
            mailto: &mailto,
            username: &self.account.user,
            this_run: instance.this_run,
            command: &template.command,
            sendmail: &template.sendmail,
            working_dir: &working_dir,
            environ: &instance.environ,
        };
        self.mailer.send_job_mail(&ctx, &outcome, output);
    }

    /// For each group in deterministic order, starts the head of its queue
    /// while the group has no running instance.
    pub fn process_waiting_jobs(&mut self) {
        for group in self.queues.group_keys() {
            while !self.queues.is_running(&group) {
                let Some(instance) = self.queues.peek_front(&group) else {
                    break;
                };
                let template_name = instance.template_name.clone();
                let Some(mut instance) = self.queues.pop_front(&group) else {
                    break;
                };
                if self.start_job(&mut instance, &template_name) {
                    self.queues.mark_running(instance);
                } else {
                    debug!(job = %template_name, "spawn failed, instance dropped");
                }
            }
        }
    }

    /// Spawns the instance's Runner. Returns whether it was started.
    fn start_job(&mut self, instance: &mut JobInstance, template_name: &str) -> bool {
        let Some(template) = self.templates.get(template_name) else {
            return false;
        };

        let job_dir = self.jobs_dir(template_name);
        let environ = build_environ(
            &self.account,
            &self.pcron_dir.to_string_lossy(),
            template_name,
            &instance.id,
            &template.group,
        );

        match ChildRunner::spawn(&job_dir, &self.account.shell, &self.init_code, &template.command, &environ) {
            Ok(runner) => {
                instance.working_dir = job_dir;
                instance.environ = environ;
                instance.attach_runner(Box::new(runner), self.clock.now());
                true
            }
            Err(e) => {
                warn!(job = %template_name, error = %e, "failed to spawn job");
                false
            }
        }
    }

    /// Sleeps until the earliest `next_run`, or one hour if every template
    /// is inactive or post-only. Interruptible by the watched signals;
    /// handles at most one signal before returning to the main loop.
    fn wait(&mut self) {
        let now = self.clock.now();
        let earliest = self
            .templates
            .values()
            .filter(|t| t.active)
            .filter_map(|t| t.next_run)
            .min();

        let timeout = match earliest {
            Some(run) if run > now => (run - now).to_std().unwrap_or(INFINITY.to_std().unwrap()),
            Some(_) => StdDuration::from_secs(0),
            None => INFINITY.to_std().unwrap(),
        };

        match wait_for_signal(timeout) {
            Some(SchedulerSignal::Shutdown) => {
                warn!("received shutdown signal");
                self.running = false;
            }
            Some(SchedulerSignal::Reload) => {
                info!("received reload signal");
                self.load();
            }
            Some(SchedulerSignal::Dump) => self.dump(),
            Some(SchedulerSignal::ChildReaped) | None => {}
        }
    }

    /// Logs a human-readable table of running / waiting / sleeping /
    /// inactive jobs, in response to `SIGUSR1`.
    fn dump(&self) {
        for group in self.queues.group_keys() {
            if let Some(running) = self.queues.running(&group) {
                info!(job = %running.id, "[running]");
            }
            for _ in 0..self.queues.pending_count(&group) {
                info!(group = %group, "[waiting]");
            }
        }
        let mut sleeping: Vec<&JobTemplate> = self.templates.values().filter(|t| t.active).collect();
        sleeping.sort_by_key(|t| t.next_run);
        for template in sleeping {
            info!(job = %template.name, next_run = %format_time(template.next_run), "[sleeping]");
        }
        for template in self.templates.values().filter(|t| !t.active) {
            info!(job = %template.name, "[inactive]");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::JobTemplate;
    use crate::domain::value_objects::{IntervalSpec, TimeSpec};
    use chrono::NaiveDate;
    use std::cell::Cell;

    struct FixedClock(Cell<NaiveDateTime>);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0.get()
        }
    }

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, mi, 0).unwrap()
    }

    fn scheduler_with_template(template: JobTemplate) -> Scheduler {
        let clock = Box::new(FixedClock(Cell::new(dt(2024, 1, 1, 0, 0))));
        let mut scheduler = Scheduler::new("/tmp/pcron-test", clock);
        scheduler.templates.insert(template.name.clone(), template);
        scheduler
    }

    /// A [`Runner`] double that reports as immediately finished with exit
    /// code 0, so tests can exercise `process_finished_jobs` without
    /// spawning a real child process.
    struct FakeRunner;

    impl Runner for FakeRunner {
        fn has_finished(&mut self) -> bool {
            true
        }
        fn wait(&mut self) -> Result<i32, crate::domain::ports::RunnerError> {
            Ok(0)
        }
        fn terminate(&mut self) -> Result<(), crate::domain::ports::RunnerError> {
            Ok(())
        }
        fn finalize(&mut self) -> Result<(), crate::domain::ports::RunnerError> {
            Ok(())
        }
        fn duration(&self) -> Option<chrono::Duration> {
            Some(chrono::Duration::zero())
        }
        fn pid(&self) -> Option<i32> {
            None
        }
        fn returncode(&self) -> Option<i32> {
            Some(0)
        }
        fn read_output(&mut self) -> Result<String, crate::domain::ports::RunnerError> {
            Ok(String::new())
        }
        fn close(&mut self) -> Result<(), crate::domain::ports::RunnerError> {
            Ok(())
        }
    }

    fn ignore_template(name: &str, group: &str) -> JobTemplate {
        JobTemplate::new(
            name.to_string(),
            "true".to_string(),
            true,
            None,
            Some(group.to_string()),
            ConflictPolicy::Ignore,
            Some(TimeSpec::parse("@hourly").unwrap()),
            None,
            Vec::new(),
            MailPolicy::Never,
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn enqueue_appends_when_nothing_conflicts() {
        let mut scheduler = scheduler_with_template(ignore_template("job", "job"));
        let outcome = scheduler.enqueue_job("job", JobTrigger::Time, dt(2024, 1, 1, 1, 0));
        assert_eq!(outcome, EnqueueOutcome::Enqueued);
        assert_eq!(scheduler.queues.pending_count("job"), 1);
    }

    #[test]
    fn ignore_policy_stacks_up_pending_instances() {
        let mut scheduler = scheduler_with_template(ignore_template("job", "job"));
        scheduler.enqueue_job("job", JobTrigger::Time, dt(2024, 1, 1, 1, 0));
        scheduler.enqueue_job("job", JobTrigger::Time, dt(2024, 1, 1, 2, 0));
        assert_eq!(scheduler.queues.pending_count("job"), 2);
    }

    #[test]
    fn skip_policy_drops_new_instance_when_pending() {
        let mut template = ignore_template("job", "job");
        template.conflict = ConflictPolicy::Skip;
        let mut scheduler = scheduler_with_template(template);
        scheduler.enqueue_job("job", JobTrigger::Time, dt(2024, 1, 1, 1, 0));
        let outcome = scheduler.enqueue_job("job", JobTrigger::Time, dt(2024, 1, 1, 2, 0));
        assert_eq!(outcome, EnqueueOutcome::Dropped);
        assert_eq!(scheduler.queues.pending_count("job"), 1);
    }

    #[test]
    fn unknown_template_drops_silently() {
        let mut scheduler = scheduler_with_template(ignore_template("job", "job"));
        let outcome = scheduler.enqueue_job("ghost", JobTrigger::Time, dt(2024, 1, 1, 1, 0));
        assert_eq!(outcome, EnqueueOutcome::Dropped);
    }

    #[test]
    fn process_waiting_jobs_only_starts_one_per_group() {
        let mut scheduler = scheduler_with_template(ignore_template("job", "shared"));
        scheduler.enqueue_job("job", JobTrigger::Time, dt(2024, 1, 1, 1, 0));
        scheduler.enqueue_job("job", JobTrigger::Time, dt(2024, 1, 1, 2, 0));
        scheduler.process_waiting_jobs();
        assert!(scheduler.queues.running_count() <= 1);
    }

    /// Conflict matrix, scenario 2: `skip` drops every enqueue attempt made
    /// while an instance is already running, never touching the queue.
    #[test]
    fn skip_policy_drops_while_an_instance_is_running() {
        let mut template = ignore_template("bar.3", "bar");
        template.conflict = ConflictPolicy::Skip;
        let mut scheduler = scheduler_with_template(template);
        let instance = scheduler
            .templates
            .get_mut("bar.3")
            .unwrap()
            .instantiate(JobTrigger::Time, dt(2024, 1, 1, 0, 0));
        scheduler.queues.mark_running(instance);

        let outcome = scheduler.enqueue_job("bar.3", JobTrigger::Time, dt(2024, 1, 1, 1, 0));
        assert_eq!(outcome, EnqueueOutcome::Dropped);
        assert_eq!(scheduler.queues.pending_count("bar"), 0);
        assert!(scheduler.queues.is_running("bar"));
    }

    /// Conflict matrix, scenario 2: `kill` terminates the running instance
    /// and enqueues the new one, never leaving more than one concurrent
    /// instance for the group.
    #[test]
    fn kill_policy_replaces_the_running_instance() {
        let mut template = ignore_template("bar.3", "bar");
        template.conflict = ConflictPolicy::Kill;
        let mut scheduler = scheduler_with_template(template);
        let instance = scheduler
            .templates
            .get_mut("bar.3")
            .unwrap()
            .instantiate(JobTrigger::Time, dt(2024, 1, 1, 0, 0));
        scheduler.queues.mark_running(instance);

        let outcome = scheduler.enqueue_job("bar.3", JobTrigger::Time, dt(2024, 1, 1, 1, 0));
        assert_eq!(outcome, EnqueueOutcome::KilledRunningAndEnqueued);
        assert!(!scheduler.queues.is_running("bar"));
        assert_eq!(scheduler.queues.pending_count("bar"), 1);
    }

    /// Persistence scenario: `save_state` followed by a fresh scheduler
    /// carries `next_run` forward for a template present in both crontabs.
    #[test]
    fn state_round_trips_across_scheduler_lifetimes() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = scheduler_with_template(ignore_template("weekly", "weekly"));
        first.templates.get_mut("weekly").unwrap().next_run = Some(dt(2024, 1, 8, 0, 0));
        first.pcron_dir = dir.path().to_path_buf();
        first.save_state();

        let mut second = scheduler_with_template(ignore_template("weekly", "weekly"));
        second.pcron_dir = dir.path().to_path_buf();
        second.load_state();

        assert_eq!(
            second.templates["weekly"].next_run,
            Some(dt(2024, 1, 8, 0, 0))
        );
    }

    /// Reload scenario: starting with 3 jobs then replacing the crontab with
    /// 2 of the originals plus a new one keeps the retained jobs' `next_run`,
    /// drops the removed job, and seeds the new job's `next_run` from "now".
    #[test]
    fn reload_keeps_retained_next_run_and_seeds_new_job() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("crontab.ini"),
            "[alpha]\ncommand = /bin/true\ntime = @hourly\n\
             [beta]\ncommand = /bin/true\ntime = @hourly\n\
             [gamma]\ncommand = /bin/true\ntime = @hourly\n",
        )
        .unwrap();

        let clock = Box::new(FixedClock(Cell::new(dt(2024, 1, 1, 0, 0))));
        let mut scheduler = Scheduler::new(dir.path(), clock);
        scheduler.load();
        let alpha_next_run = scheduler.templates["alpha"].next_run;
        assert!(scheduler.templates.contains_key("gamma"));

        std::fs::write(
            dir.path().join("crontab.ini"),
            "[alpha]\ncommand = /bin/true\ntime = @hourly\n\
             [beta]\ncommand = /bin/true\ntime = @hourly\n\
             [delta]\ncommand = /bin/true\ntime = @hourly\n",
        )
        .unwrap();
        scheduler.load();

        assert!(!scheduler.templates.contains_key("gamma"));
        assert!(scheduler.templates.contains_key("delta"));
        assert_eq!(scheduler.templates["alpha"].next_run, alpha_next_run);
        assert!(scheduler.templates["delta"].next_run.is_some());
    }

    /// Shell-validation scenario: a template whose account shell is outside
    /// the supported set fails to spawn, the instance is dropped, and
    /// subsequent ticks for other groups are unaffected.
    #[test]
    fn unsupported_shell_drops_instance_without_affecting_other_groups() {
        let mut scheduler = scheduler_with_template(ignore_template("job", "job"));
        scheduler.account.shell = "/usr/bin/fish".to_string();
        scheduler.enqueue_job("job", JobTrigger::Time, dt(2024, 1, 1, 1, 0));
        scheduler.process_waiting_jobs();

        assert!(!scheduler.queues.is_running("job"));
        assert_eq!(scheduler.queues.pending_count("job"), 0);

        // A second, unrelated group still starts normally afterwards.
        scheduler
            .templates
            .insert("other".to_string(), ignore_template("other", "other"));
        scheduler.account.shell = "/bin/sh".to_string();
        scheduler.enqueue_job("other", JobTrigger::Time, dt(2024, 1, 1, 1, 0));
        scheduler.process_waiting_jobs();
        assert!(scheduler.queues.is_running("other"));
    }

    /// Post-chain scenario: completing `a` enqueues its `post`-dependent `b`
    /// and rebases `b`'s interval anchor to the next whole minute after
    /// completion rather than its previous interval tick.
    #[test]
    fn post_dependent_interval_anchor_rebases_on_completion() {
        let mut a = ignore_template("a", "a");
        a.interval = Some(IntervalSpec::parse("5").unwrap());
        a.time = None;
        let mut b = JobTemplate::new(
            "b".to_string(),
            "true".to_string(),
            true,
            None,
            Some("b".to_string()),
            ConflictPolicy::Ignore,
            None,
            Some(IntervalSpec::parse("5").unwrap()),
            vec!["a".to_string()],
            MailPolicy::Never,
            None,
            None,
        )
        .unwrap();
        b.interval_anchor = Some(dt(2024, 1, 1, 0, 0));
        b.next_run = Some(dt(2024, 1, 1, 0, 5));

        let clock = Box::new(FixedClock(Cell::new(dt(2024, 1, 1, 0, 1))));
        let mut scheduler = Scheduler::new("/tmp/pcron-test", clock);
        scheduler.templates.insert(a.name.clone(), a);
        scheduler.templates.insert(b.name.clone(), b);

        let mut instance = scheduler
            .templates
            .get_mut("a")
            .unwrap()
            .instantiate(JobTrigger::Time, dt(2024, 1, 1, 0, 1));
        instance.attach_runner(Box::new(FakeRunner), dt(2024, 1, 1, 0, 1));
        scheduler.queues.mark_running(instance);
        scheduler.process_finished_jobs();

        // `b`'s next run must now be anchored at/after completion (00:01),
        // strictly before its old interval-only tick of 00:05.
        let rebased = scheduler.templates["b"].next_run.unwrap();
        assert!(rebased < dt(2024, 1, 1, 0, 5));
        assert!(rebased >= dt(2024, 1, 1, 0, 1));
    }
}
