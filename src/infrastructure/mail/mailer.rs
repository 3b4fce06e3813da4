//! Mailer Facade: decides whether a finished or conflict-affected instance
//! warrants a notification and pipes the message through the job's
//! `sendmail` command.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use chrono::NaiveDateTime;
use tracing::{debug, error, warn};

use crate::domain::entities::MailPolicy;
use crate::domain::value_objects::format_time;

/// The outcome that drives which template is selected for a finished job.
pub enum JobOutcome {
    Success,
    Error { exit_code: i32 },
    Killed { signal: i32 },
}

/// Why a new instance was not queued: a conflict with an already-running or
/// already-waiting instance of the same template.
pub enum ConflictOutcome {
    KilledRunning,
    SkippedRunning { pid: Option<i32> },
    SkippedWaiting,
}

/// Minimal context the mailer needs about the instance; decoupled from
/// [`crate::domain::entities::JobInstance`] so the mailer can be unit
/// tested without a real child process.
pub struct MailContext<'a> {
    pub job_id: &'a str,
    pub mailto: &'a str,
    pub username: &'a str,
    pub this_run: NaiveDateTime,
    pub command: &'a str,
    pub sendmail: &'a str,
    pub working_dir: &'a Path,
    pub environ: &'a HashMap<String, String>,
}

pub struct Mailer;

impl Mailer {
    pub fn new() -> Self {
        Self
    }

    /// Whether a finished instance should be mailed, per its `mail` policy
    /// and outcome. `output_nonempty` is only consulted under
    /// [`MailPolicy::Output`].
    pub fn should_send_job_mail(policy: MailPolicy, outcome: &JobOutcome, output_nonempty: bool) -> bool {
        match policy {
            MailPolicy::Never => false,
            MailPolicy::Always => true,
            MailPolicy::Error => !matches!(outcome, JobOutcome::Success),
            MailPolicy::Output => output_nonempty,
        }
    }

    pub fn send_job_mail(&self, ctx: &MailContext, outcome: &JobOutcome, output: &str) {
        let subject_tag = match outcome {
            JobOutcome::Success => "INFO",
            JobOutcome::Error { .. } => "ERROR",
            JobOutcome::Killed { .. } => "KILLED",
        };
        let body = match outcome {
            JobOutcome::Success => String::new(),
            JobOutcome::Error { exit_code } => {
                format!("Job {} exited with error code {}.\n\n", ctx.job_id, exit_code)
            }
            JobOutcome::Killed { signal } => {
                format!("Job {} was killed by signal {}.\n\n", ctx.job_id, signal)
            }
        };
        let text = self.render(ctx, subject_tag, &body);
        self.send(ctx, &text, Some(output));
    }

    pub fn send_conflict_mail(&self, ctx: &MailContext, outcome: ConflictOutcome) {
        let (tag, body) = match outcome {
            ConflictOutcome::KilledRunning => (
                "CONFLICT KILL",
                format!("Running job {} was killed in favor of the new instance.\n", ctx.job_id),
            ),
            ConflictOutcome::SkippedRunning { pid } => (
                "CONFLICT SKIP",
                format!(
                    "The scheduled run for job {} was skipped because another instance\n\
                     of the job is still running.\n\n    {}\n\nThe process is running with pid {}.\n",
                    ctx.job_id,
                    ctx.command,
                    pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
                ),
            ),
            ConflictOutcome::SkippedWaiting => (
                "CONFLICT SKIP",
                format!(
                    "The scheduled run for job {} was skipped because another instance\n\
                     of the job is already waiting to start.\n",
                    ctx.job_id
                ),
            ),
        };
        let text = self.render(ctx, tag, &body);
        self.send(ctx, &text, None);
    }

    fn render(&self, ctx: &MailContext, status_tag: &str, body: &str) -> String {
        format!(
            "From: pcron <{username}>\nTo: {mailto}\nContent-Type: text/plain; charset=\"utf-8\"\nPcron-Status: {status}\nSubject: pcron: {status} {timestamp} {job}\n\n{body}",
            username = ctx.username,
            mailto = ctx.mailto,
            status = status_tag,
            timestamp = format_time(Some(ctx.this_run)),
            job = ctx.job_id,
            body = body,
        )
    }

    fn send(&self, ctx: &MailContext, text: &str, output: Option<&str>) {
        debug!(mailto = ctx.mailto, "sending mail");

        let command = if ctx.sendmail.contains("{}") {
            ctx.sendmail.replace("{}", ctx.mailto)
        } else {
            format!("{} {}", ctx.sendmail, ctx.mailto)
        };

        let log_path = ctx.working_dir.join("sendmail.txt");
        let log_file = match std::fs::File::create(&log_path) {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, "failed to open sendmail.txt");
                return;
            }
        };
        let Ok(stderr_file) = log_file.try_clone() else {
            error!("failed to duplicate sendmail.txt handle");
            return;
        };

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(ctx.working_dir)
            .env_clear()
            .envs(ctx.environ)
            .stdin(Stdio::piped())
            .stdout(log_file)
            .stderr(stderr_file)
            .spawn();

        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                error!(command = %command, error = %e, "failed to spawn sendmail");
                return;
            }
        };

        if let Some(stdin) = child.stdin.as_mut() {
            let _ = stdin.write_all(text.as_bytes());
            if let Some(output) = output {
                let _ = stdin.write_all(output.as_bytes());
            }
        }
        drop(child.stdin.take());

        match child.wait() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(command = %command, ?status, "sendmail exited non-zero"),
            Err(e) => error!(command = %command, error = %e, "failed waiting on sendmail"),
        }
    }
}

impl Default for Mailer {
    fn default() -> Self {
        Self::new()
    }
}
