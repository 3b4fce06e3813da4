//! Job instance entity: one concrete scheduled or running execution of a
//! template. Holds a non-owning reference (the template name) rather than a
//! back-pointer, since the scheduler owns all templates exclusively.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};

use crate::domain::ports::{Runner, RunnerError};

use super::job_template::JobTrigger;

/// One concrete scheduled or running execution of a [`super::JobTemplate`].
pub struct JobInstance {
    pub template_name: String,
    pub id: String,
    pub trigger: JobTrigger,
    pub this_run: NaiveDateTime,
    pub group: String,
    pub environ: HashMap<String, String>,
    pub working_dir: std::path::PathBuf,
    pub start_time: Option<NaiveDateTime>,
    pub stop_time: Option<NaiveDateTime>,
    runner: Option<Box<dyn Runner + Send>>,
}

impl JobInstance {
    pub fn new(
        template_name: String,
        serial: u64,
        trigger: JobTrigger,
        this_run: NaiveDateTime,
        group: String,
    ) -> Self {
        Self {
            id: format!("{template_name}-{serial}"),
            template_name,
            trigger,
            this_run,
            group,
            environ: HashMap::new(),
            working_dir: std::path::PathBuf::new(),
            start_time: None,
            stop_time: None,
            runner: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.runner.is_some()
    }

    pub fn attach_runner(&mut self, runner: Box<dyn Runner + Send>, start_time: NaiveDateTime) {
        self.start_time = Some(start_time);
        self.runner = Some(runner);
    }

    pub fn has_finished(&mut self) -> bool {
        match self.runner.as_mut() {
            Some(runner) => runner.has_finished(),
            None => false,
        }
    }

    pub fn terminate(&mut self) -> Result<(), RunnerError> {
        match self.runner.as_mut() {
            Some(runner) => runner.terminate(),
            None => Ok(()),
        }
    }

    /// Flushes output, records the stop time, and returns the exit code.
    pub fn finalize(&mut self) -> Result<i32, RunnerError> {
        let runner = self.runner.as_mut().ok_or(RunnerError::NotStarted)?;
        runner.finalize()?;
        self.stop_time = Some(chrono::Local::now().naive_local());
        runner.returncode().ok_or(RunnerError::TerminateExhausted)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.runner.as_ref().and_then(|r| r.duration())
    }

    pub fn pid(&self) -> Option<i32> {
        self.runner.as_ref().and_then(|r| r.pid())
    }

    pub fn read_output(&mut self) -> Result<String, RunnerError> {
        match self.runner.as_mut() {
            Some(runner) => runner.read_output(),
            None => Ok(String::new()),
        }
    }

    pub fn close(&mut self) -> Result<(), RunnerError> {
        match self.runner.as_mut() {
            Some(runner) => runner.close(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for JobInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobInstance")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .field("this_run", &self.this_run)
            .field("group", &self.group)
            .field("started", &self.is_started())
            .finish()
    }
}
