//! Ports the domain depends on but does not implement: the child-process
//! runner is a hexagonal seam so that job instances stay testable without a
//! real shell fork.

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("shell {0:?} is not in the supported set (sh, bash, ksh, zsh, dash)")]
    UnsupportedShell(String),
    #[error("failed to spawn job process: {0}")]
    SpawnFailed(String),
    #[error("process did not terminate after escalating signals")]
    TerminateExhausted,
    #[error("operation requires a started instance")]
    NotStarted,
    #[error("output capture file error: {0}")]
    OutputIo(String),
}

/// Lifecycle of a single job-process execution, from spawn to finalize.
pub trait Runner {
    /// Non-blocking poll of whether the child has exited.
    fn has_finished(&mut self) -> bool;

    /// Blocks until the child exits, returning its exit code (negative
    /// magnitude is the terminating signal number).
    fn wait(&mut self) -> Result<i32, RunnerError>;

    /// Up to two escalating graceful-termination attempts one second apart,
    /// then a hard kill, then a final one-second check.
    fn terminate(&mut self) -> Result<(), RunnerError>;

    /// Records the stop time and flushes/rewinds the output capture file.
    fn finalize(&mut self) -> Result<(), RunnerError>;

    fn duration(&self) -> Option<Duration>;
    fn pid(&self) -> Option<i32>;
    fn returncode(&self) -> Option<i32>;

    /// Reads the full captured stdout/stderr after `finalize`.
    fn read_output(&mut self) -> Result<String, RunnerError>;

    fn close(&mut self) -> Result<(), RunnerError>;
}
