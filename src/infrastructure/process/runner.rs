//! Child Runner: wraps one job-process's lifecycle — script preparation,
//! spawn, poll, escalating termination, and output capture.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDateTime};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::domain::ports::{Runner, RunnerError};

/// Login shells the runner will exec job scripts under.
pub const SUPPORTED_SHELLS: &[&str] = &["sh", "bash", "ksh", "zsh", "dash"];

/// Spawns and supervises a single job-process, per [`Runner`].
pub struct ChildRunner {
    child: Option<Child>,
    pid: Option<i32>,
    returncode: Option<i32>,
    start: NaiveDateTime,
    stop: Option<NaiveDateTime>,
    output_path: PathBuf,
    output_file: Option<File>,
}

impl ChildRunner {
    /// Writes `jobs/<name>/command.sh` with the init/command wrapper, opens
    /// `jobs/<name>/output.txt` for the child's combined stdout/stderr, and
    /// forks the login shell over it.
    pub fn spawn(
        working_dir: &Path,
        shell: &str,
        init_code: &str,
        command: &str,
        environ: &HashMap<String, String>,
    ) -> Result<Self, RunnerError> {
        let shell_name = Path::new(shell)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(shell);
        if !SUPPORTED_SHELLS.contains(&shell_name) {
            return Err(RunnerError::UnsupportedShell(shell.to_string()));
        }

        std::fs::create_dir_all(working_dir)
            .map_err(|e| RunnerError::OutputIo(e.to_string()))?;

        let script_path = working_dir.join("command.sh");
        let script = format!("set -ea\n{init_code}\nset +ea\n{command}\n");
        std::fs::write(&script_path, script).map_err(|e| RunnerError::OutputIo(e.to_string()))?;

        let output_path = working_dir.join("output.txt");
        let output_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&output_path)
            .map_err(|e| RunnerError::OutputIo(e.to_string()))?;

        let stdout_handle = output_file
            .try_clone()
            .map_err(|e| RunnerError::OutputIo(e.to_string()))?;
        let stderr_handle = output_file
            .try_clone()
            .map_err(|e| RunnerError::OutputIo(e.to_string()))?;

        let child = Command::new(shell)
            .arg(&script_path)
            .current_dir(working_dir)
            .env_clear()
            .envs(environ)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_handle))
            .stderr(Stdio::from(stderr_handle))
            .spawn()
            .map_err(|e| RunnerError::SpawnFailed(e.to_string()))?;

        let pid = child.id() as i32;

        Ok(Self {
            child: Some(child),
            pid: Some(pid),
            returncode: None,
            start: chrono::Local::now().naive_local(),
            stop: None,
            output_path,
            output_file: Some(output_file),
        })
    }

    fn poll_exit(child: &mut Child) -> Option<i32> {
        match child.try_wait() {
            Ok(Some(status)) => Some(exit_code_from(status)),
            _ => None,
        }
    }

    fn send_signal(&self, signal: Signal) -> Result<(), RunnerError> {
        let Some(pid) = self.pid else { return Ok(()) };
        kill(Pid::from_raw(pid), signal).map_err(|e| RunnerError::SpawnFailed(e.to_string()))
    }
}

fn exit_code_from(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    status.code().unwrap_or(-1)
}

impl Runner for ChildRunner {
    fn has_finished(&mut self) -> bool {
        if self.returncode.is_some() {
            return true;
        }
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        if let Some(code) = Self::poll_exit(child) {
            self.returncode = Some(code);
            true
        } else {
            false
        }
    }

    fn wait(&mut self) -> Result<i32, RunnerError> {
        if let Some(code) = self.returncode {
            return Ok(code);
        }
        let child = self
            .child
            .as_mut()
            .ok_or(RunnerError::TerminateExhausted)?;
        let status = child
            .wait()
            .map_err(|e| RunnerError::SpawnFailed(e.to_string()))?;
        let code = exit_code_from(status);
        self.returncode = Some(code);
        Ok(code)
    }

    fn terminate(&mut self) -> Result<(), RunnerError> {
        if self.has_finished() {
            return Ok(());
        }

        for _ in 0..2 {
            self.send_signal(Signal::SIGTERM)?;
            sleep(StdDuration::from_secs(1));
            if self.has_finished() {
                return Ok(());
            }
        }

        self.send_signal(Signal::SIGKILL)?;
        sleep(StdDuration::from_secs(1));
        if self.has_finished() {
            Ok(())
        } else {
            Err(RunnerError::TerminateExhausted)
        }
    }

    fn finalize(&mut self) -> Result<(), RunnerError> {
        if self.returncode.is_none() {
            self.returncode = Some(self.wait()?);
        }
        self.stop = Some(chrono::Local::now().naive_local());
        if let Some(file) = self.output_file.as_mut() {
            file.flush().map_err(|e| RunnerError::OutputIo(e.to_string()))?;
            file.seek(SeekFrom::Start(0))
                .map_err(|e| RunnerError::OutputIo(e.to_string()))?;
        }
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        self.stop.map(|stop| stop - self.start)
    }

    fn pid(&self) -> Option<i32> {
        self.pid
    }

    fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    fn read_output(&mut self) -> Result<String, RunnerError> {
        let Some(file) = self.output_file.as_mut() else {
            return Ok(String::new());
        };
        file.seek(SeekFrom::Start(0))
            .map_err(|e| RunnerError::OutputIo(e.to_string()))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)
            .map_err(|e| RunnerError::OutputIo(e.to_string()))?;
        Ok(buf)
    }

    fn close(&mut self) -> Result<(), RunnerError> {
        self.output_file.take();
        self.child.take();
        Ok(())
    }
}

impl std::fmt::Debug for ChildRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildRunner")
            .field("pid", &self.pid)
            .field("returncode", &self.returncode)
            .field("output_path", &self.output_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_shell() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChildRunner::spawn(
            dir.path(),
            "/usr/bin/fish",
            "",
            "true",
            &HashMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RunnerError::UnsupportedShell(_)));
    }

    #[test]
    fn runs_true_and_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner =
            ChildRunner::spawn(dir.path(), "/bin/sh", "", "exit 0", &HashMap::new()).unwrap();
        let code = runner.wait().unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ChildRunner::spawn(
            dir.path(),
            "/bin/sh",
            "",
            "echo hello",
            &HashMap::new(),
        )
        .unwrap();
        runner.wait().unwrap();
        runner.finalize().unwrap();
        let output = runner.read_output().unwrap();
        assert!(output.contains("hello"));
    }

    #[test]
    fn nonzero_exit_is_reported_positive() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner =
            ChildRunner::spawn(dir.path(), "/bin/sh", "", "exit 7", &HashMap::new()).unwrap();
        assert_eq!(runner.wait().unwrap(), 7);
    }
}
