//! CLI command implementations: running the scheduler daemon, scaffolding a
//! fresh working directory, and signaling an already-running daemon.

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{close, dup2, fork, setsid, ForkResult, Pid};
use tracing::info;

use crate::application::services::Scheduler;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::signals::block_signals;

use super::SignalKind;

const PID_FILE: &str = "pcron.pid";

const DEFAULT_CRONTAB: &str = "\
[default]\n\
loglevel = info\n\
conflict = ignore\n\
mail = error\n\
\n\
; [my-job]\n\
; command = /usr/bin/true\n\
; time = 0 * * * *\n";

const DEFAULT_ENVIRONMENT: &str = "# shell fragment sourced before every job command\n";

/// `pcron run <dir> [--daemon]`
pub struct RunCommand;

impl RunCommand {
    pub fn execute(directory: PathBuf, daemon: bool) -> Result<()> {
        acquire_pid_lock(&directory)?;

        if daemon {
            daemonize(&directory)?;
        }
        write_pid_file(&directory)?;

        block_signals().context("failed to block signals before the main loop")?;

        let mut scheduler = Scheduler::new(directory.clone(), Box::new(SystemClock));
        scheduler.load();
        scheduler.load_state();
        info!(pid = std::process::id(), directory = %directory.display(), "pcron started");
        scheduler.mainloop();

        let _ = std::fs::remove_file(directory.join(PID_FILE));
        Ok(())
    }
}

/// `pcron install <dir>` — scaffolds a fresh pcron working directory
/// (`crontab.ini`, `environment.sh`, `jobs/`), never overwriting files that
/// already exist.
pub struct InstallCommand;

impl InstallCommand {
    pub fn execute(directory: PathBuf) -> Result<()> {
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("failed to create {}", directory.display()))?;
        std::fs::create_dir_all(directory.join("jobs"))
            .with_context(|| format!("failed to create {}", directory.join("jobs").display()))?;

        write_if_absent(&directory.join("crontab.ini"), DEFAULT_CRONTAB)?;
        write_if_absent(&directory.join("environment.sh"), DEFAULT_ENVIRONMENT)?;

        println!("pcron directory ready at {}", directory.display());
        Ok(())
    }
}

fn write_if_absent(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        println!("  kept existing {}", path.display());
        return Ok(());
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    println!("  wrote {}", path.display());
    Ok(())
}

/// `pcron signal <dir> <shutdown|reload|dump>` — reads `pcron.pid` and
/// sends the corresponding signal to the running daemon.
pub struct SignalCommand;

impl SignalCommand {
    pub fn execute(directory: PathBuf, signal: SignalKind) -> Result<()> {
        let pid_path = directory.join(PID_FILE);
        let contents = std::fs::read_to_string(&pid_path).with_context(|| {
            format!("no running scheduler found ({} not found)", pid_path.display())
        })?;
        let pid: i32 = contents
            .trim()
            .parse()
            .with_context(|| format!("{} does not contain a valid pid", pid_path.display()))?;

        let os_signal = match signal {
            SignalKind::Shutdown => Signal::SIGTERM,
            SignalKind::Reload => Signal::SIGHUP,
            SignalKind::Dump => Signal::SIGUSR1,
        };

        kill(Pid::from_raw(pid), os_signal).with_context(|| format!("failed to signal pid {pid}"))?;
        Ok(())
    }
}

fn write_pid_file(directory: &Path) -> Result<()> {
    std::fs::write(directory.join(PID_FILE), std::process::id().to_string())
        .context("failed to write pid file")
}

/// Refuses to start a second scheduler against the same directory while a
/// `pcron.pid` from a live process is present.
fn acquire_pid_lock(directory: &Path) -> Result<()> {
    let pid_path = directory.join(PID_FILE);
    let Ok(contents) = std::fs::read_to_string(&pid_path) else {
        return Ok(());
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        return Ok(());
    };
    if kill(Pid::from_raw(pid), None).is_ok() {
        bail!(
            "scheduler already running as pid {pid} ({})",
            pid_path.display()
        );
    }
    Ok(())
}

/// Classic double-fork daemonization: detach from the controlling terminal,
/// become a session leader, fork again so the daemon can never reacquire
/// one, then redirect stdio to `logfile.txt` (or `/dev/null` on stdin).
fn daemonize(directory: &Path) -> Result<()> {
    match unsafe { fork() }.context("first fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().context("setsid failed")?;

    match unsafe { fork() }.context("second fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    std::env::set_current_dir(directory).context("failed to chdir into pcron directory")?;

    let log_path = directory.join("logfile.txt");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;
    let log_fd = log_file.as_raw_fd();

    let devnull = OpenOptions::new().read(true).open("/dev/null")?;

    dup2(devnull.as_raw_fd(), 0).context("failed to redirect stdin")?;
    dup2(log_fd, 1).context("failed to redirect stdout")?;
    dup2(log_fd, 2).context("failed to redirect stderr")?;

    let _ = close(devnull.as_raw_fd());

    Ok(())
}
