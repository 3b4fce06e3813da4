//! Event/Signal Inbox: blocks the signals the scheduler cares about for the
//! lifetime of the process and delivers them one at a time through an
//! interruptible sleep, so the main loop never races a handler against its
//! own state mutations.

use std::time::Duration as StdDuration;

use nix::sys::signal::{SigSet, Signal};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("failed to mask signals: {0}")]
    MaskFailed(#[source] nix::Error),
}

/// The subset of signals the scheduler honors, per the external interface
/// contract (`SIGUSR2` is accepted but intentionally ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerSignal {
    Shutdown,
    Reload,
    Dump,
    ChildReaped,
}

fn watched_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set.add(Signal::SIGHUP);
    set.add(Signal::SIGUSR1);
    set.add(Signal::SIGUSR2);
    set.add(Signal::SIGCHLD);
    set
}

/// Blocks the watched signals process-wide. Must be called once before the
/// main loop starts; the signals then arrive only through [`wait_for_signal`].
pub fn block_signals() -> Result<(), SignalError> {
    watched_set()
        .thread_block()
        .map_err(SignalError::MaskFailed)
}

/// Sleeps for up to `timeout`, returning early with the delivered signal if
/// one of the watched signals arrives, or `None` on timeout. Implemented
/// with `sigtimedwait(2)` directly since `nix` does not expose a timed
/// variant of `sigwait`.
pub fn wait_for_signal(timeout: StdDuration) -> Option<SchedulerSignal> {
    let set = watched_set();
    let raw_set = set.as_ref();
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };

    let signo = unsafe { libc::sigtimedwait(raw_set as *const _, std::ptr::null_mut(), &ts) };
    if signo < 0 {
        return None;
    }

    match signo {
        x if x == libc::SIGINT || x == libc::SIGTERM => Some(SchedulerSignal::Shutdown),
        x if x == libc::SIGHUP => Some(SchedulerSignal::Reload),
        x if x == libc::SIGUSR1 => Some(SchedulerSignal::Dump),
        x if x == libc::SIGCHLD => Some(SchedulerSignal::ChildReaped),
        _ => None,
    }
}
