//! Small helpers shared by everything that forks.

use crate::command::{ExitCode, status};
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::io::Write;

/// Block until `pid` terminates, retrying when a signal interrupts the wait.
pub fn wait_for(pid: Pid) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// Collect every child that has already terminated, without blocking.
///
/// Returns how many were reaped.
pub fn reap_finished() -> usize {
    let mut reaped = 0;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => return reaped,
            Ok(status) => {
                tracing::debug!(?status, "reaped background child");
                reaped += 1;
            }
        }
    }
}

/// Shell-style exit code of a terminated child.
///
/// A child killed by a signal reports `128 + signal`; any other wait status
/// is reported as [`status::UNKNOWN`].
pub fn exit_code(wait_status: WaitStatus) -> ExitCode {
    match wait_status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
        _ => status::UNKNOWN,
    }
}

/// Flush buffered standard output so a forked child does not inherit and
/// re-emit it.
pub fn flush_stdout() {
    if let Err(e) = std::io::stdout().flush() {
        tracing::warn!("failed to flush stdout: {}", e);
    }
}
