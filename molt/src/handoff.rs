//! Successor spawning and takeover acknowledgment.
//!
//! A handoff exports the listening descriptor, re-executes the current
//! binary with a fresh `--upgrade` flag, and leaves the socket open for
//! the child. The parent never terminates itself on a restart trigger:
//! the successor, once running, sends it SIGQUIT — that signal is the
//! takeover acknowledgment, handled like any other termination trigger.

use std::os::unix::io::AsRawFd;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, Signal};
use nix::unistd::getppid;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::listener::{ENV_LISTEN_FD, Listener};

/// Flag appended to the successor's command line marking it as spawned
/// during a handoff. Its absence means a cold start.
pub const UPGRADE_FLAG: &str = "--upgrade";

/// Mutual exclusion for the whole decide-and-spawn sequence.
///
/// Acquired with a compare-and-set, so duplicate or rapid repeated
/// restart triggers yield exactly one in-flight handoff attempt. The
/// guard is released on every failure path; after a successful spawn it
/// stays held until the successor terminates this process.
#[derive(Debug, Default)]
pub struct RestartGuard(AtomicBool);

impl RestartGuard {
    /// Creates a released guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the guard. Returns `false` if a handoff is
    /// already in progress.
    pub fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the guard, allowing a later handoff attempt.
    pub fn release(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Whether a handoff is currently in progress.
    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Reconstructs the successor's argument list from the current one:
/// any prior [`UPGRADE_FLAG`] is removed and a fresh one appended.
pub fn successor_args<I>(current: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut args: Vec<String> = current.into_iter().filter(|a| a != UPGRADE_FLAG).collect();
    args.push(UPGRADE_FLAG.to_owned());
    args
}

/// Spawns the successor process, passing it the inherited descriptor.
///
/// Standard streams are inherited. The duplicated descriptor's number is
/// advertised through [`ENV_LISTEN_FD`]; the duplicate is closed in this
/// process once the spawn has happened (the child holds its own copy).
/// Returns the successor's pid.
pub fn spawn_successor(listener: &Listener) -> Result<u32> {
    let exe = std::env::current_exe().map_err(Error::Handoff)?;
    let args = successor_args(std::env::args().skip(1));
    let fd = listener.export_fd().map_err(Error::Handoff)?;

    let child = Command::new(exe)
        .args(&args)
        .env(ENV_LISTEN_FD, fd.as_raw_fd().to_string())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(Error::Handoff)?;

    // fd drops here: the parent's duplicate closes, the child's copy lives on.
    Ok(child.id())
}

/// Sends the takeover acknowledgment to the parent process.
///
/// Called by a successor once it reaches `Running`. Skipped when the
/// parent is already gone (this process reparented to pid 1). A delivery
/// failure is logged; the old parent will then keep serving until it
/// receives an independent termination signal.
pub fn notify_parent() {
    let ppid = getppid();
    if ppid.as_raw() <= 1 {
        info!("parent already exited; skipping takeover signal");
        return;
    }
    match signal::kill(ppid, Signal::SIGQUIT) {
        Ok(()) => info!(parent_pid = ppid.as_raw(), "signaled parent to terminate"),
        Err(e) => warn!(parent_pid = ppid.as_raw(), error = %e, "failed to signal parent"),
    }
}
