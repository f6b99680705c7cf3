/*!
 * Process Control
 * Signaling, liveness probing, and non-blocking reaping by pid
 */

use super::types::TerminateError;
use crate::core::types::Pid;
use log::{info, warn};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid as NixPid;

/// Send SIGTERM to an arbitrary pid.
///
/// Deliberately unchecked against the registry: any instance may signal any
/// pid by number. The reconciler observes the death and repairs the table.
pub fn terminate(pid: Pid) -> Result<(), TerminateError> {
    match kill(NixPid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {
            info!("Sent SIGTERM to pid {pid}");
            Ok(())
        }
        Err(Errno::ESRCH) => Err(TerminateError::NoSuchProcess(pid)),
        Err(Errno::EPERM) => Err(TerminateError::NotPermitted(pid)),
        Err(e) => Err(TerminateError::Signal(e)),
    }
}

/// Zero-effect existence probe.
///
/// EPERM means the pid exists but belongs to someone we may not signal, so
/// it counts as alive. This cannot distinguish "exited and reaped" from
/// "never existed"; both are simply gone.
pub(crate) fn process_exists(pid: Pid) -> bool {
    match kill(NixPid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Outcome of a non-blocking reap attempt on an owned child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reap {
    /// Still running.
    Alive,
    /// Exit status consumed just now.
    Exited,
    /// Not a child of this process (already reaped elsewhere).
    Gone,
}

/// `waitpid(WNOHANG)` on a child this instance spawned.
///
/// Only the actual parent may consume a child's termination status; callers
/// must already have established ownership from the registry entry.
pub(crate) fn reap_nonblocking(pid: Pid) -> Reap {
    match waitpid(NixPid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => Reap::Alive,
        Ok(_) => Reap::Exited,
        Err(Errno::ECHILD) => Reap::Gone,
        Err(e) => {
            warn!("waitpid({pid}) failed: {e}");
            Reap::Alive
        }
    }
}
