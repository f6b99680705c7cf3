/*!
 * Process Types
 * Errors for launching and terminating tracked processes
 */

use crate::core::types::Pid;
use crate::registry::RegistryError;
use nix::errno::Errno;
use thiserror::Error;

/// Launch operation result
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Launch errors
///
/// None of these leave a registry entry or a Created event behind: the
/// launch either fully registers a surviving child or does nothing.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Command exceeds {max} bytes")]
    CommandTooLong { max: usize },

    #[error("Too many arguments (limit {max})")]
    TooManyArguments { max: usize },

    #[error("Spawn failed: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Command exited during the launch grace period (exit status {status:?})")]
    ExitedEarly { status: Option<i32> },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Termination errors
#[derive(Error, Debug)]
pub enum TerminateError {
    #[error("No such process: {0}")]
    NoSuchProcess(Pid),

    #[error("Not permitted to signal process {0}")]
    NotPermitted(Pid),

    #[error("Signal failed: {0}")]
    Signal(#[source] Errno),
}
