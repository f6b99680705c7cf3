/*!
 * Process Launcher
 * Spawns tracked children and registers the ones that survive the grace
 * window, publishing their Created event in the same lock acquisition
 */

use super::types::{LaunchError, LaunchResult};
use crate::bus::EventKind;
use crate::core::limits::{LAUNCH_GRACE, MAX_COMMAND_BYTES, MAX_LAUNCH_ARGS};
use crate::core::types::Pid;
use crate::registry::{ProcessMode, RegistryHandle};
use log::{info, warn};
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

/// Launches and registers child processes for one instance.
pub struct Launcher {
    registry: Arc<RegistryHandle>,
}

impl Launcher {
    #[must_use]
    pub fn new(registry: Arc<RegistryHandle>) -> Self {
        Self { registry }
    }

    /// Spawn `command` and track it.
    ///
    /// Either the registry gains exactly one running entry and one Created
    /// event is published, or neither happens: a child that exits within the
    /// grace window (usually a program that could not really start) and a
    /// child the full registry cannot take are both torn back down.
    pub fn launch(&self, command: &str, mode: ProcessMode) -> LaunchResult<Pid> {
        let argv = split_command(command)?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).stdin(Stdio::null());

        match mode {
            ProcessMode::Attached => {
                // attached children share the owning instance's terminal
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            ProcessMode::Detached => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
                // SAFETY: pre_exec runs in the forked child before exec;
                // setsid is async-signal-safe and touches no shared state.
                // The new session lets the child outlive our process group.
                unsafe {
                    cmd.pre_exec(|| {
                        if libc::setsid() == -1 {
                            return Err(io::Error::last_os_error());
                        }
                        Ok(())
                    });
                }
            }
        }

        let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;
        let pid = child.id() as Pid;

        // Grace window: a child already gone here never really started.
        thread::sleep(LAUNCH_GRACE);
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                return Err(LaunchError::ExitedEarly {
                    status: status.code(),
                })
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(LaunchError::Spawn(e));
            }
        }

        let mut guard = self.registry.lock()?;
        if let Err(e) = guard.insert(pid, command, mode) {
            drop(guard);
            warn!("Registry rejected pid {pid} ({e}); stopping the fresh child");
            let _ = child.kill();
            let _ = child.wait();
            return Err(e.into());
        }
        guard.publish(EventKind::Created, pid);
        drop(guard);

        info!("Launched '{command}' as pid {pid} ({mode})");
        Ok(pid)
    }
}

/// Whitespace tokenization with bounded arity and total length.
pub(crate) fn split_command(command: &str) -> LaunchResult<Vec<String>> {
    if command.len() > MAX_COMMAND_BYTES {
        return Err(LaunchError::CommandTooLong {
            max: MAX_COMMAND_BYTES,
        });
    }

    let argv: Vec<String> = command.split_whitespace().map(str::to_owned).collect();
    if argv.is_empty() {
        return Err(LaunchError::EmptyCommand);
    }
    if argv.len() > MAX_LAUNCH_ARGS {
        return Err(LaunchError::TooManyArguments {
            max: MAX_LAUNCH_ARGS,
        });
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_basic() {
        let argv = split_command("sleep 100").unwrap();
        assert_eq!(argv, vec!["sleep".to_owned(), "100".to_owned()]);
    }

    #[test]
    fn test_split_collapses_whitespace() {
        let argv = split_command("  ls   -l\t/tmp ").unwrap();
        assert_eq!(argv, vec!["ls".to_owned(), "-l".to_owned(), "/tmp".to_owned()]);
    }

    #[test]
    fn test_split_rejects_empty() {
        assert!(matches!(split_command(""), Err(LaunchError::EmptyCommand)));
        assert!(matches!(split_command("   "), Err(LaunchError::EmptyCommand)));
    }

    #[test]
    fn test_split_rejects_excess_args() {
        let command = vec!["x"; MAX_LAUNCH_ARGS + 1].join(" ");
        assert!(matches!(
            split_command(&command),
            Err(LaunchError::TooManyArguments { .. })
        ));
    }

    #[test]
    fn test_split_rejects_overlong_command() {
        let command = format!("echo {}", "a".repeat(MAX_COMMAND_BYTES));
        assert!(matches!(
            split_command(&command),
            Err(LaunchError::CommandTooLong { .. })
        ));
    }
}
