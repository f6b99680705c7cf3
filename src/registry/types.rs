/*!
 * Registry Types
 * Owned snapshot types, configuration, and errors for the shared registry
 */

use crate::core::limits::DEFAULT_NAMESPACE;
use crate::core::types::Pid;
use crate::ipc::IpcError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Registry operation result
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry is full: capacity {capacity}")]
    Capacity { capacity: usize },

    #[error("All {capacity} instance slots are claimed")]
    InstanceCapacity { capacity: usize },

    #[error("Registry handle has already left")]
    Left,

    #[error(transparent)]
    Ipc(#[from] IpcError),
}

/// How a tracked process is tied to the instance that launched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Killed by its owner on clean shutdown.
    Attached,
    /// Runs in its own session and outlives its owner.
    Detached,
}

impl ProcessMode {
    #[inline]
    pub(crate) fn as_raw(self) -> u8 {
        match self {
            ProcessMode::Attached => 0,
            ProcessMode::Detached => 1,
        }
    }

    #[inline]
    pub(crate) fn from_raw(raw: u8) -> Self {
        if raw == 1 {
            ProcessMode::Detached
        } else {
            ProcessMode::Attached
        }
    }
}

impl fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessMode::Attached => write!(f, "Attached"),
            ProcessMode::Detached => write!(f, "Detached"),
        }
    }
}

/// Stored process state.
///
/// `Terminated` only ever appears transiently: entries are marked just
/// before removal, and removed slots are compacted away immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Terminated,
}

impl ProcessStatus {
    #[inline]
    pub(crate) fn as_raw(self) -> u8 {
        match self {
            ProcessStatus::Running => 0,
            ProcessStatus::Terminated => 1,
        }
    }

    #[inline]
    pub(crate) fn from_raw(raw: u8) -> Self {
        if raw == 1 {
            ProcessStatus::Terminated
        } else {
            ProcessStatus::Running
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "Running"),
            ProcessStatus::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Owned snapshot of one tracked process, read out of the shared table
/// under the registry lock. Only live slots are ever snapshotted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessEntry {
    pub pid: Pid,
    pub owner_pid: Pid,
    pub command: String,
    pub mode: ProcessMode,
    pub status: ProcessStatus,
    pub started_at: SystemTime,
}

impl ProcessEntry {
    /// Wall-clock time since launch, for display.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed().unwrap_or_default()
    }
}

/// Where an instance's shared objects live and who the instance claims to be.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// IPC namespace; instances sharing it share one registry.
    pub namespace: String,
    /// Instance identity; defaults to the OS pid of this process.
    pub instance_id: Option<Pid>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_owned(),
            instance_id: None,
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub(crate) fn segment_name(&self) -> String {
        format!("/{}-registry", self.namespace)
    }

    pub(crate) fn lock_name(&self) -> String {
        format!("/{}-lock", self.namespace)
    }

    /// POSIX IPC names must be one path component; keep namespaces to a
    /// conservative charset and length so both derived names stay legal.
    pub(crate) fn validate(&self) -> RegistryResult<()> {
        let ok_chars = self
            .namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if self.namespace.is_empty() || self.namespace.len() > 200 || !ok_chars {
            return Err(IpcError::InvalidName(self.namespace.clone()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_raw_round_trip() {
        assert_eq!(ProcessMode::from_raw(ProcessMode::Attached.as_raw()), ProcessMode::Attached);
        assert_eq!(ProcessMode::from_raw(ProcessMode::Detached.as_raw()), ProcessMode::Detached);
        // unknown bytes degrade to Attached rather than poisoning a snapshot
        assert_eq!(ProcessMode::from_raw(7), ProcessMode::Attached);
    }

    #[test]
    fn test_namespace_validation() {
        assert!(RegistryConfig::with_namespace("procwarden").validate().is_ok());
        assert!(RegistryConfig::with_namespace("team-a.prod_2").validate().is_ok());
        assert!(RegistryConfig::with_namespace("").validate().is_err());
        assert!(RegistryConfig::with_namespace("a/b").validate().is_err());
        assert!(RegistryConfig::with_namespace("x".repeat(300)).validate().is_err());
    }
}
