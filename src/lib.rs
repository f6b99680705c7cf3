/*!
 * procwarden
 *
 * Cooperative multi-instance process supervision over POSIX shared memory.
 * Every invocation on a host joins one shared registry of tracked child
 * processes, guarded by a system-wide lock, reconciled against live OS
 * state by a periodic sweep, and mirrored to sibling instances through a
 * per-subscriber notification bus.
 */

pub mod bus;
pub mod core;
pub mod ipc;
pub mod monitor;
pub mod process;
pub mod registry;
pub mod supervisor;

// Re-exports
pub use crate::bus::{BusEvent, EventHub, EventKind, EventSink};
pub use crate::core::types::Pid;
pub use crate::ipc::{IpcError, IpcResult};
pub use crate::monitor::{sweep, SweepReport};
pub use crate::process::{terminate, LaunchError, LaunchResult, Launcher, TerminateError};
pub use crate::registry::{
    LeaveReport, ProcessEntry, ProcessMode, ProcessStatus, RegistryConfig, RegistryError,
    RegistryHandle, RegistryResult,
};
pub use crate::supervisor::{Supervisor, SupervisorBuilder, SupervisorError};
