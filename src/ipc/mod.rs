/*!
 * IPC Module
 * Host-wide primitives shared by all instances: the POSIX shared-memory
 * segment and the named-semaphore registry lock
 */

pub mod lock;
pub mod sem;
pub mod shm;
pub mod types;

pub use types::{IpcError, IpcResult};
