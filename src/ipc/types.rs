/*!
 * IPC Types
 * Errors for shared-segment and lock setup/teardown
 */

use nix::errno::Errno;
use thiserror::Error;

/// IPC operation result
pub type IpcResult<T> = Result<T, IpcError>;

/// IPC errors
///
/// Everything here is fatal-at-startup: these surface while an instance is
/// still creating or attaching to the shared objects, before it has joined,
/// so failing out leaves nothing in an ambiguous state.
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Invalid IPC name: {0}")]
    InvalidName(String),

    #[error("Shared segment create failed: {0}")]
    SegmentCreate(#[source] Errno),

    #[error("Shared segment attach failed: {0}")]
    SegmentAttach(#[source] Errno),

    #[error("Shared segment map failed: {0}")]
    SegmentMap(#[source] Errno),

    #[error("Shared segment resize/stat failed: {0}")]
    SegmentIo(#[source] std::io::Error),

    #[error("Timed out waiting for segment initialization")]
    AttachTimeout,

    #[error("Segment layout version mismatch: found {found}, expected {expected}")]
    LayoutVersion { found: u32, expected: u32 },

    #[error("Lock semaphore open failed: {0}")]
    LockOpen(#[source] std::io::Error),

    #[error("Lock wait failed: {0}")]
    LockWait(#[source] std::io::Error),

    #[error("Subscriber semaphore init failed: {0}")]
    SemaphoreInit(#[source] std::io::Error),
}
