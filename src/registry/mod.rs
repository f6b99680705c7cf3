/*!
 * Registry Module
 * The shared process table: raw cross-process layout, owned snapshot types,
 * and the join/leave handle every core operation flows through
 */

pub mod handle;
pub(crate) mod layout;
pub mod types;

pub use handle::{LeaveReport, RegistryGuard, RegistryHandle};
pub use types::{
    ProcessEntry, ProcessMode, ProcessStatus, RegistryConfig, RegistryError, RegistryResult,
};
