/*!
 * Core Types
 * Common types used across the supervisor
 */

/// OS process identifier, signed as the kernel interfaces expose it.
///
/// Doubles as the instance identifier: every supervisor instance is keyed
/// by the pid of the process that joined the registry.
pub type Pid = i32;
