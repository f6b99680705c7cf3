/*!
 * System Limits and Constants
 *
 * Centralized location for all capacity bounds, intervals, and well-known
 * names shared by every instance on a host. The raw shared-segment layout is
 * sized from these values, so changing any capacity constant changes the
 * segment layout (see `registry::layout::LAYOUT_VERSION`).
 */

use std::time::Duration;

// =============================================================================
// REGISTRY CAPACITIES
// =============================================================================

/// Maximum number of tracked processes across all instances.
/// The shared table is a fixed array of this many entry slots.
pub const REGISTRY_CAPACITY: usize = 50;

/// Maximum stored command line, in bytes. Longer commands are rejected
/// before spawn rather than truncated in the table.
pub const MAX_COMMAND_BYTES: usize = 256;

/// Maximum instances that may be joined to one registry at a time.
/// Each instance owns exactly one notification subscriber slot.
pub const MAX_INSTANCES: usize = 16;

/// Tokenized launch command arity bound (program name plus arguments).
pub const MAX_LAUNCH_ARGS: usize = 16;

// =============================================================================
// NOTIFICATION BUS
// =============================================================================

/// Per-instance bus ring depth. Must be a power of two so wrapping
/// 32-bit head/tail indices stay consistent across index wraparound.
/// Overflow drops the message for that subscriber; the bus is advisory
/// and the registry remains the source of truth.
pub const SUBSCRIBER_RING: usize = 32;

/// Entries in each listener's local duplicate-suppression window.
pub const SUPPRESSION_WINDOW: usize = 20;

/// Two events for the same target pid within this interval collapse into
/// a single rendered notice at a given listener.
pub const SUPPRESSION_INTERVAL: Duration = Duration::from_secs(2);

/// Bounded bus wait per listener iteration; doubles as the cadence at
/// which the listener observes the cooperative stop flag.
pub const LISTEN_WAIT: Duration = Duration::from_millis(500);

// =============================================================================
// TIMING
// =============================================================================

/// Reconciler period: how often each instance sweeps the registry against
/// live OS process state.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Grace delay between spawning a child and declaring the launch
/// successful; a child that exits within it is a failed launch.
pub const LAUNCH_GRACE: Duration = Duration::from_millis(200);

/// Registry lock wait slice between dead-holder liveness probes.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Bound on waiting for a sibling instance to finish creating and sizing
/// the shared segment before attach gives up.
pub const ATTACH_TIMEOUT: Duration = Duration::from_secs(2);

/// Stop-flag poll cadence used to slice background-thread sleeps.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

// =============================================================================
// NAMING
// =============================================================================

/// Default IPC namespace. Instances sharing a namespace on one host share
/// one registry, one lock, and one notification bus.
pub const DEFAULT_NAMESPACE: &str = "procwarden";
