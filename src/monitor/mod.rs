/*!
 * Reconciler
 * The periodic sweep keeping the shared registry consistent with live OS
 * process state, regardless of which instance introduced an entry
 */

use crate::bus::{BusEvent, EventHub, EventKind};
use crate::core::limits::STOP_POLL_INTERVAL;
use crate::core::types::Pid;
use crate::process::control::{process_exists, reap_nonblocking, Reap};
use crate::registry::{RegistryHandle, RegistryResult};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What one sweep changed.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Pids whose entries were removed because the process is gone.
    pub removed: Vec<Pid>,
    /// Dead-instance subscriber slots released.
    pub scavenged_instances: u32,
}

/// One reconciliation pass over the registry, under the lock.
///
/// Entries owned by this instance are reaped non-blockingly (only the real
/// parent may consume an exit status); foreign entries are probed for bare
/// existence. Gone processes get a Terminated event published before their
/// entry is swap-removed, re-examining the index the swap refilled. Local
/// notices are emitted after the lock is dropped.
pub fn sweep(registry: &RegistryHandle, events: &EventHub) -> RegistryResult<SweepReport> {
    let me = registry.instance_id();
    let mut report = SweepReport::default();

    {
        let mut guard = registry.lock()?;

        let mut index = 0;
        while index < guard.process_count() {
            let (pid, owner, _mode) = guard.entry_brief(index);

            let gone = if owner == me {
                matches!(reap_nonblocking(pid), Reap::Exited | Reap::Gone)
            } else {
                !process_exists(pid)
            };

            if gone {
                guard.publish(EventKind::Terminated, pid);
                guard.remove_at(index);
                report.removed.push(pid);
                // the swap moved a different entry into this index
            } else {
                index += 1;
            }
        }

        report.scavenged_instances = guard.scavenge_instances();
    }

    for &pid in &report.removed {
        let notice = BusEvent {
            kind: EventKind::Terminated,
            sender_pid: me,
            target_pid: pid,
        };
        events.emit(&notice.render());
    }
    if !report.removed.is_empty() {
        info!("Reconciler removed {} exited process(es)", report.removed.len());
    }

    Ok(report)
}

/// The background thread driving [`sweep`] on a fixed period.
pub(crate) struct Reconciler {
    registry: Arc<RegistryHandle>,
    events: EventHub,
    interval: Duration,
    stop: Arc<AtomicBool>,
}

impl Reconciler {
    pub(crate) fn new(
        registry: Arc<RegistryHandle>,
        events: EventHub,
        interval: Duration,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            events,
            interval,
            stop,
        }
    }

    pub(crate) fn run(self) {
        debug!(
            "Reconciler started (instance {}, every {:?})",
            self.registry.instance_id(),
            self.interval
        );
        while !self.stop.load(Ordering::Acquire) {
            if let Err(e) = sweep(&self.registry, &self.events) {
                warn!("Reconciler sweep failed: {e}");
                break;
            }
            self.idle();
        }
        debug!("Reconciler stopped (instance {})", self.registry.instance_id());
    }

    /// Sleep one period in slices so the stop flag is honored promptly.
    /// The flag is only ever observed here, never with the lock held.
    fn idle(&self) {
        let mut remaining = self.interval;
        while !remaining.is_zero() && !self.stop.load(Ordering::Acquire) {
            let slice = remaining.min(STOP_POLL_INTERVAL);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
}
