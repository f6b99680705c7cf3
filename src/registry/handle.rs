/*!
 * Registry Handle
 * Explicit per-instance handle to the shared registry: join/leave protocol,
 * lock-guarded access to the table, and the instance's bus subscription
 */

use super::layout::{RawBusMessage, RegistryHeader, LAYOUT_VERSION, SEGMENT_MAGIC, SEGMENT_SIZE};
use super::types::{
    ProcessEntry, ProcessMode, ProcessStatus, RegistryConfig, RegistryError, RegistryResult,
};
use crate::bus::types::{BusEvent, EventKind};
use crate::core::limits::{ATTACH_TIMEOUT, MAX_INSTANCES, REGISTRY_CAPACITY};
use crate::core::types::Pid;
use crate::ipc::lock::{SharedLock, SharedLockGuard};
use crate::ipc::sem;
use crate::ipc::shm::SharedSegment;
use crate::ipc::IpcError;
use crate::process::control::process_exists;
use log::{debug, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid as NixPid;
use std::ptr::{addr_of_mut, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// What `leave()` did: which attached children were signaled, and whether
/// this was the last instance out, destroying the shared objects.
#[derive(Debug, Default)]
pub struct LeaveReport {
    pub torn_down: bool,
    pub killed: Vec<Pid>,
}

/// Per-instance handle to the shared registry.
///
/// Produced by [`RegistryHandle::join`] and consumed by every core
/// operation; there is no ambient global. All access to the shared table
/// flows through [`RegistryHandle::lock`], whose guard is the only type
/// exposing readers and mutators. Leaving releases the underlying mapping
/// exactly once; an un-left handle leaves on drop.
pub struct RegistryHandle {
    segment: SharedSegment,
    lock: SharedLock,
    config: RegistryConfig,
    instance: Pid,
    slot: usize,
    left: AtomicBool,
}

impl RegistryHandle {
    /// Join the registry for `config.namespace`: create it if this is the
    /// first instance on the host, attach otherwise, then claim a bus
    /// subscriber slot and increment the instance count.
    pub fn join(config: RegistryConfig) -> RegistryResult<Self> {
        config.validate()?;
        let instance = config.instance_id.unwrap_or(std::process::id() as Pid);

        let segment = SharedSegment::open(&config.segment_name(), SEGMENT_SIZE)?;
        let header = segment.as_ptr().cast::<RegistryHeader>();

        if segment.created() {
            // SAFETY: we exclusively created the object; nobody else touches
            // it until the magic is published below.
            unsafe {
                std::ptr::write_bytes(segment.as_ptr(), 0, SEGMENT_SIZE);
                (*header).version = LAYOUT_VERSION;
            }
            // A crashed last generation can leak its lock semaphore. This is
            // a fresh registry, so clear any stale one before siblings (who
            // wait on the magic) can open it.
            clear_stale_lock(&config.lock_name())?;
            // SAFETY: as above; publishing the magic is the last init step.
            unsafe {
                (*header).magic.store(SEGMENT_MAGIC, Ordering::Release);
            }
            info!("Created process registry '{}'", config.namespace);
        } else {
            wait_for_init(header)?;
            debug!("Attached to process registry '{}'", config.namespace);
        }

        // SAFETY: header stays mapped for the life of the handle; the cell
        // itself is atomic.
        let holder = unsafe { NonNull::new_unchecked(addr_of_mut!((*header).lock_holder)) };
        let lock = SharedLock::open(&config.lock_name(), holder)?;

        let slot = match claim_slot(&segment, &lock, instance) {
            Ok(slot) => slot,
            Err(e) => {
                if segment.created() {
                    // Nobody joined the registry we just created; do not
                    // leak the names.
                    lock.unlink();
                    segment.unlink();
                }
                return Err(e);
            }
        };

        info!(
            "Instance {} joined registry '{}' (subscriber slot {})",
            instance, config.namespace, slot
        );

        Ok(Self {
            segment,
            lock,
            config,
            instance,
            slot,
            left: AtomicBool::new(false),
        })
    }

    /// This instance's identity (its OS pid unless overridden).
    #[inline]
    #[must_use]
    pub fn instance_id(&self) -> Pid {
        self.instance
    }

    /// Whether this handle created the registry rather than attaching.
    #[inline]
    #[must_use]
    pub fn created(&self) -> bool {
        self.segment.created()
    }

    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    fn header(&self) -> *mut RegistryHeader {
        self.segment.as_ptr().cast()
    }

    fn lock_inner(&self) -> RegistryResult<RegistryGuard<'_>> {
        let guard = self.lock.acquire(self.instance)?;
        Ok(RegistryGuard {
            handle: self,
            _lock: guard,
        })
    }

    /// Acquire the system-wide registry lock.
    ///
    /// Every read or write of the shared table happens through the returned
    /// guard; it is released on drop.
    pub fn lock(&self) -> RegistryResult<RegistryGuard<'_>> {
        if self.left.load(Ordering::Acquire) {
            return Err(RegistryError::Left);
        }
        self.lock_inner()
    }

    /// Block up to `timeout` for the next bus event addressed to this
    /// instance. `Ok(None)` on timeout.
    ///
    /// Delivers raw events: own echoes and duplicates are the listener's
    /// concern, not the bus's.
    pub fn next_event(&self, timeout: Duration) -> RegistryResult<Option<BusEvent>> {
        if self.left.load(Ordering::Acquire) {
            return Err(RegistryError::Left);
        }
        if !self.wait_event(timeout) {
            return Ok(None);
        }
        Ok(self.lock_inner()?.pop_own_event())
    }

    /// Wait on this instance's subscription semaphore without the lock held.
    fn wait_event(&self, timeout: Duration) -> bool {
        let header = self.header();
        // SAFETY: the slot's semaphore lives in the mapping and was
        // sem_init'd when the slot was claimed; waiting takes no lock.
        let available = unsafe { addr_of_mut!((*header).subscribers[self.slot].available) };
        match sem::timed_wait(available, timeout) {
            Ok(decremented) => decremented,
            Err(e) => {
                warn!("Bus wait failed: {e}");
                false
            }
        }
    }

    /// Leave the registry: signal attached children this instance owns,
    /// publish their Terminated events, release the subscriber slot, and
    /// tear the shared objects down if this was the last instance.
    ///
    /// Runs at most once per handle; later calls are no-ops.
    pub fn leave(&self) -> RegistryResult<LeaveReport> {
        if self.left.swap(true, Ordering::AcqRel) {
            return Ok(LeaveReport::default());
        }

        let mut report = LeaveReport::default();
        {
            let mut guard = self.lock_inner()?;

            let mut i = 0;
            while i < guard.process_count() {
                let (pid, owner, mode) = guard.entry_brief(i);
                if owner != self.instance || mode != ProcessMode::Attached {
                    i += 1;
                    continue;
                }
                if let Err(e) = kill(NixPid::from_raw(pid), Signal::SIGTERM) {
                    warn!("Could not signal attached child {pid}: {e}");
                }
                guard.mark_terminated(i);
                guard.publish(EventKind::Terminated, pid);
                guard.remove_at(i);
                report.killed.push(pid);
            }

            guard.release_slot(self.slot);
            report.torn_down = guard.decrement_instances() == 0;
        }

        if report.torn_down {
            self.lock.unlink();
            self.segment.unlink();
            info!(
                "Instance {} was last out; destroyed registry '{}'",
                self.instance, self.config.namespace
            );
        } else {
            info!("Instance {} left registry '{}'", self.instance, self.config.namespace);
        }

        Ok(report)
    }
}

impl Drop for RegistryHandle {
    fn drop(&mut self) {
        if !self.left.load(Ordering::Acquire) {
            if let Err(e) = self.leave() {
                warn!("Leave on drop failed: {e}");
            }
        }
    }
}

/// Proof of lock possession; the only way to read or write the shared table.
pub struct RegistryGuard<'a> {
    handle: &'a RegistryHandle,
    _lock: SharedLockGuard<'a>,
}

impl RegistryGuard<'_> {
    fn hdr(&self) -> &RegistryHeader {
        // SAFETY: the mapping outlives the handle and no other process
        // mutates it while we hold the registry lock.
        unsafe { &*self.handle.header() }
    }

    fn hdr_mut(&mut self) -> &mut RegistryHeader {
        // SAFETY: as hdr(), and the lock makes this the only mutator.
        unsafe { &mut *self.handle.header() }
    }

    /// Number of live entries in the table.
    #[must_use]
    pub fn process_count(&self) -> usize {
        (self.hdr().process_count as usize).min(REGISTRY_CAPACITY)
    }

    /// Number of currently joined instances.
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.hdr().instance_count
    }

    /// Owned snapshots of every live entry, in table order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProcessEntry> {
        let count = self.process_count();
        self.hdr().entries[..count]
            .iter()
            .filter(|e| e.active != 0)
            .map(|e| e.snapshot())
            .collect()
    }

    /// Append a new running entry owned by this instance.
    pub fn insert(&mut self, pid: Pid, command: &str, mode: ProcessMode) -> RegistryResult<()> {
        let owner = self.handle.instance;
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let count = self.process_count();
        if count >= REGISTRY_CAPACITY {
            return Err(RegistryError::Capacity {
                capacity: REGISTRY_CAPACITY,
            });
        }

        let hdr = self.hdr_mut();
        hdr.entries[count].fill(pid, owner, command, mode, started);
        hdr.process_count = (count + 1) as u32;
        Ok(())
    }

    pub(crate) fn entry_brief(&self, index: usize) -> (Pid, Pid, ProcessMode) {
        let e = &self.hdr().entries[index];
        (e.pid, e.owner_pid, ProcessMode::from_raw(e.mode))
    }

    pub(crate) fn mark_terminated(&mut self, index: usize) {
        self.hdr_mut().entries[index].status = ProcessStatus::Terminated.as_raw();
    }

    /// Remove by overwriting with the last entry and shrinking: O(1), does
    /// not preserve order. Callers iterating with removal must re-examine
    /// the same index afterwards.
    pub(crate) fn remove_at(&mut self, index: usize) -> ProcessEntry {
        let count = self.process_count();
        debug_assert!(index < count);

        let hdr = self.hdr_mut();
        let removed = hdr.entries[index].snapshot();
        let last = count - 1;
        if index != last {
            hdr.entries[index] = hdr.entries[last];
        }
        hdr.entries[last].active = 0;
        hdr.process_count = last as u32;
        removed
    }

    /// Fan one event out to every claimed subscriber slot, this instance's
    /// included (listeners discard their own echoes). Best-effort: a full
    /// ring drops the copy for that subscriber only.
    pub fn publish(&mut self, kind: EventKind, target_pid: Pid) {
        let sender = self.handle.instance;
        let msg = RawBusMessage::new(kind.as_raw(), sender, target_pid);

        let hdr = self.hdr_mut();
        for slot in hdr.subscribers.iter_mut() {
            if slot.pid == 0 {
                continue;
            }
            if slot.push(msg) {
                // claimed slots always hold an initialized semaphore
                if let Err(e) = sem::post(addr_of_mut!(slot.available)) {
                    warn!("Bus post to instance {} failed: {e}", slot.pid);
                }
            } else {
                slot.dropped = slot.dropped.wrapping_add(1);
                debug!(
                    "Bus ring full for instance {}; dropped event for pid {}",
                    slot.pid, target_pid
                );
            }
        }
    }

    /// Pop the next well-formed event from this instance's own ring.
    pub(crate) fn pop_own_event(&mut self) -> Option<BusEvent> {
        let index = self.handle.slot;
        let slot = &mut self.hdr_mut().subscribers[index];
        while let Some(raw) = slot.pop() {
            match BusEvent::from_raw(&raw) {
                Some(event) => return Some(event),
                None => debug!("Discarding malformed bus message (kind {})", raw.kind),
            }
        }
        None
    }

    /// Release claimed subscriber slots whose instance no longer exists and
    /// fold them out of the instance count. Registry entries of dead
    /// instances are the reconciler's concern; this heals membership.
    pub(crate) fn scavenge_instances(&mut self) -> u32 {
        let me = self.handle.instance;
        let hdr = self.hdr_mut();

        let mut cleared = 0u32;
        for slot in hdr.subscribers.iter_mut() {
            if slot.pid == 0 || slot.pid == me || process_exists(slot.pid) {
                continue;
            }
            warn!("Scavenging bus slot of vanished instance {}", slot.pid);
            sem::destroy(addr_of_mut!(slot.available));
            slot.reset(0);
            cleared += 1;
        }
        if cleared > 0 {
            hdr.instance_count = hdr.instance_count.saturating_sub(cleared);
        }
        cleared
    }

    pub(crate) fn release_slot(&mut self, index: usize) {
        let slot = &mut self.hdr_mut().subscribers[index];
        sem::destroy(addr_of_mut!(slot.available));
        slot.reset(0);
    }

    pub(crate) fn decrement_instances(&mut self) -> u32 {
        let hdr = self.hdr_mut();
        if hdr.instance_count == 0 {
            warn!("Instance count underflow; registry was already empty");
            return 0;
        }
        hdr.instance_count -= 1;
        hdr.instance_count
    }
}

/// Spin (bounded) until the creator has published the magic, then check the
/// layout version matches ours.
fn wait_for_init(header: *const RegistryHeader) -> Result<(), IpcError> {
    let start = Instant::now();
    // SAFETY: the magic field is atomic and the mapping is live.
    let magic = unsafe { &(*header).magic };
    while magic.load(Ordering::Acquire) != SEGMENT_MAGIC {
        if start.elapsed() > ATTACH_TIMEOUT {
            return Err(IpcError::AttachTimeout);
        }
        thread::sleep(Duration::from_millis(5));
    }

    // SAFETY: version is written before the magic is published.
    let version = unsafe { (*header).version };
    if version != LAYOUT_VERSION {
        return Err(IpcError::LayoutVersion {
            found: version,
            expected: LAYOUT_VERSION,
        });
    }
    Ok(())
}

/// Unlink a lock semaphore left behind by a previous registry generation.
fn clear_stale_lock(name: &str) -> RegistryResult<()> {
    let cname = std::ffi::CString::new(name)
        .map_err(|_| RegistryError::Ipc(IpcError::InvalidName(name.to_owned())))?;
    match sem::unlink_named(&cname) {
        Ok(()) => {
            warn!("Removed stale registry lock '{name}' from a previous generation");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!("Could not clear stale registry lock '{name}': {e}");
            Ok(())
        }
    }
}

/// Claim a free subscriber slot and count this instance in, under the lock.
fn claim_slot(segment: &SharedSegment, lock: &SharedLock, instance: Pid) -> RegistryResult<usize> {
    let header = segment.as_ptr().cast::<RegistryHeader>();
    let _guard = lock.acquire(instance)?;

    // SAFETY: lock held; we are the only mutator of the header.
    let hdr = unsafe { &mut *header };
    let index = hdr
        .subscribers
        .iter()
        .position(|slot| slot.pid == 0)
        .ok_or(RegistryError::InstanceCapacity {
            capacity: MAX_INSTANCES,
        })?;

    let slot = &mut hdr.subscribers[index];
    sem::init_shared(addr_of_mut!(slot.available), 0)
        .map_err(|e| RegistryError::Ipc(IpcError::SemaphoreInit(e)))?;
    slot.reset(instance);
    hdr.instance_count += 1;
    Ok(index)
}
