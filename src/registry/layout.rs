/*!
 * Shared Segment Layout
 * The fixed repr(C) layout every instance maps; zero-filled bytes are a
 * valid empty registry, so the creator only has to publish the magic
 */

use super::types::{ProcessEntry, ProcessMode, ProcessStatus};
use crate::core::limits::{MAX_COMMAND_BYTES, MAX_INSTANCES, REGISTRY_CAPACITY, SUBSCRIBER_RING};
use crate::core::types::Pid;
use std::mem::size_of;
use std::sync::atomic::{AtomicI32, AtomicU32};
use std::time::{Duration, UNIX_EPOCH};

/// Published by the creator once the header is usable; attachers spin on it.
pub(crate) const SEGMENT_MAGIC: u32 = 0x5057_4431;

/// Bumped on any incompatible change to the structs in this file.
pub(crate) const LAYOUT_VERSION: u32 = 1;

/// Total byte size of the mapped segment.
pub(crate) const SEGMENT_SIZE: usize = size_of::<RegistryHeader>();

// Wrapping u32 ring indices are reduced modulo the ring length, which is
// only consistent across wraparound for power-of-two lengths.
const _: () = assert!(SUBSCRIBER_RING.is_power_of_two());

/// One slot of the shared process table.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RawProcessEntry {
    pub pid: Pid,
    pub owner_pid: Pid,
    pub mode: u8,
    pub status: u8,
    pub active: u8,
    _pad: u8,
    pub command_len: u32,
    pub command: [u8; MAX_COMMAND_BYTES],
    pub started_at_secs: i64,
}

impl RawProcessEntry {
    pub(crate) fn fill(
        &mut self,
        pid: Pid,
        owner_pid: Pid,
        command: &str,
        mode: ProcessMode,
        started_at_secs: i64,
    ) {
        self.pid = pid;
        self.owner_pid = owner_pid;
        self.mode = mode.as_raw();
        self.status = ProcessStatus::Running.as_raw();
        self.active = 1;
        self._pad = 0;

        let bytes = command.as_bytes();
        let len = bytes.len().min(MAX_COMMAND_BYTES);
        self.command[..len].copy_from_slice(&bytes[..len]);
        // zero the tail; slots are recycled by swap-remove
        self.command[len..].fill(0);
        self.command_len = len as u32;
        self.started_at_secs = started_at_secs;
    }

    pub(crate) fn command_text(&self) -> String {
        let len = (self.command_len as usize).min(MAX_COMMAND_BYTES);
        String::from_utf8_lossy(&self.command[..len]).into_owned()
    }

    pub(crate) fn snapshot(&self) -> ProcessEntry {
        ProcessEntry {
            pid: self.pid,
            owner_pid: self.owner_pid,
            command: self.command_text(),
            mode: ProcessMode::from_raw(self.mode),
            status: ProcessStatus::from_raw(self.status),
            started_at: UNIX_EPOCH + Duration::from_secs(self.started_at_secs.max(0) as u64),
        }
    }
}

/// One notification bus message as it crosses process boundaries.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RawBusMessage {
    pub kind: u8,
    _pad: [u8; 3],
    pub sender_pid: Pid,
    pub target_pid: Pid,
}

impl RawBusMessage {
    pub(crate) fn new(kind: u8, sender_pid: Pid, target_pid: Pid) -> Self {
        Self {
            kind,
            _pad: [0; 3],
            sender_pid,
            target_pid,
        }
    }
}

/// Per-instance bus subscription: a bounded ring plus a process-shared
/// counting semaphore the owning instance blocks on.
#[repr(C)]
pub(crate) struct SubscriberSlot {
    /// Owning instance pid; 0 marks the slot free.
    pub pid: Pid,
    /// Next read position (monotonic, wrapping).
    pub head: u32,
    /// Next write position (monotonic, wrapping).
    pub tail: u32,
    /// Messages lost to ring overflow since the slot was claimed.
    pub dropped: u32,
    /// Counts queued messages; posted by publishers, waited on unlocked.
    pub available: libc::sem_t,
    pub ring: [RawBusMessage; SUBSCRIBER_RING],
}

impl SubscriberSlot {
    #[inline]
    pub(crate) fn queued(&self) -> u32 {
        self.tail.wrapping_sub(self.head)
    }

    /// Append a message; false when the ring is full (caller counts drops).
    pub(crate) fn push(&mut self, msg: RawBusMessage) -> bool {
        if self.queued() as usize >= SUBSCRIBER_RING {
            return false;
        }
        self.ring[self.tail as usize % SUBSCRIBER_RING] = msg;
        self.tail = self.tail.wrapping_add(1);
        true
    }

    pub(crate) fn pop(&mut self) -> Option<RawBusMessage> {
        if self.queued() == 0 {
            return None;
        }
        let msg = self.ring[self.head as usize % SUBSCRIBER_RING];
        self.head = self.head.wrapping_add(1);
        Some(msg)
    }

    pub(crate) fn reset(&mut self, pid: Pid) {
        self.pid = pid;
        self.head = 0;
        self.tail = 0;
        self.dropped = 0;
    }
}

/// Everything the segment holds. Field order matters to every instance on
/// the host; additions go at the end with a LAYOUT_VERSION bump.
#[repr(C)]
pub(crate) struct RegistryHeader {
    pub magic: AtomicU32,
    pub version: u32,
    pub instance_count: u32,
    pub process_count: u32,
    /// Pid of the current registry-lock holder, 0 when free. Written by the
    /// lock itself; lives here so it is shared like everything else.
    pub lock_holder: AtomicI32,
    pub entries: [RawProcessEntry; REGISTRY_CAPACITY],
    pub subscribers: [SubscriberSlot; MAX_INSTANCES],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed_slot() -> SubscriberSlot {
        // SAFETY: all-zero bytes are a valid empty slot, exactly as the
        // freshly created segment provides them (the semaphore is only
        // touched after sem_init).
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn test_entry_fill_and_snapshot() {
        // SAFETY: zero bytes are a valid empty entry.
        let mut entry: RawProcessEntry = unsafe { std::mem::zeroed() };
        entry.fill(1234, 42, "sleep 100", ProcessMode::Detached, 1_700_000_000);

        let snap = entry.snapshot();
        assert_eq!(snap.pid, 1234);
        assert_eq!(snap.owner_pid, 42);
        assert_eq!(snap.command, "sleep 100");
        assert_eq!(snap.mode, ProcessMode::Detached);
        assert_eq!(snap.status, ProcessStatus::Running);
    }

    #[test]
    fn test_entry_fill_clears_previous_command() {
        let mut entry: RawProcessEntry = unsafe { std::mem::zeroed() };
        entry.fill(1, 1, "a-much-longer-command --with --flags", ProcessMode::Attached, 0);
        entry.fill(2, 1, "ls", ProcessMode::Attached, 0);
        assert_eq!(entry.command_text(), "ls");
    }

    #[test]
    fn test_ring_push_pop_order() {
        let mut slot = zeroed_slot();
        assert!(slot.pop().is_none());

        for i in 0..5 {
            assert!(slot.push(RawBusMessage::new(1, 10, 100 + i)));
        }
        for i in 0..5 {
            assert_eq!(slot.pop().unwrap().target_pid, 100 + i);
        }
        assert!(slot.pop().is_none());
    }

    #[test]
    fn test_ring_overflow_rejected() {
        let mut slot = zeroed_slot();
        for i in 0..SUBSCRIBER_RING as i32 {
            assert!(slot.push(RawBusMessage::new(0, 1, i)));
        }
        assert!(!slot.push(RawBusMessage::new(0, 1, 999)));
        assert_eq!(slot.queued() as usize, SUBSCRIBER_RING);
    }

    #[test]
    fn test_ring_survives_index_wraparound() {
        let mut slot = zeroed_slot();
        slot.head = u32::MAX - 2;
        slot.tail = u32::MAX - 2;

        for i in 0..6 {
            assert!(slot.push(RawBusMessage::new(1, 1, i)));
        }
        for i in 0..6 {
            assert_eq!(slot.pop().unwrap().target_pid, i);
        }
    }
}
