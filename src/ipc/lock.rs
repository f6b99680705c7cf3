/*!
 * Registry Lock
 * The single system-wide mutex serializing all registry access, built on a
 * named POSIX semaphore with a recorded holder pid for dead-holder recovery
 */

use super::sem;
use super::types::{IpcError, IpcResult};
use crate::core::limits::LOCK_RETRY_INTERVAL;
use crate::core::types::Pid;
use crate::process::control::process_exists;
use log::warn;
use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};

/// System-wide binary lock shared by every instance.
///
/// The semaphore carries the mutual exclusion; the `holder` cell (which
/// lives in the shared segment beside the data the lock protects) records
/// which pid currently holds it. A holder that dies without releasing is
/// detected by waiters probing the recorded pid, and exactly one of them
/// revives the semaphore. The tiny windows in which the holder pid is not
/// yet recorded (or already cleared) are accepted; they span two
/// instructions, not a critical section.
pub(crate) struct SharedLock {
    sem: *mut libc::sem_t,
    name: CString,
    holder: NonNull<AtomicI32>,
}

// SAFETY: the semaphore pointer is process-stable and sem_* calls are
// thread-safe; the holder cell is atomic.
unsafe impl Send for SharedLock {}
unsafe impl Sync for SharedLock {}

impl SharedLock {
    /// Open-or-create the named lock. Initial value 1 (unlocked); creation
    /// races between instances are resolved by the kernel.
    pub(crate) fn open(name: &str, holder: NonNull<AtomicI32>) -> IpcResult<Self> {
        let cname = CString::new(name).map_err(|_| IpcError::InvalidName(name.to_owned()))?;
        let sem = sem::open_named(&cname, 1).map_err(IpcError::LockOpen)?;
        Ok(Self {
            sem,
            name: cname,
            holder,
        })
    }

    #[inline]
    fn holder(&self) -> &AtomicI32 {
        // SAFETY: holder points into the shared segment, which outlives the
        // lock (the segment is unmapped only after the lock is dropped).
        unsafe { self.holder.as_ref() }
    }

    /// Acquire the lock, blocking for as long as a live holder keeps it.
    ///
    /// Waits in bounded slices; after each timeout the recorded holder is
    /// probed and, if it no longer exists, the winner of the exchange on the
    /// holder cell posts the semaphore back to life.
    pub(crate) fn acquire(&self, requester: Pid) -> IpcResult<SharedLockGuard<'_>> {
        loop {
            if sem::timed_wait(self.sem, LOCK_RETRY_INTERVAL).map_err(IpcError::LockWait)? {
                self.holder().store(requester, Ordering::Release);
                return Ok(SharedLockGuard { lock: self });
            }

            let holder = self.holder().load(Ordering::Acquire);
            if holder != 0 && holder != requester && !process_exists(holder) {
                if self
                    .holder()
                    .compare_exchange(holder, 0, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    warn!("Recovering registry lock abandoned by dead pid {holder}");
                    sem::post(self.sem).map_err(IpcError::LockWait)?;
                }
            }
        }
    }

    /// Remove the named semaphore; called by the last instance to leave.
    pub(crate) fn unlink(&self) {
        if let Err(e) = sem::unlink_named(&self.name) {
            warn!("sem_unlink('{}') failed: {}", self.name.to_string_lossy(), e);
        }
    }
}

impl Drop for SharedLock {
    fn drop(&mut self) {
        sem::close_named(self.sem);
    }
}

/// RAII guard; releasing clears the holder record, then posts.
pub(crate) struct SharedLockGuard<'a> {
    lock: &'a SharedLock,
}

impl Drop for SharedLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.holder().store(0, Ordering::Release);
        if let Err(e) = sem::post(self.lock.sem) {
            warn!("Registry lock release failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn test_lock(tag: &str) -> (SharedLock, &'static AtomicI32, CString) {
        let holder: &'static AtomicI32 = Box::leak(Box::new(AtomicI32::new(0)));
        let name = format!("/pw-lock-{}-{}", tag, std::process::id());
        let lock = SharedLock::open(&name, NonNull::from(holder)).unwrap();
        (lock, holder, CString::new(name).unwrap())
    }

    fn self_pid() -> Pid {
        std::process::id() as Pid
    }

    #[test]
    fn test_acquire_records_holder() {
        let (lock, holder, name) = test_lock("record");

        let guard = lock.acquire(self_pid()).unwrap();
        assert_eq!(holder.load(Ordering::Acquire), self_pid());
        drop(guard);
        assert_eq!(holder.load(Ordering::Acquire), 0);

        sem::unlink_named(&name).unwrap();
    }

    #[test]
    fn test_acquire_serializes_threads() {
        let (lock, _holder, name) = test_lock("serialize");
        let lock = Arc::new(lock);
        let hits = Arc::new(AtomicU32::new(0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let lock = Arc::clone(&lock);
                let hits = Arc::clone(&hits);
                scope.spawn(move || {
                    for _ in 0..25 {
                        let _guard = lock.acquire(self_pid()).unwrap();
                        let seen = hits.load(Ordering::Relaxed);
                        std::thread::yield_now();
                        hits.store(seen + 1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(hits.load(Ordering::Relaxed), 100);
        sem::unlink_named(&name).unwrap();
    }

    #[test]
    fn test_dead_holder_is_recovered() {
        let (lock, holder, name) = test_lock("recover");

        // A pid that has already exited and been reaped.
        let dead = {
            let mut child = Command::new("true").spawn().unwrap();
            let pid = child.id() as Pid;
            child.wait().unwrap();
            pid
        };

        // Simulate a holder that died inside the critical section: the
        // semaphore stays taken and the holder cell records a dead pid.
        let guard = lock.acquire(self_pid()).unwrap();
        holder.store(dead, Ordering::Release);
        std::mem::forget(guard);

        let start = Instant::now();
        let recovered = lock.acquire(self_pid()).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        drop(recovered);

        sem::unlink_named(&name).unwrap();
    }
}
