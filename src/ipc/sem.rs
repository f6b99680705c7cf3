/*!
 * POSIX Semaphores
 * Thin wrappers over the libc semaphore family; nix carries no bindings
 * for sem_open/sem_timedwait, so this is the one place that calls libc
 * directly
 */

use std::ffi::CStr;
use std::io;
use std::time::Duration;

/// Process-shared flag for `sem_init`.
const PSHARED: libc::c_int = 1;

/// Open-or-create a named semaphore shared by every instance on the host.
pub(crate) fn open_named(name: &CStr, initial: libc::c_uint) -> io::Result<*mut libc::sem_t> {
    // SAFETY: name is nul-terminated; O_CREAT without O_EXCL makes this
    // idempotent across racing instances.
    let sem = unsafe { libc::sem_open(name.as_ptr(), libc::O_CREAT, 0o600 as libc::c_uint, initial) };
    if sem == libc::SEM_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(sem)
    }
}

/// Close this process's handle on a named semaphore.
pub(crate) fn close_named(sem: *mut libc::sem_t) {
    // SAFETY: sem came from open_named and is closed at most once.
    unsafe {
        libc::sem_close(sem);
    }
}

/// Remove a named semaphore from the system namespace.
pub(crate) fn unlink_named(name: &CStr) -> io::Result<()> {
    // SAFETY: name is nul-terminated.
    let rc = unsafe { libc::sem_unlink(name.as_ptr()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Initialize an unnamed process-shared semaphore living in shared memory.
pub(crate) fn init_shared(sem: *mut libc::sem_t, initial: libc::c_uint) -> io::Result<()> {
    // SAFETY: sem points into a live MAP_SHARED mapping and is not yet
    // initialized (slot claiming is serialized by the registry lock).
    let rc = unsafe { libc::sem_init(sem, PSHARED, initial) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Destroy an unnamed semaphore previously set up with [`init_shared`].
pub(crate) fn destroy(sem: *mut libc::sem_t) {
    // SAFETY: sem was initialized by init_shared; no waiter can be parked on
    // it here (destruction is serialized by the registry lock).
    unsafe {
        libc::sem_destroy(sem);
    }
}

pub(crate) fn post(sem: *mut libc::sem_t) -> io::Result<()> {
    // SAFETY: sem is a live semaphore; sem_post is async-signal-safe.
    let rc = unsafe { libc::sem_post(sem) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Wait up to `timeout` for the semaphore.
///
/// Returns `Ok(true)` when decremented, `Ok(false)` on timeout. EINTR is
/// retried against the original absolute deadline.
pub(crate) fn timed_wait(sem: *mut libc::sem_t, timeout: Duration) -> io::Result<bool> {
    let deadline = deadline_from_now(timeout);
    loop {
        // SAFETY: sem is a live semaphore; deadline is a valid timespec.
        let rc = unsafe { libc::sem_timedwait(sem, &deadline) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ETIMEDOUT) => return Ok(false),
            Some(libc::EINTR) => continue,
            _ => return Err(err),
        }
    }
}

/// Absolute CLOCK_REALTIME deadline `timeout` from now, as sem_timedwait
/// expects.
fn deadline_from_now(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: now is a valid out-pointer.
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
    }
    let mut sec = now.tv_sec + timeout.as_secs() as libc::time_t;
    let mut nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if nsec >= 1_000_000_000 {
        sec += 1;
        nsec -= 1_000_000_000;
    }
    libc::timespec { tv_sec: sec, tv_nsec: nsec }
}
