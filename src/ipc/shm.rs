/*!
 * Shared Memory Segment
 * Create-exclusive-or-attach wrapper around a POSIX shared-memory object
 */

use super::types::{IpcError, IpcResult};
use crate::core::limits::ATTACH_TIMEOUT;
use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::thread;
use std::time::{Duration, Instant};

/// One mapped POSIX shared-memory object.
///
/// The first instance to reference a name creates and sizes the object;
/// everyone else attaches to it. Whether this handle was the creator is
/// recorded so the caller knows who zero-initializes the contents.
pub(crate) struct SharedSegment {
    name: String,
    ptr: NonNull<c_void>,
    len: usize,
    created: bool,
}

// SAFETY: the mapping is plain bytes at a stable address; all access to its
// contents is serialized by the registry lock.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create the named object exclusively, or attach if it already exists.
    ///
    /// Attachers wait (bounded) for the creator to finish sizing the object
    /// before mapping, so a mapping never extends past the file and faults.
    pub(crate) fn open(name: &str, len: usize) -> IpcResult<Self> {
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;
        let (fd, created) = match shm_open(name, OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR, mode)
        {
            Ok(fd) => (fd, true),
            Err(Errno::EEXIST) => match shm_open(name, OFlag::O_RDWR, mode) {
                Ok(fd) => (fd, false),
                Err(e) => return Err(IpcError::SegmentAttach(e)),
            },
            Err(e) => return Err(IpcError::SegmentCreate(e)),
        };

        let file = File::from(fd);
        if created {
            file.set_len(len as u64).map_err(IpcError::SegmentIo)?;
        } else {
            wait_for_len(&file, len)?;
        }

        let length = NonZeroUsize::new(len).ok_or(IpcError::SegmentMap(Errno::EINVAL))?;
        // SAFETY: the object is at least `len` bytes long and stays mapped
        // until Drop; MAP_SHARED makes writes visible to sibling instances.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .map_err(IpcError::SegmentMap)?;

        debug!(
            "{} shared segment '{}' ({} bytes)",
            if created { "Created" } else { "Attached to" },
            name,
            len
        );

        Ok(Self {
            name: name.to_owned(),
            ptr,
            len,
            created,
        })
    }

    /// Whether this handle created the object (and must zero-initialize it).
    #[inline]
    pub(crate) fn created(&self) -> bool {
        self.created
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }

    /// Remove the object from the system namespace. Existing mappings stay
    /// valid; the memory is reclaimed once the last one is unmapped.
    pub(crate) fn unlink(&self) {
        if let Err(e) = shm_unlink(self.name.as_str()) {
            warn!("shm_unlink('{}') failed: {}", self.name, e);
        }
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the mapping established in open(), and it
        // is unmapped exactly once.
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!("munmap('{}') failed: {}", self.name, e);
        }
    }
}

fn wait_for_len(file: &File, len: usize) -> IpcResult<()> {
    let start = Instant::now();
    loop {
        let size = file.metadata().map_err(IpcError::SegmentIo)?.len();
        if size >= len as u64 {
            return Ok(());
        }
        if start.elapsed() > ATTACH_TIMEOUT {
            return Err(IpcError::AttachTimeout);
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(tag: &str) -> String {
        format!("/pw-shm-{}-{}", tag, std::process::id())
    }

    #[test]
    fn test_create_then_attach_shares_bytes() {
        let name = test_name("share");
        let a = SharedSegment::open(&name, 4096).unwrap();
        assert!(a.created());

        let b = SharedSegment::open(&name, 4096).unwrap();
        assert!(!b.created());

        // SAFETY: both mappings cover the same 4096-byte object.
        unsafe {
            a.as_ptr().write(0xAB);
            assert_eq!(b.as_ptr().read(), 0xAB);
        }

        a.unlink();
    }

    #[test]
    fn test_unlink_removes_name() {
        let name = test_name("unlink");
        let seg = SharedSegment::open(&name, 4096).unwrap();
        seg.unlink();

        let again = SharedSegment::open(&name, 4096).unwrap();
        assert!(again.created(), "name should have been free after unlink");
        again.unlink();
    }
}
