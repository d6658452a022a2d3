//! Page-aligned executable memory with W^X discipline.
//!
//! The region is mapped read+write for code emission and patching, then
//! sealed to read+execute before the first call. It is never writable and
//! executable at the same time. x86-64 has coherent instruction caches, so
//! no explicit flush is needed between write and execute.

use std::io;
use std::ptr;
use std::slice;

/// An anonymous private mapping sized up to whole pages. Dropping the
/// region unmaps it, invalidating any function pointers derived from it.
pub struct ExecutableMemory {
    ptr: *mut u8,
    len: usize,
    sealed: bool,
}

// Safety: after `seal` the mapping is immutable and position-independent
// of any thread state; before it, mutation requires `&mut self`.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

impl ExecutableMemory {
    /// Map a read-write region of at least `len` bytes.
    pub fn new(len: usize) -> io::Result<Self> {
        let len = round_to_pages(len.max(1));

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(ExecutableMemory {
            ptr: ptr as *mut u8,
            len,
            sealed: false,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The writable view. Only available before `seal`.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        debug_assert!(!self.sealed, "write to sealed executable memory");
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Flip the whole region to read+execute, dropping write permission.
    pub fn seal(&mut self) -> io::Result<()> {
        let rc = unsafe {
            libc::mprotect(
                self.ptr as *mut libc::c_void,
                self.len,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        self.sealed = true;
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

fn round_to_pages(len: usize) -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page = if page > 0 { page as usize } else { 4096 };
    (len + page - 1) & !(page - 1)
}
