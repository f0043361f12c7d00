//! Platform virtual-memory provider.
//!
//! An [`Arena`](crate::Arena) never talks to the OS directly. It goes
//! through a [`VirtualMemory`] implementation, which knows how to reserve a
//! range of address space, commit and decommit sub-ranges of it, and hand
//! it back. [`SystemMemory`] is the implementation for the build target:
//!
//! | Operation | Unix | Windows |
//! |---|---|---|
//! | reserve | `mmap(PROT_NONE)` | `VirtualAlloc(MEM_RESERVE)` |
//! | commit | `mprotect(PROT_READ \| PROT_WRITE)` | `VirtualAlloc(MEM_COMMIT)` |
//! | decommit | `madvise(MADV_DONTNEED)` + `mprotect(PROT_NONE)` | `VirtualFree(MEM_DECOMMIT)` |
//! | release | `munmap` | `VirtualFree(MEM_RELEASE)` |
//!
//! Commit ranges are widened to whole pages and decommit ranges narrowed
//! to whole pages, so callers may use any granularity.

#![allow(unsafe_code)]

use std::io;
use std::ptr::NonNull;

/// Reserve/commit/decommit/release of virtual address ranges.
///
/// # Safety
///
/// Implementations must do what they say: after `commit(ptr, size)`
/// returns `Ok`, every byte of `[ptr, ptr + size)` must be readable and
/// writable until it is decommitted or released. The arena dereferences
/// committed memory without further checks.
pub unsafe trait VirtualMemory {
    /// Reserve `size` bytes of address space without committing any of it.
    ///
    /// `size` is never zero.
    fn reserve(&self, size: usize) -> io::Result<NonNull<u8>>;

    /// Make `[ptr, ptr + size)` readable and writable.
    ///
    /// # Safety
    ///
    /// The range must lie inside a reservation returned by
    /// [`reserve`](Self::reserve) on this provider that has not been
    /// released.
    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()>;

    /// Drop the physical backing of `[ptr, ptr + size)`, keeping the range
    /// reserved.
    ///
    /// # Safety
    ///
    /// As for [`commit`](Self::commit). In addition, nothing may reference
    /// the range afterwards until it is committed again.
    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()>;

    /// Give a whole reservation back to the OS.
    ///
    /// # Safety
    ///
    /// `base` and `size` must be exactly a pair previously returned by and
    /// passed to [`reserve`](Self::reserve), and nothing may reference the
    /// range afterwards.
    unsafe fn release(&self, base: NonNull<u8>, size: usize) -> io::Result<()>;
}

/// The build target's virtual-memory system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemMemory {
    page_size: usize,
}

impl SystemMemory {
    /// Query the system page size and build a provider around it.
    pub fn new() -> Self {
        Self {
            page_size: sys::page_size(),
        }
    }

    /// The page size commits and decommits are rounded to.
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: `commit` maps the covering pages read/write or reports an error.
unsafe impl VirtualMemory for SystemMemory {
    fn reserve(&self, size: usize) -> io::Result<NonNull<u8>> {
        sys::reserve(size)
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()> {
        let addr = ptr.as_ptr() as usize;
        let (start, len) = crate::raw::pages_covering(addr, size, self.page_size);
        // SAFETY: widening to page boundaries stays inside the reservation,
        // which is itself page-aligned and page-sized.
        unsafe { sys::commit(ptr.as_ptr().sub(addr - start), len) }
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) -> io::Result<()> {
        let (start, len) = crate::raw::pages_within(ptr.as_ptr() as usize, size, self.page_size);
        if len == 0 {
            return Ok(());
        }
        let offset = start - ptr.as_ptr() as usize;
        // SAFETY: narrowing keeps the range inside the caller's range.
        unsafe { sys::decommit(ptr.as_ptr().add(offset), len) }
    }

    unsafe fn release(&self, base: NonNull<u8>, size: usize) -> io::Result<()> {
        // SAFETY: forwarded caller contract.
        unsafe { sys::release(base.as_ptr(), size) }
    }
}

#[cfg(unix)]
mod sys {
    use std::io;
    use std::ptr::{self, NonNull};

    pub(super) fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size < 1 {
            4096
        } else {
            size as usize
        }
    }

    pub(super) fn reserve(size: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: anonymous private mapping at a kernel-chosen address.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
    }

    pub(super) unsafe fn commit(ptr: *mut u8, size: usize) -> io::Result<()> {
        // SAFETY: the range is page-aligned and inside a live mapping.
        let rc = unsafe { libc::mprotect(ptr.cast(), size, libc::PROT_READ | libc::PROT_WRITE) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) unsafe fn decommit(ptr: *mut u8, size: usize) -> io::Result<()> {
        // SAFETY: the range is page-aligned and inside a live mapping.
        let rc = unsafe { libc::madvise(ptr.cast(), size, libc::MADV_DONTNEED) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: as above.
        let rc = unsafe { libc::mprotect(ptr.cast(), size, libc::PROT_NONE) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) unsafe fn release(ptr: *mut u8, size: usize) -> io::Result<()> {
        // SAFETY: caller passes the exact reservation.
        let rc = unsafe { libc::munmap(ptr.cast(), size) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(windows)]
mod sys {
    use std::io;
    use std::ptr::{self, NonNull};

    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE,
        PAGE_NOACCESS, PAGE_READWRITE,
    };
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    pub(super) fn page_size() -> usize {
        // SAFETY: SYSTEM_INFO is plain data; GetSystemInfo fills it in.
        let info = unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info
        };
        info.dwPageSize as usize
    }

    pub(super) fn reserve(size: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: reserving at a system-chosen address.
        let ptr = unsafe { VirtualAlloc(ptr::null(), size, MEM_RESERVE, PAGE_NOACCESS) };
        NonNull::new(ptr.cast::<u8>()).ok_or_else(io::Error::last_os_error)
    }

    pub(super) unsafe fn commit(ptr: *mut u8, size: usize) -> io::Result<()> {
        // SAFETY: the range is inside a live reservation.
        let p = unsafe { VirtualAlloc(ptr.cast(), size, MEM_COMMIT, PAGE_READWRITE) };
        if p.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) unsafe fn decommit(ptr: *mut u8, size: usize) -> io::Result<()> {
        // SAFETY: the range is page-aligned and inside a live reservation.
        let ok = unsafe { VirtualFree(ptr.cast(), size, MEM_DECOMMIT) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) unsafe fn release(ptr: *mut u8, _size: usize) -> io::Result<()> {
        // Size must be zero for MEM_RELEASE.
        // SAFETY: caller passes the base of a live reservation.
        let ok = unsafe { VirtualFree(ptr.cast(), 0, MEM_RELEASE) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
