//! Executable page management
//!
//! Design: Code is written while pages are read-write, then the whole block
//! flips to read-execute. A `PageBlock` owns its pages and frees them exactly
//! once; a compare-and-set on `disposed` makes repeated or concurrent
//! disposal idempotent.

use crate::error::{BindError, Result};
use crate::logging::{log_page_alloc, log_page_free};
use crate::runtime::counters;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Page protection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadWrite,
    ReadExecute,
}

/// Page allocation service
pub trait PageAllocator: Send + Sync {
    fn page_size(&self) -> usize;

    /// Allocate whole pages; `None` when no memory is available
    fn allocate(&self, pages: usize, protection: Protection) -> Option<NonNull<u8>>;

    /// Change protection of previously allocated pages
    fn protect(&self, address: NonNull<u8>, pages: usize, protection: Protection) -> bool;

    fn free(&self, address: NonNull<u8>, pages: usize);
}

/// Operating system pages (mmap / VirtualAlloc)
pub struct SystemPageAllocator {
    page_size: usize,
}

impl SystemPageAllocator {
    pub fn new() -> Self {
        Self {
            page_size: system_page_size(),
        }
    }

    /// Allocator with a larger logical page; rounded up to whole system pages
    pub fn with_page_size(size: usize) -> Self {
        let system = system_page_size();
        let pages = (size.max(1) + system - 1) / system;
        Self {
            page_size: pages * system,
        }
    }
}

impl Default for SystemPageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn system_page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

#[cfg(windows)]
fn system_page_size() -> usize {
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
    // SAFETY: GetSystemInfo fills the zeroed struct
    unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info.dwPageSize as usize
    }
}

#[cfg(unix)]
impl PageAllocator for SystemPageAllocator {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn allocate(&self, pages: usize, protection: Protection) -> Option<NonNull<u8>> {
        let len = pages.checked_mul(self.page_size)?;
        // SAFETY: anonymous private mapping with no fixed address
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                unix_protection(protection),
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return None;
        }
        NonNull::new(ptr as *mut u8)
    }

    fn protect(&self, address: NonNull<u8>, pages: usize, protection: Protection) -> bool {
        // SAFETY: address and length come from a prior allocate
        unsafe {
            libc::mprotect(
                address.as_ptr() as *mut libc::c_void,
                pages * self.page_size,
                unix_protection(protection),
            ) == 0
        }
    }

    fn free(&self, address: NonNull<u8>, pages: usize) {
        // SAFETY: address and length come from a prior allocate
        unsafe {
            libc::munmap(address.as_ptr() as *mut libc::c_void, pages * self.page_size);
        }
    }
}

#[cfg(unix)]
fn unix_protection(protection: Protection) -> libc::c_int {
    match protection {
        Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        Protection::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
    }
}

#[cfg(windows)]
impl PageAllocator for SystemPageAllocator {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn allocate(&self, pages: usize, protection: Protection) -> Option<NonNull<u8>> {
        use winapi::um::memoryapi::VirtualAlloc;
        use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE};

        let len = pages.checked_mul(self.page_size)?;
        // SAFETY: fresh reservation with no fixed address
        let ptr = unsafe {
            VirtualAlloc(
                std::ptr::null_mut(),
                len,
                MEM_COMMIT | MEM_RESERVE,
                windows_protection(protection),
            )
        };
        NonNull::new(ptr as *mut u8)
    }

    fn protect(&self, address: NonNull<u8>, pages: usize, protection: Protection) -> bool {
        use winapi::um::memoryapi::VirtualProtect;

        let mut old = 0;
        // SAFETY: address and length come from a prior allocate
        unsafe {
            VirtualProtect(
                address.as_ptr() as *mut _,
                pages * self.page_size,
                windows_protection(protection),
                &mut old,
            ) != 0
        }
    }

    fn free(&self, address: NonNull<u8>, _pages: usize) {
        use winapi::um::memoryapi::VirtualFree;
        use winapi::um::winnt::MEM_RELEASE;

        // SAFETY: releases the whole reservation made by allocate
        unsafe {
            VirtualFree(address.as_ptr() as *mut _, 0, MEM_RELEASE);
        }
    }
}

#[cfg(windows)]
fn windows_protection(protection: Protection) -> u32 {
    use winapi::um::winnt::{PAGE_EXECUTE_READ, PAGE_READWRITE};
    match protection {
        Protection::ReadWrite => PAGE_READWRITE,
        Protection::ReadExecute => PAGE_EXECUTE_READ,
    }
}

/// Contiguous pages housing stubs or closure trampolines
pub struct PageBlock {
    allocator: Arc<dyn PageAllocator>,
    address: NonNull<u8>,
    pages: usize,
    disposed: AtomicBool,
}

// SAFETY: the block only hands out its address; writes happen before
// sealing, under the owner's exclusive construction
unsafe impl Send for PageBlock {}
unsafe impl Sync for PageBlock {}

impl PageBlock {
    /// Allocate read-write pages covering at least `bytes`
    pub fn allocate(allocator: Arc<dyn PageAllocator>, bytes: usize) -> Result<Self> {
        let page_size = allocator.page_size();
        let pages = ((bytes + page_size - 1) / page_size).max(1);
        let address = allocator
            .allocate(pages, Protection::ReadWrite)
            .ok_or(BindError::NativeMemoryExhausted {
                requested_bytes: pages * page_size,
            })?;

        log_page_alloc(address.as_ptr() as usize, pages);
        counters().page_block_allocated();
        Ok(Self {
            allocator,
            address,
            pages,
            disposed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.address.as_ptr() as usize
    }

    #[inline]
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Usable bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.pages * self.allocator.page_size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages == 0
    }

    /// Raw pointer to `offset` within the block
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset < self.len());
        // SAFETY: offset is within the allocation
        unsafe { self.address.as_ptr().add(offset) }
    }

    /// Writable view of the block
    ///
    /// # Safety
    /// The block must still be read-write and no other view may be live.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.address.as_ptr(), self.len())
    }

    /// Flip the block to read-execute
    pub fn seal(&self) -> Result<()> {
        if self
            .allocator
            .protect(self.address, self.pages, Protection::ReadExecute)
        {
            Ok(())
        } else {
            Err(BindError::NativeMemoryExhausted {
                requested_bytes: self.len(),
            })
        }
    }

    /// Release the pages; only the first call frees
    pub fn dispose(&self) -> bool {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.allocator.free(self.address, self.pages);
        log_page_free(self.address(), self.pages);
        counters().page_block_freed();
        true
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for PageBlock {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for PageBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBlock")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("pages", &self.pages)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
