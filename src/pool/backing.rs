// src/pool/backing.rs
//! Backing-memory allocation for the buffer pool's storage array (spec §4.1
//! "Backing memory", design note "Huge-page mapping fallback").
//!
//! Tries, in order: a single mapping backed by 2 MiB huge pages (rounded up
//! to a whole number of pages), a plain anonymous mapping, and finally
//! ordinary heap allocation. Which path succeeded is recorded for
//! diagnostics only — it never changes behavior.

use std::cell::UnsafeCell;
use std::ops::Deref;

use crate::buffer::PacketBuffer;
use crate::error::ConfigError;

/// Which backing-memory strategy a [`crate::pool::BufferPool`] ended up
/// using. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    /// 2 MiB huge-page mapping (`mmap(MAP_HUGETLB)`), rounded up to a whole
    /// number of huge pages.
    HugePage,
    /// Plain anonymous `mmap`, no huge pages.
    AnonymousMmap,
    /// Ordinary heap allocation (`Vec`).
    Heap,
}

const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Owns the pool's `N`-slot storage array, whichever backing strategy
/// produced it.
///
/// Derefs to `[UnsafeCell<PacketBuffer>]` so callers index it like a plain
/// slice; `Drop` releases the mapping (`munmap`) or the heap allocation as
/// appropriate.
pub(super) struct Storage {
    ptr: *mut PacketBuffer,
    len: usize,
    /// Non-zero when `ptr` came from `mmap` and must be `munmap`'d with this
    /// exact length; zero for heap-backed storage.
    mapped_len: usize,
}

// SAFETY: `Storage` is just an owning handle to an array of `PacketBuffer`;
// access to individual elements is serialized by the handle-ownership
// discipline documented on `crate::pool::BufferPool`, the same invariant
// that justifies `PoolInner: Sync`.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    fn from_heap(capacity: usize) -> Self {
        let mut v: Vec<PacketBuffer> = (0..capacity).map(|_| PacketBuffer::new()).collect();
        let ptr = v.as_mut_ptr();
        let len = v.len();
        std::mem::forget(v);
        Self {
            ptr,
            len,
            mapped_len: 0,
        }
    }

    /// # Safety
    ///
    /// `base` must point to a mapping of at least `capacity *
    /// size_of::<PacketBuffer>()` writable bytes, `mapped_len` bytes long,
    /// obtained from `mmap` and not yet unmapped.
    #[cfg(target_os = "linux")]
    unsafe fn from_mmap(base: *mut u8, mapped_len: usize, capacity: usize) -> Self {
        let ptr = base.cast::<PacketBuffer>();
        for i in 0..capacity {
            // SAFETY: slot `i` is within the mapping handed to us by the
            // caller and has not been initialized yet.
            unsafe { ptr.add(i).write(PacketBuffer::new()) };
        }
        Self {
            ptr,
            len: capacity,
            mapped_len,
        }
    }

    fn as_cells(&self) -> &[UnsafeCell<PacketBuffer>] {
        // SAFETY: `PacketBuffer` and `UnsafeCell<PacketBuffer>` share layout
        // (`UnsafeCell<T>` is `#[repr(transparent)]`-equivalent to `T`); `ptr`
        // is valid for `len` elements for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.cast::<UnsafeCell<PacketBuffer>>(), self.len) }
    }
}

impl Deref for Storage {
    type Target = [UnsafeCell<PacketBuffer>];
    fn deref(&self) -> &Self::Target {
        self.as_cells()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if self.mapped_len > 0 {
            #[cfg(target_os = "linux")]
            // SAFETY: `mapped_len` is the exact length passed to the
            // original `mmap` call that produced `self.ptr`.
            unsafe {
                libc::munmap(self.ptr.cast::<libc::c_void>(), self.mapped_len);
            }
        } else {
            // SAFETY: reconstructs the `Vec<PacketBuffer>` that
            // `Storage::from_heap` forgot, with the same pointer/len/cap.
            unsafe {
                drop(Vec::from_raw_parts(self.ptr, self.len, self.len));
            }
        }
    }
}

/// Allocates `capacity` zeroed [`PacketBuffer`] slots using the fallback
/// chain described above.
pub(super) fn allocate_storage(capacity: usize) -> Result<(Storage, BackingKind), ConfigError> {
    let len_bytes = capacity
        .checked_mul(std::mem::size_of::<PacketBuffer>())
        .ok_or_else(|| ConfigError::PoolAllocFailed("size overflow".into()))?;

    #[cfg(target_os = "linux")]
    {
        if let Some((storage, mapped_len)) = mmap_storage(capacity, len_bytes, true) {
            log::info!(
                "buffer pool backing memory: huge pages ({HUGE_PAGE_SIZE} bytes/page, mapped {mapped_len} bytes)"
            );
            return Ok((storage, BackingKind::HugePage));
        }
        if let Some((storage, mapped_len)) = mmap_storage(capacity, len_bytes, false) {
            log::info!(
                "buffer pool backing memory: anonymous mmap (huge pages unavailable, mapped {mapped_len} bytes)"
            );
            return Ok((storage, BackingKind::AnonymousMmap));
        }
        log::warn!("buffer pool backing memory: falling back to heap allocation");
    }

    Ok((Storage::from_heap(capacity), BackingKind::Heap))
}

#[cfg(target_os = "linux")]
fn mmap_storage(capacity: usize, len_bytes: usize, huge: bool) -> Option<(Storage, usize)> {
    let page = if huge { HUGE_PAGE_SIZE } else { page_size() };
    let mapped_len = round_up(len_bytes, page);
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    if huge {
        flags |= libc::MAP_HUGETLB;
    }
    // SAFETY: `MAP_ANONYMOUS` means `fd`/`offset` are ignored; we check the
    // return value for `MAP_FAILED` before using the pointer.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            mapped_len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return None;
    }
    // SAFETY: `ptr` is a fresh mapping of `mapped_len` bytes, large enough
    // for `capacity` `PacketBuffer`s (checked by the caller via `len_bytes`),
    // not yet unmapped.
    let storage = unsafe { Storage::from_mmap(ptr.cast::<u8>(), mapped_len, capacity) };
    Some((storage, mapped_len))
}

#[cfg(target_os = "linux")]
fn page_size() -> usize {
    // SAFETY: `sysconf(_SC_PAGESIZE)` takes no pointers and always returns a
    // small positive value on Linux.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 { sz as usize } else { 4096 }
}

fn round_up(n: usize, align: usize) -> usize {
    if align == 0 {
        return n;
    }
    n.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_storage_is_zeroed_and_sized() {
        let storage = Storage::from_heap(8);
        assert_eq!(storage.len(), 8);
        for cell in storage.iter() {
            let buf = unsafe { &*cell.get() };
            assert_eq!(buf.len(), 0);
        }
    }

    #[test]
    fn allocate_storage_picks_some_backing() {
        let (storage, backing) = allocate_storage(4).unwrap();
        assert_eq!(storage.len(), 4);
        assert!(matches!(
            backing,
            BackingKind::HugePage | BackingKind::AnonymousMmap | BackingKind::Heap
        ));
    }

    #[test]
    fn round_up_works() {
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(4097, 4096), 8192);
    }
}
