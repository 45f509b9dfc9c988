// src/pool/mod.rs
//! Two-tier lock-free buffer pool (spec §4.1, component 2: `BufferPool`).

mod backing;
mod global_stack;
mod stats;

pub use backing::BackingKind;
pub use stats::PoolStats;

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::buffer::PacketBuffer;
use crate::error::{ConfigError, ConfigResult};
use global_stack::GlobalStack;

/// Opaque handle to a pooled [`PacketBuffer`].
///
/// A thin index into the pool's storage array, not a raw pointer — chosen so
/// that resolving a handle to a buffer stays memory-safe (bounds-checked)
/// while preserving the single-ownership, pointer-sized-opaque-value contract
/// of spec §3/§9 ("Raw pointers in rings": "parameterize the ring by element
/// type rather than erasing pointers; the ownership transfer semantics are
/// the same"). [`SpscRing`](crate::ring::SpscRing) transports this type
/// directly.
pub type BufferHandle = u32;

/// Sentinel meaning "no buffer" — returned by [`BufferPool::alloc`] on
/// exhaustion (spec §4.1 "Failure modes").
pub const NONE_HANDLE: BufferHandle = u32::MAX;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

struct PoolInner {
    id: u64,
    storage: backing::Storage,
    free: GlobalStack,
    backing: BackingKind,
    thread_local_cache_size: usize,
    burst_transfer_size: usize,
    allocated: AtomicU32,
    acquired: AtomicU64,
    returned: AtomicU64,
    cache_hits: AtomicU64,
}

// Safety: every slot in `storage` is accessed by at most one holder of its
// `BufferHandle` at a time (pool free stack XOR thread-local cache XOR ring
// slot XOR worker XOR TX batch — spec §3). `PoolInner` itself only ever hands
// out handles, never the storage directly, so this discipline is enforced at
// the `BufferPool`/`PooledBuffer` API boundary, not by the borrow checker.
unsafe impl Sync for PoolInner {}
unsafe impl Send for PoolInner {}

/// Bounded, two-tier lock-free pool of [`PacketBuffer`]s (spec §4.1).
///
/// Mirrors the three-tier acquisition cascade of the teacher library's
/// `FastBufferPool`generalized to the spec's exact global-stack CAS protocol
/// and explicit backing-memory fallback chain. Intended to be shared across
/// threads via `Arc<BufferPool>`.
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

thread_local! {
    /// Single-slot per-thread cache: bound to at most one pool at a time.
    /// Switching pools drains this slot back into the *previous* pool's
    /// global stack before rebinding (spec §4.1 "Pool-switch"). Holding the
    /// `Arc<PoolInner>` clone keeps that pool's storage alive for as long as
    /// this cache references it, trading the spec's documented "handles leak
    /// into destroyed storage" caveat for a safe, dangling-pointer-free
    /// deferred-drop instead (see `DESIGN.md`).
    static CACHE: RefCell<Option<CacheSlot>> = const { RefCell::new(None) };
}

struct CacheSlot {
    pool: Arc<PoolInner>,
    handles: Vec<BufferHandle>,
}

impl BufferPool {
    /// Creates a pool with `capacity` buffer slots and the given per-thread
    /// cache/burst sizes.
    ///
    /// Tries huge-page backing memory first, then a plain anonymous mapping,
    /// then falls back to ordinary heap allocation (spec §4.1 "Backing
    /// memory"); [`Self::backing`] reports which path succeeded.
    pub fn new(
        capacity: usize,
        thread_local_cache_size: usize,
        burst_transfer_size: usize,
    ) -> ConfigResult<Self> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if thread_local_cache_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "thread_local_cache_size must be non-zero".into(),
            ));
        }
        if burst_transfer_size == 0 || burst_transfer_size > thread_local_cache_size {
            return Err(ConfigError::InvalidConfig(format!(
                "burst_transfer_size {burst_transfer_size} must be in (0, thread_local_cache_size={thread_local_cache_size}]"
            )));
        }

        let (storage, backing) = backing::allocate_storage(capacity)?;
        let free = GlobalStack::new_full(capacity as u32);

        let inner = Arc::new(PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            storage,
            free,
            backing,
            thread_local_cache_size,
            burst_transfer_size,
            allocated: AtomicU32::new(capacity as u32),
            acquired: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        });

        log::info!(
            "buffer pool initialized: capacity={capacity} backing={:?}",
            inner.backing
        );

        Ok(Self { inner })
    }

    /// Total number of buffer slots (`N`).
    pub fn capacity(&self) -> usize {
        self.inner.storage.len()
    }

    /// Which backing-memory strategy succeeded at construction (diagnostics
    /// only; spec §4.1).
    pub fn backing(&self) -> BackingKind {
        self.inner.backing
    }

    fn rebind_cache_if_needed(&self) {
        CACHE.with(|cell| {
            let mut slot = cell.borrow_mut();
            let needs_switch = match slot.as_ref() {
                Some(s) => s.pool.id != self.inner.id,
                None => false,
            };
            if needs_switch {
                let old = slot.take().unwrap();
                for h in old.handles {
                    old.pool.free.push_one(h);
                }
            }
            if slot.is_none() {
                *slot = Some(CacheSlot {
                    pool: Arc::clone(&self.inner),
                    handles: Vec::with_capacity(self.inner.thread_local_cache_size),
                });
            }
        });
    }

    /// Allocates a buffer handle.
    ///
    /// Fast path: pop from the calling thread's cache. Slow path: reserve up
    /// to `burst_transfer_size` handles from the global stack into the
    /// cache, then pop one. Returns [`NONE_HANDLE`] if both tiers are empty
    /// (spec §4.1 "Allocation").
    pub fn alloc(&self) -> BufferHandle {
        self.rebind_cache_if_needed();
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);

        let from_cache = CACHE.with(|cell| {
            let mut slot = cell.borrow_mut();
            slot.as_mut().and_then(|s| s.handles.pop())
        });
        if let Some(h) = from_cache {
            self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
            return h;
        }

        let xfer = self.inner.free.pop_burst(self.inner.burst_transfer_size);
        if xfer.is_empty() {
            return NONE_HANDLE;
        }
        let result = CACHE.with(|cell| {
            let mut slot = cell.borrow_mut();
            let s = slot.as_mut().expect("cache bound above");
            s.handles.extend_from_slice(&xfer);
            s.handles.pop()
        });
        result.unwrap_or(NONE_HANDLE)
    }

    /// Returns a handle to the pool.
    ///
    /// Fast path: push into the calling thread's cache if it has room. Slow
    /// path: flush `burst_transfer_size` handles from the bottom of the
    /// cache to the global stack, then push the new handle (spec §4.1
    /// "Deallocation"). A no-op on [`NONE_HANDLE`].
    pub fn free(&self, handle: BufferHandle) {
        if handle == NONE_HANDLE {
            return;
        }
        self.rebind_cache_if_needed();
        self.inner.returned.fetch_add(1, Ordering::Relaxed);

        let overflow = CACHE.with(|cell| {
            let mut slot = cell.borrow_mut();
            let s = slot.as_mut().expect("cache bound above");
            if s.handles.len() < self.inner.thread_local_cache_size {
                s.handles.push(handle);
                None
            } else {
                let n = self.inner.burst_transfer_size.min(s.handles.len());
                let drained: Vec<BufferHandle> = s.handles.drain(0..n).collect();
                s.handles.push(handle);
                Some(drained)
            }
        });
        if let Some(drained) = overflow {
            for h in drained {
                self.inner.free.push_one(h);
            }
        }
    }

    /// Immutable access to the buffer behind `handle`.
    ///
    /// # Safety
    ///
    /// `handle` must have been returned by [`Self::alloc`] on this pool and
    /// not yet passed to [`Self::free`], and the caller must not hold any
    /// other live reference to the same handle's buffer (the single-owner
    /// discipline of spec §3 is the caller's responsibility — the pool only
    /// hands out handles, it does not track their liveness).
    #[inline]
    pub unsafe fn get(&self, handle: BufferHandle) -> &PacketBuffer {
        unsafe { &*self.inner.storage[handle as usize].get() }
    }

    /// Mutable access to the buffer behind `handle`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::get`].
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self, handle: BufferHandle) -> &mut PacketBuffer {
        unsafe { &mut *self.inner.storage[handle as usize].get() }
    }

    /// Number of handles currently idle on the global stack.
    ///
    /// Does not include handles sitting in thread-local caches.
    pub fn available(&self) -> usize {
        self.inner.free.len()
    }

    /// Snapshot of pool statistics. All counters are `Relaxed`; eventually
    /// consistent (spec §5 "Counters").
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.inner.storage.len(),
            available: self.inner.free.len(),
            acquired: self.inner.acquired.load(Ordering::Relaxed),
            returned: self.inner.returned.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Pushes every handle in the calling thread's cache back to the global
    /// stack. Call before a long-lived thread exits to avoid stranding
    /// handles in TLS until thread teardown.
    pub fn clear_thread_cache(&self) {
        CACHE.with(|cell| {
            let mut slot = cell.borrow_mut();
            if let Some(s) = slot.as_mut() {
                if s.pool.id == self.inner.id {
                    for h in s.handles.drain(..) {
                        self.inner.free.push_one(h);
                    }
                }
            }
        });
    }
}

impl Clone for BufferPool {
    /// Cheap `Arc` clone; all clones share the same storage and free stack.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn alloc_free_roundtrip() {
        let pool = BufferPool::new(16, 4, 2).unwrap();
        let h = pool.alloc();
        assert_ne!(h, NONE_HANDLE);
        unsafe {
            pool.get_mut(h).copy_from(&[1, 2, 3]);
            assert_eq!(pool.get(h).as_slice(), &[1, 2, 3]);
        }
        pool.free(h);
    }

    #[test]
    fn exhaustion_returns_none() {
        let pool = BufferPool::new(2, 4, 2).unwrap();
        let a = pool.alloc();
        let b = pool.alloc();
        assert_ne!(a, NONE_HANDLE);
        assert_ne!(b, NONE_HANDLE);
        assert_eq!(pool.alloc(), NONE_HANDLE);
        pool.free(a);
        pool.free(b);
    }

    #[test]
    fn free_on_none_is_noop() {
        let pool = BufferPool::new(2, 4, 2).unwrap();
        pool.free(NONE_HANDLE);
        assert_eq!(pool.stats().returned, 0);
    }

    #[test]
    fn pool_conservation_single_thread() {
        let capacity = 32usize;
        let pool = BufferPool::new(capacity, 8, 4).unwrap();
        let mut held = Vec::new();
        for _ in 0..capacity {
            held.push(pool.alloc());
        }
        assert_eq!(pool.alloc(), NONE_HANDLE);
        for h in held {
            pool.free(h);
        }
        pool.clear_thread_cache();
        assert_eq!(pool.available(), capacity);
    }

    #[test]
    fn pool_conservation_multi_thread() {
        let capacity = 256usize;
        let pool = BufferPool::new(capacity, 16, 8).unwrap();
        let threads = 4usize;
        let per_thread = 1000usize;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        let h = pool.alloc();
                        if h != NONE_HANDLE {
                            pool.free(h);
                        }
                    }
                    pool.clear_thread_cache();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.available(), capacity);
    }

    #[test]
    fn pool_uniqueness_concurrent_alloc() {
        let capacity = 64usize;
        let pool = BufferPool::new(capacity, 8, 4).unwrap();
        let seen = Arc::new(std::sync::Mutex::new(std::collections::HashSet::new()));

        let handles: Vec<_> = (0..capacity)
            .map(|_| {
                let pool = pool.clone();
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    let h = pool.alloc();
                    assert_ne!(h, NONE_HANDLE);
                    let mut set = seen.lock().unwrap();
                    assert!(set.insert(h), "duplicate handle {h} observed");
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), capacity);
    }

    #[test]
    fn clear_thread_cache_returns_handles() {
        let pool = BufferPool::new(8, 4, 2).unwrap();
        for _ in 0..3 {
            let h = pool.alloc();
            pool.free(h);
        }
        pool.clear_thread_cache();
        assert_eq!(pool.available(), 8);
    }

    #[test]
    fn pool_switch_drains_previous_cache() {
        let a = BufferPool::new(8, 4, 2).unwrap();
        let b = BufferPool::new(8, 4, 2).unwrap();

        let ha = a.alloc();
        a.free(ha); // now cached in `a`'s thread-local slot

        // Switching to `b` on the same thread must drain `a`'s cache first.
        let hb = b.alloc();
        assert_ne!(hb, NONE_HANDLE);
        b.free(hb);

        a.clear_thread_cache();
        assert_eq!(a.available(), 8);
    }
}
