// src/pool/global_stack.rs
//! The process-wide lock-free free-handle stack (spec §4.1 "Global stack
//! protocol").
//!
//! Backed by a pre-allocated array, not a linked list of nodes — there is no
//! node-reuse ("ABA-like") hazard, so the only synchronization needed is a
//! single CAS on the top index (spec §9).

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::BufferHandle;

pub(super) struct GlobalStack {
    slots: Box<[AtomicU32]>,
    top: CachePadded<AtomicUsize>,
    capacity: usize,
}

impl GlobalStack {
    /// Builds a stack pre-loaded with handles `0..capacity` (every slot
    /// starts "free").
    pub(super) fn new_full(capacity: u32) -> Self {
        let slots: Box<[AtomicU32]> = (0..capacity).map(AtomicU32::new).collect();
        Self {
            slots,
            top: CachePadded::new(AtomicUsize::new(capacity as usize)),
            capacity: capacity as usize,
        }
    }

    /// Approximate number of idle handles. May be briefly stale under
    /// concurrent pop/push (same caveat as the teacher library's
    /// `LockFreeQueue::len`).
    pub(super) fn len(&self) -> usize {
        self.top.load(Ordering::Relaxed)
    }

    /// Pops up to `n` handles from the top.
    ///
    /// Reserves the range `[new_top, old_top)` with a single CAS on `top`
    /// (acquire-release on success, acquire on retry), then reads those
    /// slots — safe to do non-atomically in spirit, since no other popper
    /// can have reserved the same range, but we still use a `Relaxed` atomic
    /// load per spec's allowance that a successful popper "may read those
    /// slots non-atomically".
    pub(super) fn pop_burst(&self, n: usize) -> Vec<BufferHandle> {
        loop {
            let old_top = self.top.load(Ordering::Acquire);
            let k = n.min(old_top);
            if k == 0 {
                return Vec::new();
            }
            let new_top = old_top - k;
            match self.top.compare_exchange(
                old_top,
                new_top,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let mut out = Vec::with_capacity(k);
                    for slot in &self.slots[new_top..old_top] {
                        out.push(slot.load(Ordering::Relaxed));
                    }
                    return out;
                }
                Err(_) => continue,
            }
        }
    }

    /// Pushes a single handle.
    ///
    /// Writes the handle into slot `old_top` *before* advancing `top` via
    /// CAS; on CAS failure the write is simply redone at the new `old_top`
    /// on retry. This order is mandatory — advancing `top` first would
    /// expose an uninitialized slot to a concurrent popper (spec §4.1).
    pub(super) fn push_one(&self, handle: BufferHandle) {
        loop {
            let old_top = self.top.load(Ordering::Acquire);
            debug_assert!(
                old_top < self.capacity,
                "global stack push overflow: capacity {} exceeded",
                self.capacity
            );
            if old_top >= self.capacity {
                // Caller handed back more handles than the pool ever issued.
                // Not reachable under correct use of `BufferPool`; drop the
                // handle rather than corrupt the stack.
                return;
            }
            self.slots[old_top].store(handle, Ordering::Relaxed);
            if self
                .top
                .compare_exchange(old_top, old_top + 1, Ordering::Release, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }
}
