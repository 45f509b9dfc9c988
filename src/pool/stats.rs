// src/pool/stats.rs
//! Diagnostic snapshot for [`crate::pool::BufferPool`].

/// Point-in-time snapshot of a [`crate::pool::BufferPool`]'s counters.
///
/// All fields come from `Relaxed` atomics (spec §5 "Counters are read
/// without synchronization; readers may observe stale values but never torn
/// values") — a snapshot may be briefly inconsistent with itself under
/// concurrent alloc/free, but each individual field is never torn.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Total buffer slots (`N`).
    pub capacity: usize,
    /// Handles currently idle on the global stack (excludes thread-local
    /// caches).
    pub available: usize,
    /// Total [`crate::pool::BufferPool::alloc`] calls.
    pub acquired: u64,
    /// Total [`crate::pool::BufferPool::free`] calls (excluding
    /// `NONE_HANDLE`).
    pub returned: u64,
    /// Of `acquired`, how many were satisfied from the calling thread's
    /// cache without touching the global stack.
    pub cache_hits: u64,
}

impl PoolStats {
    /// Buffers currently held outside the pool (acquired but not yet
    /// returned), by this snapshot's counters.
    pub fn in_use(&self) -> u64 {
        self.acquired.saturating_sub(self.returned)
    }

    /// Fraction of allocations satisfied by the thread-local cache, in
    /// `[0.0, 100.0]`.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.acquired == 0 {
            return 0.0;
        }
        (self.cache_hits as f64 / self.acquired as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_use_tracks_outstanding() {
        let s = PoolStats {
            capacity: 10,
            available: 4,
            acquired: 7,
            returned: 2,
            cache_hits: 3,
        };
        assert_eq!(s.in_use(), 5);
    }

    #[test]
    fn cache_hit_rate_zero_on_no_acquires() {
        let s = PoolStats {
            capacity: 10,
            available: 10,
            acquired: 0,
            returned: 0,
            cache_hits: 0,
        };
        assert_eq!(s.cache_hit_rate(), 0.0);
    }
}
