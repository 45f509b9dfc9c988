// tests/pool.rs
//! Multi-threaded invariants for [`upe::pool::BufferPool`].

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use upe::pool::{BufferPool, NONE_HANDLE};

#[test]
fn conservation_across_threads() {
    let capacity = 512usize;
    let pool = BufferPool::new(capacity, 32, 16).unwrap();

    let threads = 8;
    let per_thread = 200;
    let barrier = Arc::new(Barrier::new(threads));

    let mut joins = Vec::new();
    for _ in 0..threads {
        let pool = pool.clone();
        let barrier = Arc::clone(&barrier);
        joins.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..per_thread {
                let h = pool.alloc();
                if h != NONE_HANDLE {
                    pool.free(h);
                }
            }
            pool.clear_thread_cache();
        }));
    }
    for j in joins {
        j.join().unwrap();
    }

    // Quiescent: every handle accounted for on the global stack plus any
    // thread-local caches (all drained by `clear_thread_cache` above).
    assert_eq!(pool.available(), capacity);
    let stats = pool.stats();
    assert_eq!(stats.acquired, stats.returned);
}

#[test]
fn uniqueness_under_concurrent_alloc() {
    let capacity = 1024usize;
    let pool = BufferPool::new(capacity, 64, 32).unwrap();

    let threads = 8;
    let per_thread = capacity / threads;
    let barrier = Arc::new(Barrier::new(threads));

    let mut joins = Vec::new();
    for _ in 0..threads {
        let pool = pool.clone();
        let barrier = Arc::clone(&barrier);
        joins.push(thread::spawn(move || {
            barrier.wait();
            let mut held = Vec::with_capacity(per_thread);
            for _ in 0..per_thread {
                let h = pool.alloc();
                assert_ne!(h, NONE_HANDLE, "pool should not exhaust for capacity == total allocs");
                held.push(h);
            }
            held
        }));
    }

    let mut all_handles = Vec::new();
    for j in joins {
        all_handles.extend(j.join().unwrap());
    }

    let unique: HashSet<_> = all_handles.iter().copied().collect();
    assert_eq!(
        unique.len(),
        all_handles.len(),
        "no two concurrent allocations may return the same handle"
    );
}

#[test]
fn exhaustion_returns_none_handle() {
    let pool = BufferPool::new(4, 4, 2).unwrap();
    let mut held = Vec::new();
    for _ in 0..4 {
        let h = pool.alloc();
        assert_ne!(h, NONE_HANDLE);
        held.push(h);
    }
    assert_eq!(pool.alloc(), NONE_HANDLE);

    pool.free(held.pop().unwrap());
    assert_ne!(pool.alloc(), NONE_HANDLE);
}

#[test]
fn two_tier_scaling_keeps_wall_time_bounded() {
    let pool = BufferPool::new(8192, 256, 128).unwrap();
    let per_thread_ops = 20_000;

    let single = {
        let pool = pool.clone();
        let start = std::time::Instant::now();
        for _ in 0..per_thread_ops {
            let h = pool.alloc();
            pool.free(h);
        }
        pool.clear_thread_cache();
        start.elapsed()
    };

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let start = std::time::Instant::now();
    let mut joins = Vec::new();
    for _ in 0..threads {
        let pool = pool.clone();
        let barrier = Arc::clone(&barrier);
        joins.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..per_thread_ops {
                let h = pool.alloc();
                pool.free(h);
            }
            pool.clear_thread_cache();
        }));
    }
    for j in joins {
        j.join().unwrap();
    }
    let parallel = start.elapsed();

    // The thread-local cache should absorb almost all traffic, so wall time
    // under contention should stay within a generous constant factor of the
    // single-thread baseline rather than scaling with thread count.
    assert!(
        parallel < single * 20,
        "parallel={parallel:?} single={single:?}: thread-local cache does not appear to be absorbing load"
    );
}
