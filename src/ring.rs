// src/ring.rs
//! Lock-free single-producer/single-consumer ring buffer (spec §4.2,
//! component 3: `SpscRing`).
//!
//! Transports [`crate::pool::BufferHandle`] values between the (external)
//! ingress thread and a [`crate::worker::Worker`]. Per spec §9 ("Raw
//! pointers in rings"), the ring is parameterized by element type rather
//! than erasing to a raw pointer — `T` here is always `Copy` and
//! pointer-sized in practice (`BufferHandle = u32`).

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ConfigError;

/// Bounded, lock-free, single-producer/single-consumer FIFO of `Copy`
/// values.
///
/// Capacity must be a power of two (spec §4.2 "Constraints"); `head` and
/// `tail` are monotonically non-decreasing cursors over the full `usize`
/// range, with the slot index taken as `cursor & mask`. There is exactly one
/// producer identity and one consumer identity for the ring's lifetime —
/// `push`/`push_burst` must only ever be called from one logical thread, and
/// `pop`/`pop_burst` from one (possibly different) logical thread. The type
/// system does not enforce this; it is a documented usage contract (spec
/// §4.2 "There is no multi-producer or multi-consumer safety").
pub struct SpscRing<T: Copy> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

// Safety: the only cross-thread traffic is a single producer writing slots
// then releasing `head`, and a single consumer acquiring `head`/`tail` and
// reading slots it has acquired ownership of via the cursor handshake (spec
// §4.2 "Memory ordering"). No two threads ever touch the same slot
// concurrently under the one-producer/one-consumer contract.
unsafe impl<T: Copy + Send> Sync for SpscRing<T> {}
unsafe impl<T: Copy + Send> Send for SpscRing<T> {}

impl<T: Copy> SpscRing<T> {
    /// Builds an empty ring with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotPowerOfTwo`] if `capacity` is not a power of
    /// two, and [`ConfigError::ZeroCapacity`] if it is zero (spec §4.2,
    /// §8 "Ring non-POT rejection": "Init with capacity 100 fails; init with
    /// capacity 4 succeeds").
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !capacity.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo(capacity));
        }
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Ok(Self {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Slot capacity (`S`).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of items currently queued. May be briefly stale if called
    /// concurrently with push/pop (diagnostic only).
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    /// Whether the ring is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes a single item. Shorthand for `push_burst(&[item], 1) == 1`.
    #[inline]
    pub fn push(&self, item: T) -> bool {
        self.push_burst(std::slice::from_ref(&item)) == 1
    }

    /// Pops a single item. Shorthand for `pop_burst` with `n = 1`.
    #[inline]
    pub fn pop(&self) -> Option<T>
    where
        T: Default,
    {
        let mut out = [T::default()];
        if self.pop_burst(&mut out) == 1 {
            Some(out[0])
        } else {
            None
        }
    }

    /// Pushes as many items from `items` as there is room for, starting from
    /// index 0. Returns the number actually pushed, `k = min(items.len(), S
    /// - (head - tail))` (spec §4.2 "push_burst").
    ///
    /// Producer-only: relaxed load of our own `head`, acquire load of
    /// `tail`, plain slot writes, then a release store of the new `head`
    /// (spec §4.2 "Memory ordering (mandatory)").
    pub fn push_burst(&self, items: &[T]) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let free = self.capacity() - head.wrapping_sub(tail);
        let k = items.len().min(free);
        for (i, item) in items.iter().take(k).enumerate() {
            let idx = (head.wrapping_add(i)) & self.mask;
            // Safety: slot `idx` is not reachable by the consumer until
            // `head` is released below, and no other producer exists.
            unsafe {
                (*self.slots[idx].get()).write(*item);
            }
        }
        if k > 0 {
            self.head.store(head.wrapping_add(k), Ordering::Release);
        }
        k
    }

    /// Pops up to `out.len()` items into `out`, starting at index 0. Returns
    /// the number actually popped, `k = min(out.len(), head - tail)` (spec
    /// §4.2 "pop_burst").
    ///
    /// Consumer-only: relaxed load of our own `tail`, acquire load of
    /// `head`, plain slot reads, then a release store of the new `tail`.
    pub fn pop_burst(&self, out: &mut [T]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let avail = head.wrapping_sub(tail);
        let k = out.len().min(avail);
        for (i, dst) in out.iter_mut().take(k).enumerate() {
            let idx = (tail.wrapping_add(i)) & self.mask;
            // Safety: slot `idx` was released by the producer (its write
            // happens-before this read via the acquire load of `head`
            // above) and no other consumer exists.
            *dst = unsafe { (*self.slots[idx].get()).assume_init() };
        }
        if k > 0 {
            self.tail.store(tail.wrapping_add(k), Ordering::Release);
        }
        k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        assert!(matches!(
            SpscRing::<u32>::new(100),
            Err(ConfigError::NotPowerOfTwo(100))
        ));
    }

    #[test]
    fn accepts_power_of_two() {
        assert!(SpscRing::<u32>::new(4).is_ok());
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(matches!(
            SpscRing::<u32>::new(0),
            Err(ConfigError::ZeroCapacity)
        ));
    }

    #[test]
    fn push_pop_single_roundtrip() {
        let ring: SpscRing<u32> = SpscRing::new(4).unwrap();
        assert!(ring.push(42));
        assert_eq!(ring.pop(), Some(42));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn push_burst_never_exceeds_free_slots() {
        let ring: SpscRing<u32> = SpscRing::new(4).unwrap();
        let pushed = ring.push_burst(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(pushed, 4);
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn pop_burst_never_exceeds_available() {
        let ring: SpscRing<u32> = SpscRing::new(8).unwrap();
        ring.push_burst(&[1, 2, 3]);
        let mut out = [0u32; 8];
        let popped = ring.pop_burst(&mut out);
        assert_eq!(popped, 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
    }

    #[test]
    fn fifo_order_preserved() {
        let ring: SpscRing<u32> = SpscRing::new(16).unwrap();
        for i in 0..10u32 {
            assert!(ring.push(i));
        }
        for i in 0..10u32 {
            assert_eq!(ring.pop(), Some(i));
        }
    }

    #[test]
    fn fifo_under_concurrent_producer_consumer() {
        use std::sync::Arc;
        use std::thread;

        let ring: Arc<SpscRing<u32>> = Arc::new(SpscRing::new(64).unwrap());
        const N: u32 = 50_000;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut i = 0u32;
                while i < N {
                    if ring.push(i) {
                        i += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut expected = 0u32;
                while expected < N {
                    match ring.pop() {
                        Some(v) => {
                            assert_eq!(v, expected, "ring delivered out of order or duplicated");
                            expected += 1;
                        }
                        None => thread::yield_now(),
                    }
                }
                expected
            })
        };

        producer.join().unwrap();
        let received = consumer.join().unwrap();
        assert_eq!(received, N);
    }

    #[test]
    fn wraps_around_capacity_repeatedly() {
        let ring: SpscRing<u32> = SpscRing::new(4).unwrap();
        for round in 0..100u32 {
            assert!(ring.push(round));
            assert_eq!(ring.pop(), Some(round));
        }
    }
}
