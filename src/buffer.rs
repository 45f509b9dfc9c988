// src/buffer.rs
//! Fixed-size owned frame storage (spec §3, component 1: `PacketBuffer`).

/// Fixed payload capacity of a [`PacketBuffer`], in bytes (spec §3: "a fixed
/// capacity of 2048 bytes").
pub const PACKET_BUFFER_CAPACITY: usize = 2048;

/// Fixed-size owned storage for one Ethernet frame.
///
/// Owned by exactly one holder at a time — the pool's free stack, a
/// thread-local cache, a ring slot, a worker, or a worker's TX batch — per
/// spec §3. `PacketBuffer` itself does not enforce that discipline; it is a
/// plain value type. Ownership transfer is enforced by the types that move
/// it around ([`crate::pool::BufferPool`], [`crate::ring::SpscRing`],
/// [`crate::worker::Worker`]).
#[derive(Clone)]
pub struct PacketBuffer {
    data: [u8; PACKET_BUFFER_CAPACITY],
    len: usize,
    /// Ingress timestamp, in nanoseconds since an arbitrary epoch chosen by
    /// the capture source. `None` until the ingress thread sets it.
    timestamp_ns: Option<u64>,
}

impl PacketBuffer {
    /// Creates a zeroed buffer with length 0 and no timestamp.
    #[inline]
    pub const fn new() -> Self {
        Self {
            data: [0u8; PACKET_BUFFER_CAPACITY],
            len: 0,
            timestamp_ns: None,
        }
    }

    /// Total fixed capacity (always [`PACKET_BUFFER_CAPACITY`]).
    #[inline]
    pub const fn capacity(&self) -> usize {
        PACKET_BUFFER_CAPACITY
    }

    /// Current valid payload length.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer currently holds no payload.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The ingress timestamp, if one was set.
    #[inline]
    pub const fn timestamp_ns(&self) -> Option<u64> {
        self.timestamp_ns
    }

    /// Sets the ingress timestamp.
    #[inline]
    pub fn set_timestamp_ns(&mut self, ts: u64) {
        self.timestamp_ns = Some(ts);
    }

    /// Read-only view of the valid payload (`data[..len]`).
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Mutable view of the valid payload (`data[..len]`).
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Full backing storage, including bytes beyond `len`. Used by the
    /// ingress thread to write a frame before calling [`Self::set_len`].
    #[inline]
    pub fn full_mut(&mut self) -> &mut [u8; PACKET_BUFFER_CAPACITY] {
        &mut self.data
    }

    /// Sets the valid payload length.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`PACKET_BUFFER_CAPACITY`] — a caller writing
    /// past the fixed frame capacity is a programming error, not a data-plane
    /// event.
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        assert!(
            len <= PACKET_BUFFER_CAPACITY,
            "payload length {len} exceeds buffer capacity {PACKET_BUFFER_CAPACITY}"
        );
        self.len = len;
    }

    /// Copies `frame` into the buffer and sets the length, truncating at
    /// capacity. Returns the number of bytes actually copied.
    pub fn copy_from(&mut self, frame: &[u8]) -> usize {
        let n = frame.len().min(PACKET_BUFFER_CAPACITY);
        self.data[..n].copy_from_slice(&frame[..n]);
        self.len = n;
        n
    }

    /// Resets length and timestamp to their initial state. Does not zero the
    /// backing storage — callers that need that guarantee should overwrite
    /// `data[..len]` themselves before reuse, since the pool performs no
    /// content scrubbing (this is a forwarding dataplane, not a security
    /// boundary, unlike the secure-erasure discipline this crate's ancestor
    /// buffer library used for secrets).
    #[inline]
    pub fn reset(&mut self) {
        self.len = 0;
        self.timestamp_ns = None;
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_empty() {
        let buf = PacketBuffer::new();
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), PACKET_BUFFER_CAPACITY);
        assert_eq!(buf.timestamp_ns(), None);
    }

    #[test]
    fn copy_from_sets_len_and_contents() {
        let mut buf = PacketBuffer::new();
        let frame = [1u8, 2, 3, 4, 5];
        let n = buf.copy_from(&frame);
        assert_eq!(n, 5);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.as_slice(), &frame);
    }

    #[test]
    fn copy_from_truncates_at_capacity() {
        let mut buf = PacketBuffer::new();
        let big = vec![0xAAu8; PACKET_BUFFER_CAPACITY + 100];
        let n = buf.copy_from(&big);
        assert_eq!(n, PACKET_BUFFER_CAPACITY);
        assert_eq!(buf.len(), PACKET_BUFFER_CAPACITY);
    }

    #[test]
    fn reset_clears_len_and_timestamp() {
        let mut buf = PacketBuffer::new();
        buf.copy_from(&[9, 9, 9]);
        buf.set_timestamp_ns(42);
        buf.reset();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.timestamp_ns(), None);
    }

    #[test]
    #[should_panic(expected = "exceeds buffer capacity")]
    fn set_len_panics_over_capacity() {
        let mut buf = PacketBuffer::new();
        buf.set_len(PACKET_BUFFER_CAPACITY + 1);
    }
}
