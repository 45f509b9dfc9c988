// src/neighbor.rs
//! Open-addressed, reader/writer-locked IP→MAC neighbor tables (spec §4.6,
//! component 6: `NeighborTable`, ARP and NDP variants).
//!
//! Both variants share the same probing logic; they differ only in the key
//! type (`u32` for ARP/IPv4, `[u8; 16]` for NDP/IPv6).

use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// A neighbor table key: an IPv4 address (`u32`, host order) or an IPv6
/// address (`[u8; 16]`).
pub trait NeighborKey: Copy + Eq {
    /// Deterministic hash used as the initial probe index (spec §4.6).
    /// Distribution quality is not a correctness property, only
    /// determinism.
    fn table_hash(&self) -> u64;
}

impl NeighborKey for u32 {
    fn table_hash(&self) -> u64 {
        // Fibonacci hashing: cheap, good-enough spread for a fixed-size
        // open-addressed table.
        (*self as u64).wrapping_mul(0x9E3779B97F4A7C15)
    }
}

impl NeighborKey for [u8; 16] {
    fn table_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf29ce484222325; // FNV-1a offset basis
        for &b in self.iter() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        h
    }
}

/// A single occupied slot (spec §3 `NeighborEntry`).
#[derive(Debug, Clone, Copy)]
pub struct NeighborEntry<K> {
    /// The neighbor's protocol address.
    pub ip: K,
    /// The neighbor's link-layer address.
    pub mac: [u8; 6],
    /// Monotonic timestamp (nanoseconds since `UNIX_EPOCH`) of the most
    /// recent write. Informational only — entries never expire (spec §3
    /// "Entries never expire in the core").
    pub updated_at: u64,
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Fixed-capacity, open-addressed (linear probing) neighbor table, guarded
/// by a reader/writer lock. Never deletes entries; when full, further
/// inserts silently fail (spec §4.6, "learning is best-effort").
pub struct NeighborTable<K: NeighborKey> {
    slots: RwLock<Vec<Option<NeighborEntry<K>>>>,
    capacity: usize,
}

impl<K: NeighborKey> NeighborTable<K> {
    /// Builds an empty table with a fixed `capacity` slot count.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(vec![None; capacity]),
            capacity,
        }
    }

    /// Fixed slot count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Learns or refreshes `(ip, mac)`.
    ///
    /// Probes linearly from `hash(ip) mod capacity`. An empty slot is
    /// claimed; a slot already holding `ip` has its `mac`/`updated_at`
    /// overwritten; any other occupied slot is skipped. After a full
    /// revolution with no placement, the update is silently dropped (spec
    /// §4.6 "update").
    pub fn update(&self, ip: K, mac: [u8; 6]) {
        let mut slots = self.slots.write().expect("neighbor table lock poisoned");
        let start = (ip.table_hash() as usize) % self.capacity;
        for i in 0..self.capacity {
            let idx = (start + i) % self.capacity;
            match &mut slots[idx] {
                None => {
                    slots[idx] = Some(NeighborEntry {
                        ip,
                        mac,
                        updated_at: now_nanos(),
                    });
                    return;
                }
                Some(entry) if entry.ip == ip => {
                    entry.mac = mac;
                    entry.updated_at = now_nanos();
                    return;
                }
                Some(_) => continue,
            }
        }
        // Table is full and `ip` is not present: best-effort, drop silently.
        log::debug!("neighbor table full; dropping learn for a new address");
    }

    /// Resolves `ip`'s MAC.
    ///
    /// Probes identically to [`Self::update`] until it finds `ip` (hit), an
    /// empty slot (miss — justified by the no-deletion invariant, spec
    /// §4.6), or exhausts the table (miss).
    pub fn lookup(&self, ip: K) -> Option<[u8; 6]> {
        let slots = self.slots.read().expect("neighbor table lock poisoned");
        let start = (ip.table_hash() as usize) % self.capacity;
        for i in 0..self.capacity {
            let idx = (start + i) % self.capacity;
            match &slots[idx] {
                None => return None,
                Some(entry) if entry.ip == ip => return Some(entry.mac),
                Some(_) => continue,
            }
        }
        None
    }

    /// Number of occupied slots. Diagnostic only.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .expect("neighbor table lock poisoned")
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    /// Whether the table currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// ARP (IPv4) neighbor table. Key is the IPv4 address as a host-order `u32`.
pub type ArpTable = NeighborTable<u32>;

/// NDP (IPv6) neighbor table. Key is the raw 16-byte IPv6 address.
pub type NdpTable = NeighborTable<[u8; 16]>;
