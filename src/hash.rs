// src/hash.rs
//! Symmetric 32-bit flow hash (spec §4.4, component 8: `FlowHash`).
//!
//! Used by the (external) ingress thread to pick a worker ring:
//! `flow_hash(key) & (ring_count - 1)`. The only correctness property is
//! `hash(A→B) == hash(B→A)` plus determinism — distribution quality is
//! explicitly out of scope (spec §4.4, §8).

use crate::parser::{FlowKey, IpAddrBytes};

fn u32_from_be(b: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(b);
    u32::from_be_bytes(arr)
}

/// Folds a 16-byte IPv6 address into 32 bits by XORing its four 32-bit
/// words (spec §4.4 "For IPv6").
fn fold_v6(addr: &[u8; 16]) -> u32 {
    u32_from_be(&addr[0..4]) ^ u32_from_be(&addr[4..8]) ^ u32_from_be(&addr[8..12]) ^ u32_from_be(&addr[12..16])
}

fn addr_to_u32(addr: &IpAddrBytes) -> u32 {
    match addr {
        IpAddrBytes::V4(b) => u32_from_be(b),
        IpAddrBytes::V6(b) => fold_v6(b),
    }
}

/// Computes a symmetric, deterministic 32-bit hash of a [`FlowKey`].
///
/// IPv4: XOR of `src_addr`, `dst_addr`, `src_port`, `dst_port`, `protocol`.
/// IPv6: each address first folded to 32 bits (XOR of its four 32-bit
/// words), then the same XOR combination. Swapping source and destination
/// (address and port together) leaves the result unchanged, satisfying spec
/// §8 "FlowHash symmetry".
pub fn flow_hash(key: &FlowKey) -> u32 {
    let src = addr_to_u32(&key.src_addr);
    let dst = addr_to_u32(&key.dst_addr);
    src ^ dst ^ (key.src_port as u32) ^ (key.dst_port as u32) ^ (key.protocol as u32)
}
