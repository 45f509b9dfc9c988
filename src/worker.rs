// src/worker.rs
//! The worker processing pipeline (spec §4.7, component 7: `Worker`).
//!
//! Each worker owns one [`SpscRing`] as its sole consumer, drains bursts,
//! snoops ARP/NDP control-plane traffic, parses, classifies against a shared
//! [`RuleTable`], rewrites L3 headers on forward, and flushes a batched
//! transmit. All per-worker state lives in [`WorkerState`] and is touched by
//! exactly one thread for the worker's lifetime (spec §3 `WorkerState`).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::checksum::recompute_ipv4_checksum;
use crate::error::ConfigError;
use crate::neighbor::{ArpTable, NdpTable};
use crate::parser::{self, ETHERTYPE_ARP, FlowKey, IpAddrBytes, PROTO_ICMPV6};
use crate::pool::{BufferHandle, BufferPool, NONE_HANDLE};
use crate::ring::SpscRing;
use crate::rule::{Action, RuleTable};

const ETH_HEADER_LEN: usize = 14;
const IPV6_HEADER_LEN: usize = 40;

/// Batched transmit sink (spec §6 "Worker-to-TX contract").
///
/// `send_batch` returns the number of frames accepted starting from index 0
/// — `frames[..sent]` succeeded, `frames[sent..]` did not (spec adopts the
/// "first N succeeded" reading of the ambiguous source semantics; see
/// `DESIGN.md`).
pub trait TxSink: Send + Sync {
    /// Attempts to transmit every frame in `frames`, returning how many
    /// (counted from the front) were accepted.
    fn send_batch(&self, frames: &[&[u8]]) -> usize;
}

/// Thread-private counters bumped once per packet (spec §3 `WorkerState`,
/// §4.7 "Counters").
///
/// Modeled as `AtomicU64`/`Relaxed` rather than bare `u64` fields: the spec
/// allows readers (the observability thread) to see stale but never torn
/// values, and `Relaxed` atomics are the safe-Rust way to express "aligned
/// 64-bit integer, racy reads tolerated, never a synchronization point" — see
/// `DESIGN.md` for why this departs from the source's literal "no atomics"
/// wording without changing its observable contract.
#[derive(Default)]
pub struct WorkerCounters {
    /// Bursts drained from the ring, summed over all packets in each burst.
    pub pkts_in: AtomicU64,
    /// Successfully classified into a [`FlowKey`].
    pub parsed: AtomicU64,
    /// Matched some rule in the [`RuleTable`].
    pub matched: AtomicU64,
    /// Handed to the TX sink and accepted.
    pub forwarded: AtomicU64,
    /// Consumed without reaching the TX sink (parse/match/TTL/send failure,
    /// or a `DROP` rule).
    pub dropped: AtomicU64,
}

impl WorkerCounters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time snapshot, safe to call from any thread.
    pub fn snapshot(&self) -> WorkerCountersSnapshot {
        WorkerCountersSnapshot {
            pkts_in: self.pkts_in.load(Ordering::Relaxed),
            parsed: self.parsed.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A copied-out, internally-consistent-per-field reading of
/// [`WorkerCounters`] (spec §8's observability thread use case).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerCountersSnapshot {
    /// See [`WorkerCounters::pkts_in`].
    pub pkts_in: u64,
    /// See [`WorkerCounters::parsed`].
    pub parsed: u64,
    /// See [`WorkerCounters::matched`].
    pub matched: u64,
    /// See [`WorkerCounters::forwarded`].
    pub forwarded: u64,
    /// See [`WorkerCounters::dropped`].
    pub dropped: u64,
}

/// Per-rule packet/byte counters, indexed by `rule_id` (spec §4.7d).
#[derive(Default)]
pub struct RuleStat {
    /// Packets that matched this rule.
    pub packets: AtomicU64,
    /// Sum of matched packets' lengths.
    pub bytes: AtomicU64,
}

/// One-entry per-family neighbor resolution cache (spec §4.6 "Worker
/// last-hit cache").
///
/// Thread-local to the owning worker by construction (it lives inside
/// [`WorkerState`], never shared) — safe without synchronization.
#[derive(Default, Clone, Copy)]
struct LastHit<K> {
    entry: Option<(K, [u8; 6])>,
}

impl<K: Copy + Eq> LastHit<K> {
    fn get(&self, key: K) -> Option<[u8; 6]> {
        self.entry.and_then(|(k, mac)| if k == key { Some(mac) } else { None })
    }

    fn set(&mut self, key: K, mac: [u8; 6]) {
        self.entry = Some((key, mac));
    }
}

/// All state owned by one worker for its lifetime (spec §3 `WorkerState`).
pub struct WorkerState<S: TxSink> {
    worker_id: u32,
    core_id: Option<usize>,
    rx_ring: Arc<SpscRing<BufferHandle>>,
    pool: BufferPool,
    rule_table: Arc<RuleTable>,
    tx_sink: S,
    tx_mac: [u8; 6],
    arp_table: Arc<ArpTable>,
    ndp_table: Arc<NdpTable>,
    rule_stats: Vec<RuleStat>,
    counters: WorkerCounters,
    arp_cache: LastHit<u32>,
    ndp_cache: LastHit<[u8; 16]>,
    tx_batch: Vec<BufferHandle>,
    burst_size: usize,
    idle_sleep: Duration,
}

impl<S: TxSink> WorkerState<S> {
    /// Builds a worker bound to its own ring and the shared pool/rule
    /// table/neighbor tables.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: u32,
        core_id: Option<usize>,
        rx_ring: Arc<SpscRing<BufferHandle>>,
        pool: BufferPool,
        rule_table: Arc<RuleTable>,
        tx_sink: S,
        tx_mac: [u8; 6],
        arp_table: Arc<ArpTable>,
        ndp_table: Arc<NdpTable>,
        burst_size: usize,
        idle_sleep: Duration,
    ) -> Result<Self, ConfigError> {
        if burst_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker burst size must be non-zero".into(),
            ));
        }
        let rule_stats = (0..rule_table.len()).map(|_| RuleStat::default()).collect();
        Ok(Self {
            worker_id,
            core_id,
            rx_ring,
            pool,
            rule_table,
            tx_sink,
            tx_mac,
            arp_table,
            ndp_table,
            rule_stats,
            counters: WorkerCounters::default(),
            arp_cache: LastHit::default(),
            ndp_cache: LastHit::default(),
            tx_batch: Vec::with_capacity(burst_size),
            burst_size,
            idle_sleep,
        })
    }

    /// This worker's ordinal.
    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// Snapshot of this worker's packet counters, safe to read from another
    /// thread concurrently with the worker's loop.
    pub fn counters(&self) -> &WorkerCounters {
        &self.counters
    }

    /// Snapshot of this worker's per-rule hit counters, indexed by
    /// `rule_id`.
    pub fn rule_stats(&self) -> &[RuleStat] {
        &self.rule_stats
    }

    /// Pins the calling thread to `core_id`, if configured. Failure is
    /// logged and non-fatal (spec §5 "CPU pinning").
    pub fn pin_if_configured(&self) {
        let Some(core_id) = self.core_id else {
            return;
        };
        let ids = core_affinity::get_core_ids().unwrap_or_default();
        match ids.into_iter().find(|c| c.id == core_id) {
            Some(core) => {
                if !core_affinity::set_for_current(core) {
                    log::warn!("worker {}: failed to pin to core {core_id}", self.worker_id);
                }
            }
            None => log::warn!(
                "worker {}: core {core_id} not present on this host",
                self.worker_id
            ),
        }
    }

    /// Runs the worker's main loop until `stop` is observed set with the
    /// ring empty (spec §4.7).
    ///
    /// Suspension only ever happens here, in the idle-sleep branch, per spec
    /// §5 "Suspension points".
    pub fn run(&mut self, stop: &AtomicBool) {
        self.pin_if_configured();
        let mut batch = vec![NONE_HANDLE; self.burst_size];
        loop {
            let n = self.rx_ring.pop_burst(&mut batch);
            if n == 0 {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                std::thread::sleep(self.idle_sleep);
                continue;
            }
            WorkerCounters::bump(&self.counters.pkts_in, n as u64);
            for &handle in &batch[..n] {
                self.process_one(handle);
            }
            self.flush_tx_batch();
        }
    }

    /// Processes a single buffer: control-plane snoop, parse, match,
    /// forward-or-drop, and batch accumulation (spec §4.7 step 2).
    fn process_one(&mut self, handle: BufferHandle) {
        // Safety: `handle` was just popped from this worker's sole ring and
        // is not referenced anywhere else (spec §3 single-owner discipline).
        let frame = unsafe { self.pool.get(handle) }.as_slice();
        let Ok(ethertype) = parser::ether_type(frame) else {
            WorkerCounters::bump(&self.counters.dropped, 1);
            self.pool.free(handle);
            return;
        };

        if ethertype == ETHERTYPE_ARP {
            self.snoop_arp(handle);
            self.pool.free(handle);
            return;
        }
        if ethertype == 0x86DD && is_ndp(frame) {
            self.snoop_ndp(handle);
            self.pool.free(handle);
            return;
        }

        let key = match parser::parse(frame) {
            Ok(k) => k,
            Err(_) => {
                WorkerCounters::bump(&self.counters.dropped, 1);
                self.pool.free(handle);
                return;
            }
        };
        WorkerCounters::bump(&self.counters.parsed, 1);

        let Some(rule) = self.rule_table.lookup(&key) else {
            WorkerCounters::bump(&self.counters.dropped, 1);
            self.pool.free(handle);
            return;
        };
        WorkerCounters::bump(&self.counters.matched, 1);
        let len = frame.len() as u64;
        let rule_id = rule.rule_id as usize;
        if let Some(stat) = self.rule_stats.get(rule_id) {
            WorkerCounters::bump(&stat.packets, 1);
            WorkerCounters::bump(&stat.bytes, len);
        }

        let out_ifindex = match rule.action {
            Action::Drop => {
                WorkerCounters::bump(&self.counters.dropped, 1);
                self.pool.free(handle);
                return;
            }
            Action::Forward { out_ifindex } => out_ifindex,
        };
        let _ = out_ifindex; // core doesn't branch transmit on the ifindex; see SPEC_FULL / DESIGN.

        let forwardable = match key.ip_ver {
            4 => self.forward_ipv4(handle, &key),
            6 => self.forward_ipv6(handle, &key),
            _ => false,
        };
        if !forwardable {
            WorkerCounters::bump(&self.counters.dropped, 1);
            self.pool.free(handle);
            return;
        }

        self.tx_batch.push(handle);
    }

    /// IPv4 forward step (spec §4.7f): TTL check/decrement, checksum
    /// recompute, neighbor rewrite. Returns `false` if the packet must be
    /// dropped (TTL expired).
    fn forward_ipv4(&mut self, handle: BufferHandle, key: &FlowKey) -> bool {
        // Safety: sole owner of `handle` for the duration of this call.
        let buf = unsafe { self.pool.get_mut(handle) };
        let frame = buf.as_mut_slice();
        if frame.len() < ETH_HEADER_LEN + 20 {
            return false;
        }
        let ip = &mut frame[ETH_HEADER_LEN..];
        let ihl = (ip[0] & 0x0F) as usize * 4;
        if ip[8] <= 1 {
            return false;
        }
        ip[8] -= 1;
        if ihl <= ip.len() {
            recompute_ipv4_checksum(&mut ip[..ihl]);
        }

        let IpAddrBytes::V4(dst) = key.dst_addr else {
            return false;
        };
        let dst_ip = u32::from_be_bytes(dst);
        let mac = self.arp_cache.get(dst_ip).or_else(|| {
            let found = self.arp_table.lookup(dst_ip);
            if let Some(mac) = found {
                self.arp_cache.set(dst_ip, mac);
            }
            found
        });
        if let Some(mac) = mac {
            rewrite_l2(frame, mac, self.tx_mac);
        }
        // Neighbor miss: forward unchanged (transparent bridging, spec
        // §4.7 "Matching with no MAC available").
        true
    }

    /// IPv6 forward step (spec §4.7g): hop-limit check/decrement, neighbor
    /// rewrite via NDP. Returns `false` if the packet must be dropped
    /// (hop-limit expired).
    fn forward_ipv6(&mut self, handle: BufferHandle, key: &FlowKey) -> bool {
        // Safety: sole owner of `handle` for the duration of this call.
        let buf = unsafe { self.pool.get_mut(handle) };
        let frame = buf.as_mut_slice();
        if frame.len() < ETH_HEADER_LEN + IPV6_HEADER_LEN {
            return false;
        }
        let ip = &mut frame[ETH_HEADER_LEN..];
        if ip[7] <= 1 {
            return false;
        }
        ip[7] -= 1;

        let IpAddrBytes::V6(dst) = key.dst_addr else {
            return false;
        };
        let mac = self.ndp_cache.get(dst).or_else(|| {
            let found = self.ndp_table.lookup(dst);
            if let Some(mac) = found {
                self.ndp_cache.set(dst, mac);
            }
            found
        });
        if let Some(mac) = mac {
            rewrite_l2(frame, mac, self.tx_mac);
        }
        true
    }

    /// Passive ARP learning (spec §4.7a). Only Ethernet/IPv4 ARP
    /// (`htype=1, ptype=0x0800, hlen=6, plen=4`) is recognized.
    fn snoop_arp(&mut self, handle: BufferHandle) {
        // Safety: sole owner of `handle` for the duration of this call.
        let frame = unsafe { self.pool.get(handle) }.as_slice();
        let arp = &frame[ETH_HEADER_LEN..];
        if arp.len() < 28 {
            return;
        }
        let htype = u16::from_be_bytes([arp[0], arp[1]]);
        let ptype = u16::from_be_bytes([arp[2], arp[3]]);
        let hlen = arp[4];
        let plen = arp[5];
        if htype != 1 || ptype != 0x0800 || hlen != 6 || plen != 4 {
            return;
        }
        let mut sha = [0u8; 6];
        sha.copy_from_slice(&arp[8..14]);
        let spa = u32::from_be_bytes([arp[14], arp[15], arp[16], arp[17]]);
        self.arp_table.update(spa, sha);
    }

    /// Passive NDP learning (spec §4.7a). NS (135) learns
    /// `(ipv6.src, Source-LL-Addr)`; NA (136) learns
    /// `(ndp.target, Target-LL-Addr)`. Options are walked in 8-octet units.
    fn snoop_ndp(&mut self, handle: BufferHandle) {
        // Safety: sole owner of `handle` for the duration of this call.
        let frame = unsafe { self.pool.get(handle) }.as_slice();
        let ip = &frame[ETH_HEADER_LEN..];
        if ip.len() < IPV6_HEADER_LEN + 24 {
            return;
        }
        let mut ip_src = [0u8; 16];
        ip_src.copy_from_slice(&ip[8..24]);
        let icmp = &ip[IPV6_HEADER_LEN..];
        let icmp_type = icmp[0];
        let mut target = [0u8; 16];
        target.copy_from_slice(&icmp[8..24]);
        let options = &icmp[24..];

        let wanted_opt_type = match icmp_type {
            135 => 1u8, // Source Link-Layer Address
            136 => 2u8, // Target Link-Layer Address
            _ => return,
        };
        let Some(mac) = find_ll_option(options, wanted_opt_type) else {
            return;
        };
        match icmp_type {
            135 => self.ndp_table.update(ip_src, mac),
            136 => self.ndp_table.update(target, mac),
            _ => unreachable!(),
        }
    }

    /// Flushes the accumulated TX batch via the sink, frees every buffer in
    /// it regardless of send outcome, and updates `forwarded`/`dropped`
    /// (spec §4.7 step 3).
    fn flush_tx_batch(&mut self) {
        if self.tx_batch.is_empty() {
            return;
        }
        let frames: Vec<&[u8]> = self
            .tx_batch
            .iter()
            .map(|&h| unsafe { self.pool.get(h) }.as_slice())
            .collect();
        let sent = self.tx_sink.send_batch(&frames).min(frames.len());

        WorkerCounters::bump(&self.counters.forwarded, sent as u64);
        WorkerCounters::bump(
            &self.counters.dropped,
            (self.tx_batch.len() - sent) as u64,
        );

        for &h in &self.tx_batch {
            self.pool.free(h);
        }
        self.tx_batch.clear();
    }
}

fn is_ndp(frame: &[u8]) -> bool {
    let ip = &frame[ETH_HEADER_LEN..];
    if ip.len() < IPV6_HEADER_LEN + 1 {
        return false;
    }
    if ip[6] != PROTO_ICMPV6 {
        return false;
    }
    let icmp = &ip[IPV6_HEADER_LEN..];
    matches!(icmp.first(), Some(135) | Some(136))
}

fn find_ll_option(options: &[u8], wanted_type: u8) -> Option<[u8; 6]> {
    let mut i = 0;
    while i + 2 <= options.len() {
        let opt_type = options[i];
        let opt_len_units = options[i + 1] as usize;
        if opt_len_units == 0 {
            return None; // malformed; avoid infinite loop
        }
        let opt_len_bytes = opt_len_units * 8;
        if i + opt_len_bytes > options.len() {
            return None;
        }
        if opt_type == wanted_type && opt_len_bytes >= 8 {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&options[i + 2..i + 8]);
            return Some(mac);
        }
        i += opt_len_bytes;
    }
    None
}

/// Overwrites `eth.dst` with `dst_mac` and `eth.src` with `tx_mac` (spec
/// §4.7f/g).
fn rewrite_l2(frame: &mut [u8], dst_mac: [u8; 6], tx_mac: [u8; 6]) {
    frame[0..6].copy_from_slice(&dst_mac);
    frame[6..12].copy_from_slice(&tx_mac);
}
