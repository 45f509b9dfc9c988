// demos/stream_processing.rs
//! Streams a synthetic capture through the full pipeline in fixed-size
//! bursts, demonstrating the two-tier pool under sustained churn and a
//! transparent-bridge forward when the neighbor table has no entry yet.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use upe::prelude::*;

struct CountingSink {
    sent: std::cell::Cell<usize>,
}

impl TxSink for CountingSink {
    fn send_batch(&self, frames: &[&[u8]]) -> usize {
        self.sent.set(self.sent.get() + frames.len());
        frames.len()
    }
}

fn arp_reply(sender_ip: [u8; 4], sender_mac: [u8; 6]) -> Vec<u8> {
    let mut frame = vec![0u8; 14];
    frame[0..6].copy_from_slice(&[0xff; 6]);
    frame[6..12].copy_from_slice(&sender_mac);
    frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
    let mut arp = vec![0u8; 28];
    arp[0..2].copy_from_slice(&1u16.to_be_bytes()); // htype ethernet
    arp[2..4].copy_from_slice(&0x0800u16.to_be_bytes()); // ptype ipv4
    arp[4] = 6;
    arp[5] = 4;
    arp[6..8].copy_from_slice(&2u16.to_be_bytes()); // reply
    arp[8..14].copy_from_slice(&sender_mac);
    arp[14..18].copy_from_slice(&sender_ip);
    frame.extend_from_slice(&arp);
    frame
}

fn ipv4_tcp_frame(dst: [u8; 4], seq: u32) -> Vec<u8> {
    let mut frame = vec![0u8; 14];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[8] = 8; // TTL small enough to watch it drop over many hops
    ip[9] = 6;
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&dst);
    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&51000u16.to_be_bytes());
    tcp[2..4].copy_from_slice(&443u16.to_be_bytes());
    tcp[4..8].copy_from_slice(&seq.to_be_bytes());
    tcp[12] = 5 << 4;
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&tcp);
    frame
}

fn main() {
    println!("=== UPE Stream Processing ===\n");

    let pool = BufferPool::new(128, 16, 8).expect("pool init");
    let ring: Arc<SpscRing<BufferHandle>> = Arc::new(SpscRing::new(64).expect("ring init"));

    let mut rules = RuleTable::new();
    rules.add(Rule {
        priority: 100,
        ip_ver: 4,
        src_addr: IpAddrBytes::V4([0; 4]),
        src_mask: IpAddrBytes::V4([0; 4]),
        dst_addr: IpAddrBytes::V4([0; 4]),
        dst_mask: IpAddrBytes::V4([0; 4]),
        src_port: 0,
        dst_port: 0,
        protocol: 0,
        action: Action::Forward { out_ifindex: 1 },
        rule_id: 0,
    });

    let arp = Arc::new(ArpTable::new(64));
    let ndp = Arc::new(NdpTable::new(64));
    let sink = CountingSink {
        sent: std::cell::Cell::new(0),
    };
    let mut worker = WorkerState::new(
        0,
        None,
        Arc::clone(&ring),
        pool.clone(),
        Arc::new(rules),
        sink,
        [0x02, 0, 0, 0, 0, 0x09],
        Arc::clone(&arp),
        Arc::clone(&ndp),
        8,
        Duration::from_micros(1),
    )
    .expect("worker init");

    let dst = [10, 0, 0, 2];
    let num_chunks = 50usize;
    let frames_per_chunk = 8usize;

    for chunk in 0..num_chunks {
        // Every 10th chunk, snoop an ARP reply for the destination first so
        // later chunks in the stream hit `arp_cache` instead of bridging.
        if chunk % 10 == 0 {
            let handle = pool.alloc();
            if handle != NONE_HANDLE {
                unsafe {
                    pool.get_mut(handle)
                        .copy_from(&arp_reply(dst, [0xde, 0xad, 0xbe, 0xef, 0x00, 0x02]));
                }
                ring.push(handle);
            }
        }
        for i in 0..frames_per_chunk {
            let frame = ipv4_tcp_frame(dst, (chunk * frames_per_chunk + i) as u32);
            let handle = pool.alloc();
            if handle == NONE_HANDLE {
                continue; // pool exhausted mid-stream: drop and keep going
            }
            unsafe {
                pool.get_mut(handle).copy_from(&frame);
            }
            if !ring.push(handle) {
                pool.free(handle);
            }
        }
        // Drain this chunk before generating the next, keeping the ring
        // shallow the way a bounded-latency worker would.
        let stop = AtomicBool::new(true);
        worker.run(&stop);

        if chunk % 10 == 0 {
            let stats = pool.stats();
            println!(
                "chunk {chunk:>3}: pool in_use={} cache_hit_rate={:.1}%",
                stats.in_use(),
                stats.cache_hit_rate()
            );
        }
    }

    let snap = worker.counters().snapshot();
    println!(
        "\ntotal: in={} parsed={} matched={} forwarded={} dropped={}",
        snap.pkts_in, snap.parsed, snap.matched, snap.forwarded, snap.dropped
    );
}
