// demos/basic_usage.rs
//! Basic usage: wire a pool, a rule table, a ring, and one worker together
//! and push a handful of synthetic frames through by hand.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use upe::prelude::*;

struct PrintingSink;

impl TxSink for PrintingSink {
    fn send_batch(&self, frames: &[&[u8]]) -> usize {
        for frame in frames {
            println!("  tx: {} bytes", frame.len());
        }
        frames.len()
    }
}

fn ipv4_tcp_frame(dst: [u8; 4], dst_port: u16, ttl: u8) -> Vec<u8> {
    let mut frame = vec![0u8; 14];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[8] = ttl;
    ip[9] = 6; // TCP
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&dst);
    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&51000u16.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    tcp[12] = 5 << 4;
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&tcp);
    frame
}

fn main() {
    println!("=== UPE Basic Usage ===\n");

    // 1. A small buffer pool.
    let pool = BufferPool::new(32, 8, 4).expect("pool init");
    println!("pool capacity={} backing={:?}", pool.capacity(), pool.backing());

    // 2. One ring, one worker.
    let ring: Arc<SpscRing<BufferHandle>> = Arc::new(SpscRing::new(16).expect("ring init"));

    // 3. A rule table: drop SSH, forward everything else.
    let mut rules = RuleTable::new();
    rules.add(Rule {
        priority: 10,
        ip_ver: 4,
        src_addr: IpAddrBytes::V4([0; 4]),
        src_mask: IpAddrBytes::V4([0; 4]),
        dst_addr: IpAddrBytes::V4([0; 4]),
        dst_mask: IpAddrBytes::V4([0; 4]),
        src_port: 0,
        dst_port: 22,
        protocol: 6,
        action: Action::Drop,
        rule_id: 0,
    });
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
    println!("loaded {} rules\n", rules.len());

    let arp = Arc::new(ArpTable::new(64));
    let ndp = Arc::new(NdpTable::new(64));
    let mut worker = WorkerState::new(
        0,
        None,
        Arc::clone(&ring),
        pool.clone(),
        Arc::new(rules),
        PrintingSink,
        [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
        arp,
        ndp,
        8,
        Duration::from_micros(1),
    )
    .expect("worker init");

    // 4. "Ingress": push a dropped and a forwarded frame.
    for (dst_port, label) in [(22u16, "ssh (dropped)"), (443u16, "https (forwarded)")] {
        println!("ingress: {label}");
        let frame = ipv4_tcp_frame([10, 0, 0, 2], dst_port, 64);
        let handle = pool.alloc();
        assert_ne!(handle, NONE_HANDLE, "pool exhausted");
        unsafe {
            pool.get_mut(handle).copy_from(&frame);
        }
        let pushed = ring.push(handle);
        assert!(pushed, "ring full");
    }

    // 5. Drain once; the ring is already empty on the next poll, so a
    // pre-set stop flag lets `run` return immediately after.
    let stop = AtomicBool::new(true);
    worker.run(&stop);

    let snap = worker.counters().snapshot();
    println!(
        "\ncounters: in={} parsed={} matched={} forwarded={} dropped={}",
        snap.pkts_in, snap.parsed, snap.matched, snap.forwarded, snap.dropped
    );
    println!("pool: {} of {} slots idle", pool.available(), pool.capacity());
}
