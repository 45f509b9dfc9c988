// demos/network_simulation.rs
//! Simulates a multi-worker dataplane: several rings, several flows, RSS via
//! `flow_hash`, and a background thread per worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use upe::prelude::*;

struct CountingSink;

impl TxSink for CountingSink {
    fn send_batch(&self, frames: &[&[u8]]) -> usize {
        frames.len()
    }
}

fn ipv4_udp_frame(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut frame = vec![0u8; 14];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[8] = 64;
    ip[9] = 17; // UDP
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);
    let mut udp = vec![0u8; 8];
    udp[0..2].copy_from_slice(&src_port.to_be_bytes());
    udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&udp);
    frame
}

fn main() {
    println!("=== UPE Network Simulation ===\n");

    let ring_count = 4usize;
    let pool = BufferPool::new(4096, 64, 32).expect("pool init");
    let rings: Vec<Arc<SpscRing<BufferHandle>>> = (0..ring_count)
        .map(|_| Arc::new(SpscRing::new(1024).expect("ring init")))
        .collect();

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
    let rules = Arc::new(rules);
    let arp = Arc::new(ArpTable::new(1024));
    let ndp = Arc::new(NdpTable::new(1024));
    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    let mut worker_states = Vec::new();
    for (worker_id, ring) in rings.iter().enumerate() {
        worker_states.push(
            WorkerState::new(
                worker_id as u32,
                None,
                Arc::clone(ring),
                pool.clone(),
                Arc::clone(&rules),
                CountingSink,
                [0x02, 0, 0, 0, 0, worker_id as u8],
                Arc::clone(&arp),
                Arc::clone(&ndp),
                32,
                Duration::from_micros(1),
            )
            .expect("worker init"),
        );
    }
    for mut worker in worker_states {
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            worker.run(&stop);
            worker.counters().snapshot()
        }));
    }

    // "Ingress": generate a set of flows and round-robin their reverse
    // direction too, picking a ring via `flow_hash`, to demonstrate RSS
    // symmetry (spec §8 scenario 5).
    let num_packets = 20_000usize;
    let start = Instant::now();
    for i in 0..num_packets {
        let forward = i % 2 == 0;
        let (src, dst, sport, dport) = if forward {
            ([10, 0, 0, 1], [10, 0, 0, 2], 40000 + (i as u16 % 100), 443)
        } else {
            ([10, 0, 0, 2], [10, 0, 0, 1], 443, 40000 + (i as u16 % 100))
        };
        let frame = ipv4_udp_frame(src, dst, sport, dport);
        let Ok(key) = upe::parser::parse(&frame) else {
            continue;
        };
        let ring_idx = (flow_hash(&key) as usize) & (ring_count - 1);

        let handle = pool.alloc();
        if handle == NONE_HANDLE {
            continue; // pool exhausted: drop at ingress (spec §6)
        }
        unsafe {
            pool.get_mut(handle).copy_from(&frame);
        }
        if !rings[ring_idx].push(handle) {
            pool.free(handle); // ring full: return the buffer (spec §6)
        }
    }
    let ingress_elapsed = start.elapsed();

    // Give workers time to drain, then stop.
    thread::sleep(Duration::from_millis(50));
    stop.store(true, Ordering::Relaxed);

    let mut total_forwarded = 0u64;
    let mut total_dropped = 0u64;
    for h in handles {
        let snap = h.join().expect("worker thread panicked");
        total_forwarded += snap.forwarded;
        total_dropped += snap.dropped;
    }

    println!("generated {num_packets} packets in {ingress_elapsed:?}");
    println!("forwarded={total_forwarded} dropped={total_dropped}");
    println!("pool: {} of {} slots idle", pool.available(), pool.capacity());
}
