// benches/buffer_bench.rs
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use upe::prelude::*;

fn bench_pool_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_alloc_free");

    for capacity in [256usize, 1024, 4096].iter() {
        group.bench_with_input(
            BenchmarkId::new("alloc_free_cycle", capacity),
            capacity,
            |b, &capacity| {
                let pool = BufferPool::new(capacity, 64, 32).unwrap();
                b.iter(|| {
                    let handle = pool.alloc();
                    black_box(handle);
                    pool.free(handle);
                });
            },
        );
    }

    group.finish();
}

fn bench_pool_cache_hit_vs_global(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_cache_behavior");

    // A cache large enough that every alloc/free pair stays in the
    // thread-local LIFO cache.
    group.bench_function("warm_thread_cache", |b| {
        let pool = BufferPool::new(4096, 512, 256).unwrap();
        // Prime the cache.
        let h = pool.alloc();
        pool.free(h);

        b.iter(|| {
            let handle = pool.alloc();
            black_box(handle);
            pool.free(handle);
        });
    });

    // A single-slot cache forces every other operation through the global
    // CAS stack.
    group.bench_function("thrashing_thread_cache", |b| {
        let pool = BufferPool::new(4096, 1, 1).unwrap();

        b.iter(|| {
            let handle = pool.alloc();
            black_box(handle);
            pool.free(handle);
        });
    });

    group.finish();
}

fn bench_buffer_copy_from(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_buffer_copy_from");

    for len in [64usize, 512, 1500, 2048].iter() {
        let frame = vec![0xABu8; *len];
        group.bench_with_input(BenchmarkId::new("copy_from", len), &frame, |b, frame| {
            let pool = BufferPool::new(64, 16, 8).unwrap();
            let handle = pool.alloc();
            b.iter(|| unsafe {
                pool.get_mut(handle).copy_from(black_box(frame));
            });
            pool.free(handle);
        });
    }

    group.finish();
}

fn bench_parse_and_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_and_hash");

    let mut frame = vec![0u8; 14 + 20 + 20];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    frame[14] = 0x45;
    frame[14 + 8] = 64;
    frame[14 + 9] = 6;
    frame[14 + 12..14 + 16].copy_from_slice(&[10, 0, 0, 1]);
    frame[14 + 16..14 + 20].copy_from_slice(&[10, 0, 0, 2]);
    frame[14 + 20] = 5 << 4;

    group.bench_function("parse_ipv4_tcp", |b| {
        b.iter(|| {
            let key = upe::parser::parse(black_box(&frame)).unwrap();
            black_box(key);
        });
    });

    group.bench_function("parse_then_hash", |b| {
        b.iter(|| {
            let key = upe::parser::parse(black_box(&frame)).unwrap();
            black_box(flow_hash(&key));
        });
    });

    group.finish();
}

fn bench_rule_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("rule_lookup");

    for num_rules in [4usize, 64, 256].iter() {
        let mut table = RuleTable::new();
        for i in 0..*num_rules {
            table.add(Rule {
                priority: i as u32,
                ip_ver: 4,
                src_addr: IpAddrBytes::V4([0; 4]),
                src_mask: IpAddrBytes::V4([0; 4]),
                dst_addr: IpAddrBytes::V4([0; 4]),
                dst_mask: IpAddrBytes::V4([0; 4]),
                src_port: 0,
                dst_port: (i % 65536) as u16,
                protocol: 6,
                action: Action::Forward { out_ifindex: 1 },
                rule_id: 0,
            });
        }
        let key = FlowKey {
            ip_ver: 4,
            src_addr: IpAddrBytes::V4([10, 0, 0, 1]),
            dst_addr: IpAddrBytes::V4([10, 0, 0, 2]),
            src_port: 51000,
            dst_port: 443,
            protocol: 6,
        };

        group.bench_with_input(
            BenchmarkId::new("first_match_scan", num_rules),
            &table,
            |b, table| {
                b.iter(|| {
                    black_box(table.lookup(black_box(&key)));
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_pool_alloc_free,
    bench_pool_cache_hit_vs_global,
    bench_buffer_copy_from,
    bench_parse_and_hash,
    bench_rule_lookup,
);

criterion_main!(benches);
