use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::io::Cursor;

use crossrep::config::FilterConfig;
use crossrep::engine::{self, DemoInjection};
use crossrep::hash::rolling::HashEngine;
use crossrep::hash::shuffle::ByteShuffle;
use crossrep::map::FingerprintMap;

fn gen_data(size: usize, seed: u64) -> Vec<u8> {
    let mut s = seed;
    let mut out = Vec::with_capacity(size);
    for _ in 0..size {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        out.push((s >> 33) as u8);
    }
    out
}

fn bench_config() -> FilterConfig {
    FilterConfig {
        common_modulus: 1_000_003,
        ..FilterConfig::default()
    }
}

fn bench_hash_batch(c: &mut Criterion) {
    let cfg = bench_config();
    let engine = HashEngine::new(&cfg);

    let mut group = c.benchmark_group("hash_batch");
    for &size in &[8 * 1024usize, 64 * 1024] {
        let data = gen_data(size + cfg.carry_len(), 1);
        let mut com = vec![0u64; size];
        let mut div = vec![0u8; (size + 1) * cfg.filter_count];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                engine.hash_batch(black_box(&data), size, &mut com, &mut div);
                black_box(com[size - 1]);
            });
        });
    }
    group.finish();
}

fn bench_map_access(c: &mut Criterion) {
    let cfg = bench_config();
    let engine = HashEngine::new(&cfg);
    let n = 8 * 1024usize;
    let data = gen_data(n + cfg.carry_len(), 2);
    let mut com = vec![0u64; n];
    let mut div = vec![0u8; (n + 1) * cfg.filter_count];
    engine.hash_batch(&data, n, &mut com, &mut div);

    let dv = cfg.filter_count;
    let mut group = c.benchmark_group("map_access");
    group.throughput(Throughput::Elements(n as u64));

    group.bench_function("mark", |b| {
        let mut map = FingerprintMap::new(cfg.map_len()).unwrap();
        b.iter(|| {
            for j in 0..n {
                map.mark(black_box(com[j]), &div[j * dv..j * dv + dv]);
            }
        });
    });

    group.bench_function("probe", |b| {
        let mut map = FingerprintMap::new(cfg.map_len()).unwrap();
        for j in 0..n {
            map.mark(com[j], &div[j * dv..j * dv + dv]);
        }
        b.iter(|| {
            let mut hits = 0u64;
            for j in 0..n {
                hits += map.is_hit(black_box(com[j]), &div[j * dv..j * dv + dv]) as u64;
            }
            black_box(hits)
        });
    });

    group.finish();
}

fn bench_shuffle(c: &mut Criterion) {
    let shuffle = ByteShuffle::from_seed(7);
    let data = gen_data(64 * 1024, 3);

    let mut group = c.benchmark_group("shuffle");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("apply_in_place_64k", |b| {
        b.iter(|| {
            let mut batch = data.clone();
            shuffle.apply_in_place(&mut batch);
            black_box(batch[0])
        });
    });
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let size = 1 << 20; // 1 MiB streams
    let reference = gen_data(size, 4);
    let test = gen_data(size, 5);
    let cfg = FilterConfig {
        reference_len: size as u64,
        test_len: size as u64,
        ..bench_config()
    };
    let shuffle = ByteShuffle::from_seed(11);
    let scattered = engine::scatter_stream(
        &cfg,
        Cursor::new(reference.clone()),
        &shuffle,
        DemoInjection::Off,
    )
    .unwrap();

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(size as u64));

    group.bench_function("scatter_1m", |b| {
        b.iter(|| {
            engine::scatter_stream(
                &cfg,
                Cursor::new(reference.clone()),
                &shuffle,
                DemoInjection::Off,
            )
            .unwrap()
        });
    });

    group.bench_function("gather_1m", |b| {
        b.iter(|| {
            engine::gather_stream(
                &cfg,
                Cursor::new(test.clone()),
                &shuffle,
                &scattered.map,
                DemoInjection::Off,
            )
            .unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_hash_batch,
    bench_map_access,
    bench_shuffle,
    bench_pipeline
);
criterion_main!(benches);
