//! Commit-path benchmarks
//!
//! Run with: cargo bench --bench commit

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use quiver_db::{IndexConfig, Indexer};

const DIM: usize = 64;

fn random_vector(dim: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect()
}

fn bench_stage_and_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage_and_commit");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));

    for num_vectors in [100usize, 1_000, 5_000] {
        let mut rng = StdRng::seed_from_u64(7 + num_vectors as u64);
        let vectors: Vec<_> = (0..num_vectors)
            .map(|_| random_vector(DIM, &mut rng))
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(num_vectors),
            &num_vectors,
            |b, &n| {
                b.iter(|| {
                    let idx =
                        Indexer::new(IndexConfig::new(DIM).with_in_memory_mode(true)).unwrap();
                    for i in 0..n {
                        idx.insert(&format!("uuid-{i}"), vectors[i].clone()).unwrap();
                    }
                    idx.create_index(2).unwrap();
                    black_box(idx.len())
                })
            },
        );
    }

    group.finish();
}

fn bench_search_after_commit(c: &mut Criterion) {
    let num_vectors = 5_000;
    let mut rng = StdRng::seed_from_u64(42);
    let idx = Indexer::new(IndexConfig::new(DIM).with_in_memory_mode(true)).unwrap();
    for i in 0..num_vectors {
        idx.insert(&format!("uuid-{i}"), random_vector(DIM, &mut rng))
            .unwrap();
    }
    idx.create_index(2).unwrap();

    let query = random_vector(DIM, &mut rng);
    c.bench_function("search_top10_5k", |b| {
        b.iter(|| black_box(idx.search(&query, 10, 0.1, -1.0).unwrap()))
    });
}

criterion_group!(benches, bench_stage_and_commit, bench_search_after_commit);
criterion_main!(benches);
