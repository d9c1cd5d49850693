//! Forest Benchmarks
//!
//! Run with: cargo bench --bench forest

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::time::Duration;
use tempora_core::simd::l2_normalized;
use tempora_core::{Forest, Metric};

fn random_vector(dim: usize, rng: &mut StdRng) -> Vec<f32> {
    let v: Vec<f32> = (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect();
    l2_normalized(&v)
}

fn build_forest(vectors: &[Vec<f32>], n_trees: usize) -> Forest {
    let mut forest = Forest::new_with_seed(vectors[0].len(), Metric::Angular, 42);
    for (i, v) in vectors.iter().enumerate() {
        forest.add_item(i, v).unwrap();
    }
    forest.build(n_trees).unwrap();
    forest
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("forest_build");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));

    for num_vectors in [1000, 5000] {
        let mut rng = StdRng::seed_from_u64(1000 + num_vectors as u64);
        let vectors: Vec<_> = (0..num_vectors)
            .map(|_| random_vector(128, &mut rng))
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(num_vectors),
            &vectors,
            |b, vectors| b.iter(|| black_box(build_forest(vectors, 20).stats().nodes)),
        );
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let num_vectors = 10_000;
    let mut rng = StdRng::seed_from_u64(4242);
    let vectors: Vec<_> = (0..num_vectors)
        .map(|_| random_vector(128, &mut rng))
        .collect();
    let forest = build_forest(&vectors, 50);

    let mut group = c.benchmark_group("forest_search");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(3));

    for search_k in [500, 2_000, 10_000] {
        let mut query_rng = StdRng::seed_from_u64(search_k as u64 + 5000);
        let query = random_vector(128, &mut query_rng);

        group.bench_with_input(BenchmarkId::from_parameter(search_k), &search_k, |b, &k| {
            b.iter(|| black_box(forest.nns_by_vector(&query, 10, Some(k)).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_search);
criterion_main!(benches);
