//! Distance kernel benchmarks
//!
//! Run with: cargo bench --bench simd

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::Rng;
use tempora_core::simd::{dot_product, l2_distance_squared, manhattan_distance};

fn random_vector(dim: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect()
}

fn bench_kernel(c: &mut Criterion, name: &str, kernel: fn(&[f32], &[f32]) -> f32) {
    let mut group = c.benchmark_group(name);

    for dim in [128, 512, 2048] {
        group.throughput(Throughput::Elements(dim as u64));

        let a = random_vector(dim);
        let b = random_vector(dim);

        group.bench_function(format!("dim_{}", dim), |bencher| {
            bencher.iter(|| kernel(black_box(&a), black_box(&b)))
        });
    }

    group.finish();
}

fn bench_dot_product(c: &mut Criterion) {
    bench_kernel(c, "dot_product", dot_product);
}

fn bench_l2_distance(c: &mut Criterion) {
    bench_kernel(c, "l2_distance_squared", l2_distance_squared);
}

fn bench_manhattan(c: &mut Criterion) {
    bench_kernel(c, "manhattan_distance", manhattan_distance);
}

criterion_group!(benches, bench_dot_product, bench_l2_distance, bench_manhattan);
criterion_main!(benches);
