use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use glam::DVec3;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::hint::black_box;

use meshalign_3d::transforms::RigidTransform;
use meshalign_icp::{ExecutionStrategy, FlatKdTree, KdTree, NearestNeighborIndex, Neighbor};

fn random_points(rng: &mut StdRng, n: usize) -> Vec<[f64; 3]> {
    (0..n)
        .map(|_| std::array::from_fn(|_| rng.random_range(-1.0..1.0)))
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("KdTreeBuild");
    let mut rng = StdRng::seed_from_u64(0);

    for num_points in [1_000, 10_000, 100_000] {
        let points = random_points(&mut rng, num_points);
        group.throughput(Throughput::Elements(num_points as u64));

        group.bench_with_input(BenchmarkId::new("tree", num_points), &points, |b, p| {
            b.iter(|| black_box(KdTree::build(p)))
        });
        group.bench_with_input(BenchmarkId::new("flat", num_points), &points, |b, p| {
            b.iter(|| black_box(FlatKdTree::build(p)))
        });
    }
    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("KdTreeQuery");
    let mut rng = StdRng::seed_from_u64(1);

    let points = random_points(&mut rng, 100_000);
    let queries = random_points(&mut rng, 10_000)
        .into_iter()
        .map(DVec3::from_array)
        .collect::<Vec<_>>();
    group.throughput(Throughput::Elements(queries.len() as u64));

    let tree = KdTree::build(&points).unwrap();
    let flat = FlatKdTree::build(&points).unwrap();

    group.bench_function("tree_single", |b| {
        b.iter(|| {
            for q in queries.iter() {
                black_box(tree.closest_point(*q));
            }
        })
    });

    let transform = RigidTransform::IDENTITY;
    let mut out = vec![Neighbor::default(); queries.len()];
    for (name, strategy) in [
        ("serial", ExecutionStrategy::Serial),
        ("parallel_elements", ExecutionStrategy::ParallelElements),
        ("chunked_256", ExecutionStrategy::Chunked(256)),
    ] {
        group.bench_function(BenchmarkId::new("flat_batch", name), |b| {
            b.iter(|| {
                NearestNeighborIndex::nearest_batch(&flat, &queries, &transform, strategy, &mut out)
                    .unwrap();
                black_box(&out);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_query);
criterion_main!(benches);
