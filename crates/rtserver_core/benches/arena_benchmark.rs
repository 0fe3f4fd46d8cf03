//! # Resource Arena Benchmark
//!
//! Steady-state cost of recycling the records of one shot.
//!
//! Run with: `cargo bench --package rtserver_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rtserver_core::{Hit, Job, JobResult, Ray, RayResult, ResourceArena};

/// Benchmark: acquire and release a single ray.
fn bench_ray_round_trip(c: &mut Criterion) {
    let arena = ResourceArena::new();
    c.bench_function("arena_ray_round_trip", |b| {
        b.iter(|| {
            let ray = arena.acquire::<Ray>();
            arena.release(black_box(ray));
        });
    });
}

/// Benchmark: build and recycle a full job graph of N rays with two hits each.
fn bench_job_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_job_graph");

    for rays in [1usize, 64, 1024] {
        let arena = ResourceArena::new();
        group.bench_with_input(BenchmarkId::from_parameter(rays), &rays, |b, &rays| {
            b.iter(|| {
                let mut job = arena.acquire::<Job>();
                let mut result = arena.acquire::<JobResult>();
                for _ in 0..rays {
                    job.rays.push(arena.acquire::<Ray>());
                    let mut ray_result = arena.acquire::<RayResult>();
                    ray_result.hits.push(arena.acquire::<Hit>());
                    ray_result.hits.push(arena.acquire::<Hit>());
                    result.ray_results.push(ray_result);
                }
                result.job = Some(job);
                arena.recycle_job_result(black_box(result));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_ray_round_trip, bench_job_graph);
criterion_main!(benches);
