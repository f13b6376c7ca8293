use criterion::{criterion_group, criterion_main, Criterion};
use photon_core::bvh::{BuildPolicy, BvhParams, OwnedGeometry};
use photon_core::math::Vec3;
use photon_infra::bvh::SoftwareAccel;
use std::hint::black_box;

// A wavy grid of `n x n` quads.
fn grid(n: u32) -> OwnedGeometry {
    let mut vertices = Vec::with_capacity(((n + 1) * (n + 1)) as usize);
    for y in 0..=n {
        for x in 0..=n {
            let (fx, fy) = (x as f32, y as f32);
            vertices.push(Vec3::new(fx, (fx * 0.3).sin() * (fy * 0.2).cos(), fy));
        }
    }
    let mut triangles = Vec::with_capacity((n * n * 2) as usize);
    for y in 0..n {
        for x in 0..n {
            let i = y * (n + 1) + x;
            triangles.push([i, i + 1, i + n + 2]);
            triangles.push([i, i + n + 2, i + n + 1]);
        }
    }
    OwnedGeometry::mesh(1, vertices, triangles)
}

fn bench_builds(c: &mut Criterion) {
    let mesh = grid(128);
    let static_params = BvhParams::new("grid", BuildPolicy::Static);
    let dynamic_params = BvhParams::new("grid", BuildPolicy::Dynamic);

    let mut group = c.benchmark_group("BVH build (32k triangles)");

    group.bench_function("Static binned SAH", |b| {
        b.iter(|| black_box(SoftwareAccel::build_bottom(&mesh, &static_params).ok()));
    });

    group.bench_function("Dynamic tree", |b| {
        b.iter(|| black_box(SoftwareAccel::build_bottom(&mesh, &dynamic_params).ok()));
    });

    let refit_base = SoftwareAccel::build_bottom(&mesh, &dynamic_params).ok();
    if let Some((accel, _)) = refit_base {
        group.bench_function("Dynamic refit", |b| {
            b.iter_batched(
                || accel.clone(),
                |mut accel| black_box(accel.refit_bottom(&mesh, &dynamic_params).ok()),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_builds);
criterion_main!(benches);
