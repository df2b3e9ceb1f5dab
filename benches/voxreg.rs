use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use voxreg::{
    AffineTransform, Geometry, ImagePyramid, MeanSquares, Registration, RegistrationConfig,
    Volume,
};

fn make_volume(size: usize, shift: f64) -> Volume<u16> {
    let c = (size as f64 - 1.0) * 0.5;
    Volume::from_fn([size; 3], Geometry::default(), |x, y, z| {
        let dx = x as f64 - c - shift;
        let dy = y as f64 - c;
        let dz = z as f64 - c;
        let r2 = dx * dx + dy * dy + dz * dz;
        let texture = ((x * 13) ^ (y * 7) ^ (z * 3)) & 0x3F;
        ((2000.0 * (-r2 / 50.0).exp()) as usize + texture) as u16
    })
    .unwrap()
}

fn bench_metric(c: &mut Criterion) {
    let fixed = make_volume(64, 0.0);
    let moving = make_volume(64, 2.0);
    let pyramid = ImagePyramid::build(fixed.view(), moving.view(), 1).unwrap();
    let level = &pyramid.levels()[0];
    let transform = AffineTransform::identity(fixed.geometry().center(fixed.size()));

    let scalar = MeanSquares::new();
    c.bench_function("msd_value_and_gradient_64", |b| {
        b.iter(|| black_box(scalar.evaluate(level, &transform).unwrap()));
    });

    #[cfg(feature = "rayon")]
    {
        let parallel = MeanSquares::new().with_parallel(true);
        c.bench_function("msd_value_and_gradient_64_rayon", |b| {
            b.iter(|| black_box(parallel.evaluate(level, &transform).unwrap()));
        });
    }
}

fn bench_registration(c: &mut Criterion) {
    let fixed = make_volume(32, 0.0);
    let moving = make_volume(32, 2.0);
    let mut group = c.benchmark_group("registration");
    group.sample_size(10);
    group.bench_function("three_levels_32", |b| {
        b.iter(|| {
            black_box(
                Registration::new(RegistrationConfig::default())
                    .run(fixed.view(), moving.view())
                    .unwrap(),
            )
        });
    });
    group.finish();
}

criterion_group!(benches, bench_metric, bench_registration);
criterion_main!(benches);
