use voxreg::{
    resample, AffineTransform, Geometry, InitializerStrategy, MeanSquares, PyramidLevel,
    Registration, RegistrationConfig, Volume,
};

const SIZE: usize = 24;

fn blob(shift: [f64; 3]) -> Volume<u16> {
    let c = (SIZE as f64 - 1.0) * 0.5;
    Volume::from_fn([SIZE; 3], Geometry::default(), |x, y, z| {
        let dx = x as f64 - c - shift[0];
        let dy = y as f64 - c - shift[1];
        let dz = z as f64 - c - shift[2];
        let r2 = dx * dx + dy * dy + dz * dz;
        (1000.0 * (-r2 / (2.0 * 3.0 * 3.0)).exp()).round() as u16
    })
    .unwrap()
}

fn full_resolution_value(
    fixed: &Volume<u16>,
    moving: &Volume<u16>,
    transform: &AffineTransform,
) -> f64 {
    let level = PyramidLevel::from_volumes(fixed.view(), moving.view(), None).unwrap();
    MeanSquares::new().value(&level, transform).unwrap()
}

#[test]
fn pipeline_recovers_known_translation() {
    let fixed = blob([0.0; 3]);
    let moving = blob([3.0, 0.0, 0.0]);

    let mut registration = Registration::new(RegistrationConfig {
        levels: 3,
        initializer: InitializerStrategy::IntensityMoments,
        ..RegistrationConfig::default()
    });
    let outcome = registration.run(fixed.view(), moving.view()).unwrap();
    assert_eq!(outcome.levels().len(), 3);
    assert!(outcome.failed_levels().is_empty());
    assert_eq!(
        outcome
            .levels()
            .iter()
            .map(|record| record.shrink_factor)
            .collect::<Vec<_>>(),
        vec![4, 2, 1]
    );

    let transform = outcome.final_transform().unwrap();
    let t = transform.translation();
    assert!((t[0] - 3.0).abs() < 0.5, "recovered translation {t:?}");
    assert!(t[1].abs() < 0.5, "recovered translation {t:?}");
    assert!(t[2].abs() < 0.5, "recovered translation {t:?}");

    let identity = AffineTransform::identity(transform.center());
    let before = full_resolution_value(&fixed, &moving, &identity);
    let after = full_resolution_value(&fixed, &moving, &transform);
    assert!(after < before, "final {after} not below identity {before}");
}

#[test]
fn descent_recovers_translation_from_geometric_centers() {
    let fixed = blob([0.0; 3]);
    let moving = blob([3.0, 0.0, 0.0]);

    let outcome = Registration::new(RegistrationConfig {
        levels: 3,
        initializer: InitializerStrategy::GeometricCenters,
        ..RegistrationConfig::default()
    })
    .run(fixed.view(), moving.view())
    .unwrap();
    assert!(outcome.failed_levels().is_empty());
    assert_eq!(outcome.initial_transform().translation(), [0.0; 3]);

    let transform = outcome.final_transform().unwrap();
    let t = transform.translation();
    assert!((t[0] - 3.0).abs() < 0.5, "recovered translation {t:?}");
    assert!(t[1].abs() < 0.5, "recovered translation {t:?}");
    assert!(t[2].abs() < 0.5, "recovered translation {t:?}");

    let before = full_resolution_value(&fixed, &moving, outcome.initial_transform());
    let after = full_resolution_value(&fixed, &moving, &transform);
    assert!(after < before, "final {after} not below initial {before}");
}

#[test]
fn registered_volume_resembles_fixed() {
    let fixed = blob([0.0; 3]);
    let moving = blob([2.0, -1.0, 0.0]);

    let outcome = Registration::new(RegistrationConfig::default())
        .run(fixed.view(), moving.view())
        .unwrap();
    let transform = outcome.final_transform().unwrap();
    let registered = resample(
        moving.view(),
        &transform,
        fixed.geometry(),
        fixed.size(),
        0,
    )
    .unwrap();

    let mean_abs = |a: &Volume<u16>, b: &Volume<u16>| {
        a.data()
            .iter()
            .zip(b.data())
            .map(|(x, y)| (f64::from(*x) - f64::from(*y)).abs())
            .sum::<f64>()
            / a.data().len() as f64
    };
    assert!(mean_abs(&registered, &fixed) < mean_abs(&moving, &fixed));
}

#[test]
fn signed_and_float_voxels_are_accepted() {
    let fixed = Volume::from_fn([16; 3], Geometry::default(), |x, y, z| {
        (x as i32 - 8) * (y as i32 - 8) + z as i32
    })
    .unwrap();
    let moving = Volume::from_fn([16; 3], Geometry::default(), |x, y, z| {
        (x as f32 - 8.0) * (y as f32 - 8.0) + z as f32
    })
    .unwrap();
    let outcome = Registration::new(RegistrationConfig {
        levels: 2,
        initializer: InitializerStrategy::GeometricCenters,
        ..RegistrationConfig::default()
    })
    .run(fixed.view(), moving.view())
    .unwrap();
    assert!(outcome.failed_levels().is_empty());
}
