//! Scalar reference loop for the mean squared difference metric.

use crate::image::pyramid::PyramidLevel;
use crate::interpolate::LinearInterpolator;
use crate::metric::Accumulator;
use crate::transform::AffineTransform;

/// Accumulates the fixed sampling region one z-slice at a time.
pub(crate) fn accumulate(
    level: &PyramidLevel,
    transform: &AffineTransform,
    with_gradient: bool,
) -> Accumulator {
    let region = level.region();
    let mut acc = Accumulator::new();
    for z in region.start[2]..region.end()[2] {
        accumulate_slice(level, transform, z, with_gradient, &mut acc);
    }
    acc
}

/// Adds the contribution of fixed slice `z` (restricted to the region) to `acc`.
pub(crate) fn accumulate_slice(
    level: &PyramidLevel,
    transform: &AffineTransform,
    z: usize,
    with_gradient: bool,
    acc: &mut Accumulator,
) {
    let fixed = level.fixed();
    let moving = level.moving();
    let fixed_geometry = fixed.geometry();
    let moving_geometry = moving.geometry();
    let region = level.region();
    let end = region.end();

    for y in region.start[1]..end[1] {
        let Some(row) = fixed.row(y, z) else {
            continue;
        };
        for x in region.start[0]..end[0] {
            let point = fixed_geometry.index_to_physical([x as f64, y as f64, z as f64]);
            let mapped = transform.apply(point);
            let index = moving_geometry.physical_to_index(mapped);
            let Some(moving_value) = LinearInterpolator::sample(&moving, index) else {
                continue;
            };
            let diff = f64::from(row[x]) - moving_value;
            acc.sum_sq += diff * diff;
            acc.count += 1;

            if with_gradient {
                if let Some(spatial) = LinearInterpolator::sample_derivative(&moving, index) {
                    // d/dp (f - m(T(x)))² = -2 (f - m) ∇m · ∂T/∂p
                    transform.accumulate_gradient(point, spatial, -2.0 * diff, &mut acc.gradient);
                }
            }
        }
    }
}
