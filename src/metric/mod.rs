//! Mean squared difference metric and its parameter gradient.
//!
//! For every voxel of the fixed sampling region the physical point is mapped
//! through the transform and the moving level is sampled with
//! [`LinearInterpolator`](crate::interpolate::LinearInterpolator). Voxels
//! that land outside the moving volume are skipped; value and gradient are
//! normalized by the number of voxels that were computable.

use crate::image::pyramid::PyramidLevel;
use crate::transform::{AffineTransform, AFFINE_DOF};
use crate::util::{VoxRegError, VoxRegResult};

pub(crate) mod scalar;

#[cfg(feature = "rayon")]
pub(crate) mod rayon;

/// Result of one metric evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricEvaluation {
    /// Mean squared difference over the computable voxels.
    pub value: f64,
    /// Derivative of `value` w.r.t. each transform parameter.
    pub gradient: Vec<f64>,
    /// Number of fixed voxels that mapped inside the moving volume.
    pub computable: usize,
}

/// Running sums over a block of fixed voxels.
#[derive(Clone, Debug)]
pub(crate) struct Accumulator {
    pub(crate) sum_sq: f64,
    pub(crate) gradient: [f64; AFFINE_DOF],
    pub(crate) count: usize,
}

impl Accumulator {
    pub(crate) fn new() -> Self {
        Self {
            sum_sq: 0.0,
            gradient: [0.0; AFFINE_DOF],
            count: 0,
        }
    }

    #[cfg(feature = "rayon")]
    pub(crate) fn merge(&mut self, other: &Accumulator) {
        self.sum_sq += other.sum_sq;
        for (g, o) in self.gradient.iter_mut().zip(other.gradient.iter()) {
            *g += o;
        }
        self.count += other.count;
    }

    fn finish(self, with_gradient: bool) -> VoxRegResult<MetricEvaluation> {
        if self.count == 0 {
            return Err(VoxRegError::NoOverlap);
        }
        let n = self.count as f64;
        let gradient = if with_gradient {
            self.gradient.iter().map(|g| g / n).collect()
        } else {
            Vec::new()
        };
        Ok(MetricEvaluation {
            value: self.sum_sq / n,
            gradient,
            computable: self.count,
        })
    }
}

/// Mean squared intensity difference between fixed and transformed moving
/// volumes.
#[derive(Clone, Copy, Debug, Default)]
pub struct MeanSquares {
    /// Split the voxel loop over z-slices with rayon when the feature is on.
    pub parallel: bool,
}

impl MeanSquares {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Computes value and gradient at `transform`.
    ///
    /// Fails with [`VoxRegError::NoOverlap`] when no fixed voxel maps inside
    /// the moving volume.
    pub fn evaluate(
        &self,
        level: &PyramidLevel,
        transform: &AffineTransform,
    ) -> VoxRegResult<MetricEvaluation> {
        self.accumulate(level, transform, true)?.finish(true)
    }

    /// Computes only the value at `transform`; `gradient` is left empty.
    pub fn value(&self, level: &PyramidLevel, transform: &AffineTransform) -> VoxRegResult<f64> {
        Ok(self.accumulate(level, transform, false)?.finish(false)?.value)
    }

    fn accumulate(
        &self,
        level: &PyramidLevel,
        transform: &AffineTransform,
        with_gradient: bool,
    ) -> VoxRegResult<Accumulator> {
        #[cfg(feature = "rayon")]
        if self.parallel {
            return Ok(self::rayon::accumulate_par(level, transform, with_gradient));
        }
        Ok(scalar::accumulate(level, transform, with_gradient))
    }
}

#[cfg(test)]
mod tests {
    use super::MeanSquares;
    use crate::image::pyramid::PyramidLevel;
    use crate::image::{Geometry, Volume};
    use crate::transform::{AffineTransform, AFFINE_DOF};
    use crate::util::VoxRegError;

    fn blob(shift: f64) -> Volume<f32> {
        Volume::from_fn([12, 10, 8], Geometry::default(), |x, y, z| {
            let dx = x as f64 - 5.5 - shift;
            let dy = y as f64 - 4.5;
            let dz = z as f64 - 3.5;
            (100.0 * (-(dx * dx + dy * dy + dz * dz) / 8.0).exp()) as f32
        })
        .unwrap()
    }

    #[test]
    fn identical_volumes_score_zero_at_identity() {
        let volume = blob(0.0);
        let level = PyramidLevel::from_volumes(volume.view(), volume.view(), None).unwrap();
        let eval = MeanSquares::new()
            .evaluate(&level, &AffineTransform::identity([5.5, 4.5, 3.5]))
            .unwrap();
        assert_eq!(eval.value, 0.0);
        assert_eq!(eval.computable, 12 * 10 * 8);
        assert_eq!(eval.gradient.len(), AFFINE_DOF);
        assert!(eval.gradient.iter().all(|g| *g == 0.0));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        // Linear intensities make the half-voxel central differences exact,
        // so analytic and numeric gradients must agree closely.
        let size = [12, 10, 8];
        let fixed = Volume::from_fn(size, Geometry::default(), |x, y, z| {
            (2.0 * x as f64 + y as f64 + 0.5 * z as f64) as f32
        })
        .unwrap();
        let moving = Volume::from_fn(size, Geometry::default(), |x, y, z| {
            (2.0 * x as f64 + y as f64 + 0.5 * z as f64 + 3.0) as f32
        })
        .unwrap();
        let level = PyramidLevel::from_volumes(fixed.view(), moving.view(), None).unwrap();
        let metric = MeanSquares::new();
        let center = [5.5, 4.5, 3.5];
        let mut params = AffineTransform::identity(center).parameters();
        params[9] = 0.3;
        params[10] = -0.2;
        params[11] = 0.1;
        let transform = AffineTransform::from_parameters(&params, center).unwrap();
        let eval = metric.evaluate(&level, &transform).unwrap();

        let h = 1e-5;
        for p in 0..AFFINE_DOF {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[p] += h;
            minus[p] -= h;
            let vp = metric
                .value(&level, &AffineTransform::from_parameters(&plus, center).unwrap())
                .unwrap();
            let vm = metric
                .value(&level, &AffineTransform::from_parameters(&minus, center).unwrap())
                .unwrap();
            let numeric = (vp - vm) / (2.0 * h);
            let tolerance = 1e-4 * numeric.abs().max(1.0);
            assert!(
                (numeric - eval.gradient[p]).abs() < tolerance,
                "param {p}: numeric {numeric}, analytic {}",
                eval.gradient[p]
            );
        }
    }

    #[test]
    fn translation_gradient_points_towards_moving_blob() {
        let fixed = blob(0.0);
        let moving = blob(1.0);
        let level = PyramidLevel::from_volumes(fixed.view(), moving.view(), None).unwrap();
        let eval = MeanSquares::new()
            .evaluate(&level, &AffineTransform::identity([5.5, 4.5, 3.5]))
            .unwrap();
        assert!(eval.value > 0.0);
        assert!(eval.gradient[9] < 0.0);
    }

    #[test]
    fn disjoint_volumes_report_no_overlap() {
        let volume = blob(0.0);
        let level = PyramidLevel::from_volumes(volume.view(), volume.view(), None).unwrap();
        let mut transform = AffineTransform::identity([0.0; 3]);
        transform.set_translation([100.0, 0.0, 0.0]);
        assert_eq!(
            MeanSquares::new().evaluate(&level, &transform).unwrap_err(),
            VoxRegError::NoOverlap
        );
    }
}
