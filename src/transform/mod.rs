//! Centered 3D affine transform.
//!
//! A point `p` maps to `c + A·(p − c) + t`, where `A` is a 3x3 matrix, `t` a
//! translation and `c` a fixed center of rotation. The parameter vector holds
//! the nine entries of `A` in row-major order followed by `t`; the center is
//! not a parameter.

use crate::util::math::{add3, det3, inverse3, mat_vec3, sub3, Mat3, Vec3, IDENTITY3};
use crate::util::{VoxRegError, VoxRegResult};

pub mod initializer;

/// Degrees of freedom of a 3D affine transform.
pub const AFFINE_DOF: usize = 12;

const MIN_ABS_DETERMINANT: f64 = 1e-12;

/// Partial derivatives of a mapped point w.r.t. each parameter:
/// `jacobian[p][d] = ∂apply(point)[d] / ∂param[p]`.
pub type AffineJacobian = [[f64; 3]; AFFINE_DOF];

/// 3D affine transform with a center of rotation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
    matrix: Mat3,
    translation: Vec3,
    center: Vec3,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity([0.0; 3])
    }
}

impl AffineTransform {
    /// Identity transform around `center`.
    pub fn identity(center: [f64; 3]) -> Self {
        Self {
            matrix: IDENTITY3,
            translation: [0.0; 3],
            center,
        }
    }

    /// Builds a transform from a parameter vector and a center.
    pub fn from_parameters(parameters: &[f64], center: [f64; 3]) -> VoxRegResult<Self> {
        let mut transform = Self::identity(center);
        transform.set_parameters(parameters)?;
        Ok(transform)
    }

    /// Resets the linear part to identity and the translation to zero.
    ///
    /// The center is kept.
    pub fn set_identity(&mut self) {
        self.matrix = IDENTITY3;
        self.translation = [0.0; 3];
    }

    /// Number of parameters (always [`AFFINE_DOF`]).
    pub fn num_parameters(&self) -> usize {
        AFFINE_DOF
    }

    /// Returns `[a00, a01, a02, a10, .., a22, tx, ty, tz]`.
    pub fn parameters(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(AFFINE_DOF);
        for row in &self.matrix {
            out.extend_from_slice(row);
        }
        out.extend_from_slice(&self.translation);
        out
    }

    /// Replaces all parameters; the slice must hold exactly [`AFFINE_DOF`]
    /// values.
    pub fn set_parameters(&mut self, parameters: &[f64]) -> VoxRegResult<()> {
        if parameters.len() != AFFINE_DOF {
            return Err(VoxRegError::DimensionMismatch {
                expected: AFFINE_DOF,
                got: parameters.len(),
            });
        }
        for (i, row) in self.matrix.iter_mut().enumerate() {
            row.copy_from_slice(&parameters[3 * i..3 * i + 3]);
        }
        self.translation.copy_from_slice(&parameters[9..12]);
        Ok(())
    }

    pub fn center(&self) -> [f64; 3] {
        self.center
    }

    pub fn set_center(&mut self, center: [f64; 3]) {
        self.center = center;
    }

    pub fn translation(&self) -> [f64; 3] {
        self.translation
    }

    pub fn set_translation(&mut self, translation: [f64; 3]) {
        self.translation = translation;
    }

    /// Linear part, row-major.
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        self.matrix
    }

    pub fn set_matrix(&mut self, matrix: [[f64; 3]; 3]) {
        self.matrix = matrix;
    }

    /// Maps a physical point.
    #[inline]
    pub fn apply(&self, point: [f64; 3]) -> [f64; 3] {
        let local = sub3(point, self.center);
        add3(add3(self.center, mat_vec3(&self.matrix, local)), self.translation)
    }

    /// Analytic parameter Jacobian of [`apply`](Self::apply) at `point`.
    #[inline]
    pub fn jacobian(&self, point: [f64; 3]) -> AffineJacobian {
        let local = sub3(point, self.center);
        let mut jacobian = [[0.0; 3]; AFFINE_DOF];
        for row in 0..3 {
            for col in 0..3 {
                jacobian[3 * row + col][row] = local[col];
            }
            jacobian[9 + row][row] = 1.0;
        }
        jacobian
    }

    /// Projects a spatial gradient `∇` through the Jacobian: `out[p] = ∇·J[p]`.
    ///
    /// Equivalent to multiplying with [`jacobian`](Self::jacobian) without
    /// materializing the zero entries.
    #[inline]
    pub(crate) fn accumulate_gradient(
        &self,
        point: [f64; 3],
        spatial: [f64; 3],
        scale: f64,
        out: &mut [f64],
    ) {
        let local = sub3(point, self.center);
        for row in 0..3 {
            let g = spatial[row] * scale;
            for col in 0..3 {
                out[3 * row + col] += g * local[col];
            }
            out[9 + row] += g;
        }
    }

    /// Determinant of the linear part.
    pub fn determinant(&self) -> f64 {
        det3(&self.matrix)
    }

    /// Inverse mapping around the same center.
    pub fn inverse(&self) -> VoxRegResult<Self> {
        let inv = inverse3(&self.matrix, MIN_ABS_DETERMINANT).ok_or(
            VoxRegError::SingularTransform {
                determinant: self.determinant(),
            },
        )?;
        // p = c + A(q - c) + t  =>  q = c + A⁻¹(p - c) - A⁻¹t
        let shifted = mat_vec3(&inv, self.translation);
        Ok(Self {
            matrix: inv,
            translation: [-shifted[0], -shifted[1], -shifted[2]],
            center: self.center,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AffineTransform, AFFINE_DOF};
    use crate::util::VoxRegError;

    fn sample_transform() -> AffineTransform {
        let params = [
            1.1, 0.2, -0.1, 0.05, 0.9, 0.3, -0.2, 0.1, 1.2, 3.0, -1.5, 0.25,
        ];
        AffineTransform::from_parameters(&params, [4.0, 5.0, 6.0]).unwrap()
    }

    #[test]
    fn set_identity_keeps_center() {
        let mut transform = sample_transform();
        transform.set_identity();
        assert_eq!(transform.center(), [4.0, 5.0, 6.0]);
        assert_eq!(transform.apply([1.0, 2.0, 3.0]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn wrong_parameter_count_is_rejected() {
        let mut transform = AffineTransform::default();
        let err = transform.set_parameters(&[0.0; 11]).unwrap_err();
        assert_eq!(
            err,
            VoxRegError::DimensionMismatch {
                expected: AFFINE_DOF,
                got: 11,
            }
        );
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let transform = sample_transform();
        let point = [1.5, -2.0, 7.25];
        let jacobian = transform.jacobian(point);
        let base = transform.parameters();
        let h = 1e-6;
        for p in 0..AFFINE_DOF {
            let mut shifted = base.clone();
            shifted[p] += h;
            let moved = AffineTransform::from_parameters(&shifted, transform.center())
                .unwrap()
                .apply(point);
            let reference = transform.apply(point);
            for d in 0..3 {
                let numeric = (moved[d] - reference[d]) / h;
                assert!((numeric - jacobian[p][d]).abs() < 1e-5, "p={p} d={d}");
            }
        }
    }

    #[test]
    fn accumulate_gradient_matches_jacobian_product() {
        let transform = sample_transform();
        let point = [0.5, 2.0, -1.0];
        let spatial = [0.3, -1.2, 2.5];
        let mut out = vec![0.0; AFFINE_DOF];
        transform.accumulate_gradient(point, spatial, 2.0, &mut out);
        let jacobian = transform.jacobian(point);
        for p in 0..AFFINE_DOF {
            let expected: f64 = 2.0 * (0..3).map(|d| spatial[d] * jacobian[p][d]).sum::<f64>();
            assert!((out[p] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn inverse_undoes_apply() {
        let transform = sample_transform();
        let inverse = transform.inverse().unwrap();
        let point = [3.0, -4.0, 9.5];
        let back = inverse.apply(transform.apply(point));
        for d in 0..3 {
            assert!((back[d] - point[d]).abs() < 1e-9);
        }
    }

    #[test]
    fn singular_transform_has_no_inverse() {
        let mut transform = AffineTransform::default();
        transform.set_matrix([[1.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        assert!(matches!(
            transform.inverse(),
            Err(VoxRegError::SingularTransform { .. })
        ));
    }
}
