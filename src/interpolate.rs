//! Linear interpolation of intensity and intensity gradient.
//!
//! Coordinates are continuous voxel indices. A coordinate is computable when
//! every component lies in `[-0.5, n - 0.5)`, the extent covered by the
//! voxels themselves. Inside the half-voxel rim around the outermost voxel
//! centers the border value is held constant. At integer coordinates
//! `sample` returns the stored voxel exactly.

use crate::image::{VolumeView, Voxel};

const HALF_VOXEL: f64 = 0.5;

/// Trilinear interpolator over a volume view.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    /// Returns true when `index` lies inside the sampleable region of `view`.
    #[inline]
    pub fn is_inside<T>(view: &VolumeView<'_, T>, index: [f64; 3]) -> bool {
        let size = view.size();
        (0..3).all(|axis| {
            let c = index[axis];
            c.is_finite() && c >= -HALF_VOXEL && c < size[axis] as f64 - HALF_VOXEL
        })
    }

    /// Samples the intensity at a continuous index, or `None` outside.
    #[inline]
    pub fn sample<T: Voxel>(view: &VolumeView<'_, T>, index: [f64; 3]) -> Option<f64> {
        if !Self::is_inside(view, index) {
            return None;
        }
        Some(Self::sample_clamped(view, index))
    }

    /// Samples the spatial intensity gradient at a continuous index, in
    /// intensity per physical unit, or `None` outside.
    ///
    /// Each component is a central difference of the linear interpolant with
    /// a half-voxel step, falling back to a one-sided difference at borders.
    /// In the border rim, and along axes with a single voxel, the interpolant
    /// is constant and the derivative is zero.
    pub fn sample_derivative<T: Voxel>(
        view: &VolumeView<'_, T>,
        index: [f64; 3],
    ) -> Option<[f64; 3]> {
        if !Self::is_inside(view, index) {
            return None;
        }
        let size = view.size();
        let spacing = view.geometry().spacing;
        let mut gradient = [0.0; 3];
        for axis in 0..3 {
            let max = size[axis] as f64 - 1.0;
            if index[axis] < 0.0 || index[axis] > max {
                continue;
            }
            let lo = (index[axis] - 0.5).max(0.0);
            let hi = (index[axis] + 0.5).min(max);
            if hi <= lo {
                continue;
            }
            let mut below = index;
            let mut above = index;
            below[axis] = lo;
            above[axis] = hi;
            let diff = Self::sample_clamped(view, above) - Self::sample_clamped(view, below);
            gradient[axis] = diff / ((hi - lo) * spacing[axis]);
        }
        Some(gradient)
    }

    fn sample_clamped<T: Voxel>(view: &VolumeView<'_, T>, index: [f64; 3]) -> f64 {
        let size = view.size();
        let data = view.as_slice();
        let mut base = [0usize; 3];
        let mut next = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for axis in 0..3 {
            let max = size[axis] - 1;
            let c = index[axis].clamp(0.0, max as f64);
            let i0 = (c.floor() as usize).min(max);
            base[axis] = i0;
            next[axis] = (i0 + 1).min(max);
            frac[axis] = c - i0 as f64;
        }

        let at = |x: usize, y: usize, z: usize| data[view.offset(x, y, z)].to_f64();
        let [x0, y0, z0] = base;
        let [x1, y1, z1] = next;
        let [fx, fy, fz] = frac;

        if fx == 0.0 && fy == 0.0 && fz == 0.0 {
            return at(x0, y0, z0);
        }

        let c00 = at(x0, y0, z0) * (1.0 - fx) + at(x1, y0, z0) * fx;
        let c10 = at(x0, y1, z0) * (1.0 - fx) + at(x1, y1, z0) * fx;
        let c01 = at(x0, y0, z1) * (1.0 - fx) + at(x1, y0, z1) * fx;
        let c11 = at(x0, y1, z1) * (1.0 - fx) + at(x1, y1, z1) * fx;
        let c0 = c00 * (1.0 - fy) + c10 * fy;
        let c1 = c01 * (1.0 - fy) + c11 * fy;
        c0 * (1.0 - fz) + c1 * fz
    }
}

#[cfg(test)]
mod tests {
    use super::LinearInterpolator;
    use crate::image::{Geometry, Volume};

    fn ramp() -> Volume<f32> {
        let geometry = Geometry::new([0.0; 3], [2.0, 1.0, 1.0]).unwrap();
        Volume::from_fn([4, 3, 2], geometry, |x, y, z| {
            (3 * x + 5 * y + 7 * z) as f32
        })
        .unwrap()
    }

    #[test]
    fn grid_points_are_exact() {
        let volume = ramp();
        let view = volume.view();
        assert_eq!(LinearInterpolator::sample(&view, [2.0, 1.0, 1.0]), Some(18.0));
        assert_eq!(LinearInterpolator::sample(&view, [3.0, 2.0, 1.0]), Some(26.0));
    }

    #[test]
    fn linear_field_is_reproduced_between_voxels() {
        let volume = ramp();
        let view = volume.view();
        let value = LinearInterpolator::sample(&view, [1.5, 0.25, 0.5]).unwrap();
        assert!((value - (4.5 + 1.25 + 3.5)).abs() < 1e-9);
    }

    #[test]
    fn outside_coordinates_are_not_computable() {
        let volume = ramp();
        let view = volume.view();
        assert!(LinearInterpolator::sample(&view, [-0.51, 0.0, 0.0]).is_none());
        assert!(LinearInterpolator::sample(&view, [3.5, 0.0, 0.0]).is_none());
        assert!(LinearInterpolator::sample(&view, [0.0, 0.0, f64::NAN]).is_none());
        assert!(LinearInterpolator::sample_derivative(&view, [0.0, 2.5, 0.0]).is_none());
    }

    #[test]
    fn border_rim_holds_the_edge_value() {
        let volume = ramp();
        let view = volume.view();
        assert_eq!(LinearInterpolator::sample(&view, [-0.5, 0.0, 0.0]), Some(0.0));
        assert_eq!(LinearInterpolator::sample(&view, [3.4, 2.0, 1.0]), Some(26.0));
        assert_eq!(LinearInterpolator::sample(&view, [0.0, -0.3, 1.2]), Some(7.0));

        let rim = LinearInterpolator::sample_derivative(&view, [3.2, 1.0, 0.5]).unwrap();
        assert_eq!(rim[0], 0.0);
        assert!((rim[1] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn derivative_uses_physical_spacing() {
        let volume = ramp();
        let view = volume.view();
        let interior = LinearInterpolator::sample_derivative(&view, [1.0, 1.0, 0.5]).unwrap();
        assert!((interior[0] - 1.5).abs() < 1e-9);
        assert!((interior[1] - 5.0).abs() < 1e-9);
        assert!((interior[2] - 7.0).abs() < 1e-9);

        let border = LinearInterpolator::sample_derivative(&view, [0.0, 0.0, 0.0]).unwrap();
        assert!((border[0] - 1.5).abs() < 1e-9);
    }
}
