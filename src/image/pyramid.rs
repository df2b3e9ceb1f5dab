//! Multi-resolution pyramid for fixed/moving volume pairs.
//!
//! Level 0 is the coarsest. Level `i` of an `L`-level pyramid uses the shrink
//! factor `f = 2^(L-1-i)`: the volume is smoothed with a Gaussian of
//! `σ = 0.5·f` voxels (no smoothing when `f == 1`) and every `f`-th voxel is
//! kept, so an axis of `n` voxels becomes `ceil(n / f)` voxels. Spacing grows
//! by `f` and the origin is unchanged, so physical coordinates (and therefore
//! transform parameters) mean the same thing at every level.

use crate::image::gaussian::smooth;
use crate::image::{Region, Volume, VolumeView, Voxel};
use crate::trace::{trace_event, trace_span};
use crate::util::{VoxRegError, VoxRegResult};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Smallest voxel count allowed along any axis at the coarsest level.
pub const MIN_LEVEL_SIZE: usize = 4;

/// One fixed/moving pair of the pyramid.
#[derive(Clone, Debug)]
pub struct PyramidLevel {
    index: usize,
    shrink_factor: usize,
    sigma: f64,
    fixed: Volume<f32>,
    moving: Volume<f32>,
    region: Region,
}

impl PyramidLevel {
    /// Level index, 0 being the coarsest.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Downsampling factor relative to the input volumes.
    pub fn shrink_factor(&self) -> usize {
        self.shrink_factor
    }

    /// Gaussian sigma applied before subsampling, in input voxels.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn fixed(&self) -> VolumeView<'_, f32> {
        self.fixed.view()
    }

    pub fn moving(&self) -> VolumeView<'_, f32> {
        self.moving.view()
    }

    /// Fixed-level voxels the metric iterates over.
    pub fn region(&self) -> Region {
        self.region
    }

    /// Builds a single-level "pyramid" entry from two volumes as they are.
    ///
    /// Useful for evaluating the metric at full resolution without smoothing.
    pub fn from_volumes<F: Voxel, M: Voxel>(
        fixed: VolumeView<'_, F>,
        moving: VolumeView<'_, M>,
        region: Option<Region>,
    ) -> VoxRegResult<Self> {
        let region = region.unwrap_or_else(|| Region::full(fixed.size()));
        region.validate(fixed.size())?;
        Ok(Self {
            index: 0,
            shrink_factor: 1,
            sigma: 0.0,
            fixed: fixed.to_f32(),
            moving: moving.to_f32(),
            region,
        })
    }
}

/// Owned coarse-to-fine pyramid of fixed/moving level pairs.
#[derive(Clone, Debug)]
pub struct ImagePyramid {
    levels: Vec<PyramidLevel>,
}

impl ImagePyramid {
    /// Builds `num_levels` levels sampling the full fixed volume.
    pub fn build<F: Voxel, M: Voxel>(
        fixed: VolumeView<'_, F>,
        moving: VolumeView<'_, M>,
        num_levels: usize,
    ) -> VoxRegResult<Self> {
        Self::build_with_region(fixed, moving, num_levels, None)
    }

    /// Builds `num_levels` levels, restricting the metric to `region` of the
    /// full-resolution fixed volume when given.
    pub fn build_with_region<F: Voxel, M: Voxel>(
        fixed: VolumeView<'_, F>,
        moving: VolumeView<'_, M>,
        num_levels: usize,
        region: Option<Region>,
    ) -> VoxRegResult<Self> {
        if num_levels < 1 {
            return Err(VoxRegError::InvalidConfiguration(
                "number of pyramid levels must be at least 1",
            ));
        }
        let region = region.unwrap_or_else(|| Region::full(fixed.size()));
        region.validate(fixed.size())?;

        let coarsest = shrink_factor(0, num_levels)?;
        check_resolution(fixed.size(), coarsest)?;
        check_resolution(moving.size(), coarsest)?;

        let _span = trace_span!("pyramid_build", levels = num_levels).entered();

        let fixed_f32 = fixed.to_f32();
        let moving_f32 = moving.to_f32();
        let build_level = |index: usize| -> VoxRegResult<PyramidLevel> {
            let factor = shrink_factor(index, num_levels)?;
            let sigma = if factor > 1 { 0.5 * factor as f64 } else { 0.0 };
            let fixed_level = downsample(&smooth(&fixed_f32, sigma)?, factor)?;
            let moving_level = downsample(&smooth(&moving_f32, sigma)?, factor)?;
            let level_region = region.shrink(factor, fixed_level.size());
            Ok(PyramidLevel {
                index,
                shrink_factor: factor,
                sigma,
                fixed: fixed_level,
                moving: moving_level,
                region: level_region,
            })
        };

        #[cfg(feature = "rayon")]
        let built: Vec<VoxRegResult<PyramidLevel>> =
            (0..num_levels).into_par_iter().map(build_level).collect();
        #[cfg(not(feature = "rayon"))]
        let built: Vec<VoxRegResult<PyramidLevel>> = (0..num_levels).map(build_level).collect();

        let levels = built.into_iter().collect::<VoxRegResult<Vec<_>>>()?;
        trace_event!("pyramid_levels", count = levels.len());
        Ok(Self { levels })
    }

    /// Returns all levels, coarsest first.
    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    /// Returns the level at `index`.
    pub fn level(&self, index: usize) -> Option<&PyramidLevel> {
        self.levels.get(index)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

/// Shrink factor of level `index` in a `num_levels` pyramid.
pub fn shrink_factor(index: usize, num_levels: usize) -> VoxRegResult<usize> {
    let exponent = num_levels
        .checked_sub(1 + index)
        .ok_or(VoxRegError::InvalidConfiguration("pyramid level index out of range"))?;
    u32::try_from(exponent)
        .ok()
        .and_then(|e| 1usize.checked_shl(e))
        .filter(|f| *f > 0)
        .ok_or(VoxRegError::InvalidConfiguration("too many pyramid levels"))
}

/// Voxel counts of a level shrunk by `factor`.
pub fn level_size(size: [usize; 3], factor: usize) -> [usize; 3] {
    [
        size[0].div_ceil(factor),
        size[1].div_ceil(factor),
        size[2].div_ceil(factor),
    ]
}

fn check_resolution(size: [usize; 3], factor: usize) -> VoxRegResult<()> {
    let shrunk = level_size(size, factor);
    for (axis, &n) in shrunk.iter().enumerate() {
        if n < MIN_LEVEL_SIZE {
            return Err(VoxRegError::InsufficientResolution {
                axis,
                size: n,
                min: MIN_LEVEL_SIZE,
            });
        }
    }
    Ok(())
}

fn downsample(src: &Volume<f32>, factor: usize) -> VoxRegResult<Volume<f32>> {
    if factor == 1 {
        return Ok(src.clone());
    }
    let view = src.view();
    let mut geometry = src.geometry();
    for spacing in &mut geometry.spacing {
        *spacing *= factor as f64;
    }
    let size = level_size(src.size(), factor);
    let data = view.as_slice();
    Volume::from_fn(size, geometry, |x, y, z| {
        data[view.offset(x * factor, y * factor, z * factor)]
    })
}

#[cfg(test)]
mod tests {
    use super::{level_size, shrink_factor, ImagePyramid};
    use crate::image::{Region, Volume, VolumeView};
    use crate::util::VoxRegError;

    #[test]
    fn shrink_factors_are_powers_of_two_coarsest_first() {
        assert_eq!(shrink_factor(0, 3).unwrap(), 4);
        assert_eq!(shrink_factor(1, 3).unwrap(), 2);
        assert_eq!(shrink_factor(2, 3).unwrap(), 1);
        assert!(shrink_factor(3, 3).is_err());
    }

    #[test]
    fn level_size_rounds_up() {
        assert_eq!(level_size([17, 16, 15], 4), [5, 4, 4]);
    }

    #[test]
    fn zero_levels_is_a_configuration_error() {
        let data = vec![0u8; 8 * 8 * 8];
        let view = VolumeView::from_slice(&data, [8, 8, 8]).unwrap();
        let err = ImagePyramid::build(view, view, 0).unwrap_err();
        assert!(matches!(err, VoxRegError::InvalidConfiguration(_)));
    }

    #[test]
    fn region_is_scaled_per_level() {
        let volume = Volume::from_fn([16, 16, 16], Default::default(), |x, _, _| x as u16).unwrap();
        let region = Region {
            start: [4, 4, 4],
            size: [8, 8, 8],
        };
        let pyramid =
            ImagePyramid::build_with_region(volume.view(), volume.view(), 2, Some(region)).unwrap();
        assert_eq!(
            pyramid.level(0).unwrap().region(),
            Region {
                start: [2, 2, 2],
                size: [4, 4, 4],
            }
        );
        assert_eq!(pyramid.level(1).unwrap().region(), region);
    }
}
