//! Resampling a moving volume onto a reference grid.
//!
//! Every output voxel's physical point is mapped through the transform and
//! the moving volume is sampled with [`LinearInterpolator`]. Points outside
//! the moving volume receive the fill value. Intensities are rounded and
//! saturated back to the voxel type.

use crate::image::{required_len, Geometry, Volume, VolumeView, Voxel};
use crate::interpolate::LinearInterpolator;
use crate::trace::trace_span;
use crate::transform::AffineTransform;
use crate::util::VoxRegResult;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Resamples `moving` on the grid described by `reference` and `size`.
pub fn resample<T: Voxel>(
    moving: VolumeView<'_, T>,
    transform: &AffineTransform,
    reference: Geometry,
    size: [usize; 3],
    fill_value: T,
) -> VoxRegResult<Volume<T>> {
    let _span = trace_span!("resample", nx = size[0], ny = size[1], nz = size[2]).entered();
    let len = required_len(size)?;
    reference.validate()?;
    let mut output = vec![fill_value; len];

    let slice_len = size[0] * size[1];

    #[cfg(feature = "rayon")]
    output
        .par_chunks_mut(slice_len)
        .enumerate()
        .for_each(|(z, slice)| resample_slice(moving, transform, reference, size, z, slice));

    #[cfg(not(feature = "rayon"))]
    output
        .chunks_mut(slice_len)
        .enumerate()
        .for_each(|(z, slice)| resample_slice(moving, transform, reference, size, z, slice));

    Volume::new(output, size, reference)
}

fn resample_slice<T: Voxel>(
    moving: VolumeView<'_, T>,
    transform: &AffineTransform,
    reference: Geometry,
    size: [usize; 3],
    z: usize,
    slice: &mut [T],
) {
    let moving_geometry = moving.geometry();
    for y in 0..size[1] {
        let row = &mut slice[y * size[0]..(y + 1) * size[0]];
        for (x, out) in row.iter_mut().enumerate() {
            let point = reference.index_to_physical([x as f64, y as f64, z as f64]);
            let index = moving_geometry.physical_to_index(transform.apply(point));
            if let Some(value) = LinearInterpolator::sample(&moving, index) {
                *out = T::from_f64(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::resample;
    use crate::image::{Geometry, Volume};
    use crate::transform::AffineTransform;

    fn ramp() -> Volume<u16> {
        Volume::from_fn([6, 5, 4], Geometry::default(), |x, y, z| {
            (x * 100 + y * 10 + z) as u16
        })
        .unwrap()
    }

    #[test]
    fn identity_reproduces_input() {
        let moving = ramp();
        let out = resample(
            moving.view(),
            &AffineTransform::identity([2.5, 2.0, 1.5]),
            moving.geometry(),
            moving.size(),
            0,
        )
        .unwrap();
        assert_eq!(out, moving);
    }

    #[test]
    fn shifted_samples_use_fill_value_outside() {
        let moving = ramp();
        let mut transform = AffineTransform::identity([0.0; 3]);
        transform.set_translation([1.0, 0.0, 0.0]);
        let out = resample(
            moving.view(),
            &transform,
            moving.geometry(),
            moving.size(),
            9999,
        )
        .unwrap();
        let view = out.view();
        assert_eq!(*view.get(0, 2, 1).unwrap(), 100 + 20 + 1);
        assert_eq!(*view.get(5, 2, 1).unwrap(), 9999);
    }

    #[test]
    fn half_voxel_shift_rounds_back_to_integers() {
        let moving = ramp();
        let mut transform = AffineTransform::identity([0.0; 3]);
        transform.set_translation([0.5, 0.0, 0.0]);
        let out = resample(
            moving.view(),
            &transform,
            moving.geometry(),
            moving.size(),
            0,
        )
        .unwrap();
        assert_eq!(*out.view().get(1, 0, 0).unwrap(), 150);
    }

    #[test]
    fn empty_output_grid_is_rejected() {
        let moving = ramp();
        assert!(resample(
            moving.view(),
            &AffineTransform::default(),
            Geometry::default(),
            [0, 4, 4],
            0,
        )
        .is_err());
    }
}
