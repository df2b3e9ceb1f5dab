//! Starting transforms from volume geometry or intensity moments.
//!
//! Both strategies set the transform center to the fixed volume's reference
//! point and the translation to `moving − fixed`, leaving the linear part as
//! the caller supplied it.

use crate::image::{VolumeView, Voxel};
use crate::trace::trace_event;
use crate::transform::AffineTransform;
use crate::util::{VoxRegError, VoxRegResult};

/// How the starting center and translation are computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InitializerStrategy {
    /// Leave the transform untouched.
    None,
    /// Align the geometric centers of the two grids.
    GeometricCenters,
    /// Align the intensity-weighted centroids.
    #[default]
    IntensityMoments,
}

/// Seeds center and translation of `transform` for registering `moving`
/// onto `fixed`.
pub fn initialize<F: Voxel, M: Voxel>(
    strategy: InitializerStrategy,
    fixed: VolumeView<'_, F>,
    moving: VolumeView<'_, M>,
    transform: &mut AffineTransform,
) -> VoxRegResult<()> {
    let (fixed_center, moving_center) = match strategy {
        InitializerStrategy::None => return Ok(()),
        InitializerStrategy::GeometricCenters => (
            fixed.geometry().center(fixed.size()),
            moving.geometry().center(moving.size()),
        ),
        InitializerStrategy::IntensityMoments => (centroid(fixed)?, centroid(moving)?),
    };

    transform.set_center(fixed_center);
    transform.set_translation([
        moving_center[0] - fixed_center[0],
        moving_center[1] - fixed_center[1],
        moving_center[2] - fixed_center[2],
    ]);
    trace_event!(
        "transform_initialized",
        tx = transform.translation()[0],
        ty = transform.translation()[1],
        tz = transform.translation()[2],
    );
    Ok(())
}

/// Intensity-weighted centroid in physical coordinates.
pub fn centroid<T: Voxel>(view: VolumeView<'_, T>) -> VoxRegResult<[f64; 3]> {
    let [nx, ny, nz] = view.size();
    let data = view.as_slice();
    let mut mass = 0.0f64;
    let mut moment = [0.0f64; 3];
    for z in 0..nz {
        for y in 0..ny {
            let row = &data[(z * ny + y) * nx..(z * ny + y + 1) * nx];
            for (x, voxel) in row.iter().enumerate() {
                let w = voxel.to_f64();
                if w == 0.0 {
                    continue;
                }
                mass += w;
                moment[0] += w * x as f64;
                moment[1] += w * y as f64;
                moment[2] += w * z as f64;
            }
        }
    }
    if !mass.is_finite() || mass == 0.0 {
        return Err(VoxRegError::DegenerateImage(
            "total intensity is zero, centroid undefined",
        ));
    }
    Ok(view
        .geometry()
        .index_to_physical([moment[0] / mass, moment[1] / mass, moment[2] / mass]))
}
