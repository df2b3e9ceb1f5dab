//! Loading and saving volumes as stacks of 2D slice images.
//!
//! Available when the `image-io` feature is enabled. A volume is stored as a
//! directory holding one image per z-slice; files are ordered by name.
//! Colour inputs are converted to 16-bit luminance.

use crate::image::{Geometry, Volume, VolumeView, Voxel};
use crate::util::{VoxRegError, VoxRegResult};
use std::fs;
use std::path::{Path, PathBuf};

const SLICE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "tif", "tiff"];

fn io_err(err: impl std::fmt::Display) -> VoxRegError {
    VoxRegError::ImageIo {
        reason: err.to_string(),
    }
}

/// Lists slice files in `dir`, sorted by file name.
pub fn slice_paths<P: AsRef<Path>>(dir: P) -> VoxRegResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir.as_ref()).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_slice = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| SLICE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_slice {
            paths.push(path);
        }
    }
    paths.sort();
    if paths.is_empty() {
        return Err(VoxRegError::ImageIo {
            reason: format!("no slice images found in {}", dir.as_ref().display()),
        });
    }
    Ok(paths)
}

/// Loads a directory of slices into a 16-bit volume with the given geometry.
pub fn load_volume_slices<P: AsRef<Path>>(
    dir: P,
    geometry: Geometry,
) -> VoxRegResult<Volume<u16>> {
    let paths = slice_paths(dir)?;
    let mut data = Vec::new();
    let mut plane: Option<(usize, usize)> = None;
    for path in &paths {
        let slice = image::open(path).map_err(io_err)?.to_luma16();
        let dims = (slice.width() as usize, slice.height() as usize);
        match plane {
            None => plane = Some(dims),
            Some(expected) if expected != dims => {
                return Err(VoxRegError::ImageIo {
                    reason: format!(
                        "slice {} is {}x{}, expected {}x{}",
                        path.display(),
                        dims.0,
                        dims.1,
                        expected.0,
                        expected.1
                    ),
                });
            }
            Some(_) => {}
        }
        data.extend_from_slice(slice.as_raw());
    }
    let (width, height) = plane.unwrap_or((0, 0));
    Volume::new(data, [width, height, paths.len()], geometry)
}

/// Writes each z-slice of `volume` as a 16-bit PNG `slice_NNNN.png` in `dir`.
///
/// Intensities are rounded and saturated to the `u16` range.
pub fn save_volume_slices<T: Voxel, P: AsRef<Path>>(
    volume: VolumeView<'_, T>,
    dir: P,
) -> VoxRegResult<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(io_err)?;
    let [nx, ny, nz] = volume.size();
    let width = u32::try_from(nx).map_err(io_err)?;
    let height = u32::try_from(ny).map_err(io_err)?;
    for z in 0..nz {
        let mut pixels = Vec::with_capacity(nx * ny);
        for y in 0..ny {
            let row = volume.row(y, z).ok_or(VoxRegError::InvalidDimensions {
                size: volume.size(),
            })?;
            pixels.extend(row.iter().map(|v| <u16 as Voxel>::from_f64(v.to_f64())));
        }
        let slice =
            image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_raw(width, height, pixels)
                .ok_or(VoxRegError::BufferTooSmall {
                    needed: nx * ny,
                    got: 0,
                })?;
        slice
            .save(dir.join(format!("slice_{z:04}.png")))
            .map_err(io_err)?;
    }
    Ok(())
}
