//! Volume views, geometry and pyramid utilities.
//!
//! `VolumeView` is a borrowed 3D view into a contiguous 1D buffer laid out
//! x-fastest, then y, then z. Every view carries a [`Geometry`] that maps
//! voxel indices to physical points: `origin + index * spacing` per axis.
//! Direction cosines are always the identity.

use crate::util::{VoxRegError, VoxRegResult};
use num_traits::{Bounded, NumCast, ToPrimitive};

pub(crate) mod gaussian;
#[cfg(feature = "image-io")]
pub mod io;
pub mod pyramid;

/// Scalar voxel types the registration core accepts.
///
/// Intensities are read as `f64`; writing back rounds and saturates for
/// integer types.
pub trait Voxel: Copy + Send + Sync + 'static {
    /// Converts the voxel to `f64`.
    fn to_f64(self) -> f64;
    /// Converts an `f64` intensity back to the voxel type.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_voxel_int {
    ($($t:ty),+) => {
        $(
            impl Voxel for $t {
                #[inline]
                fn to_f64(self) -> f64 {
                    ToPrimitive::to_f64(&self).unwrap_or(0.0)
                }

                #[inline]
                fn from_f64(value: f64) -> Self {
                    if value.is_nan() {
                        return 0;
                    }
                    let lo = <$t as Bounded>::min_value() as f64;
                    let hi = <$t as Bounded>::max_value() as f64;
                    <$t as NumCast>::from(value.round().clamp(lo, hi)).unwrap_or(0)
                }
            }
        )+
    };
}

impl_voxel_int!(u8, u16, u32, i8, i16, i32);

impl Voxel for f32 {
    #[inline]
    fn to_f64(self) -> f64 {
        <f64 as From<f32>>::from(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Voxel for f64 {
    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Physical placement of a voxel grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry {
    /// Physical position of voxel `(0, 0, 0)`.
    pub origin: [f64; 3],
    /// Physical distance between neighbouring voxels along each axis.
    pub spacing: [f64; 3],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            spacing: [1.0; 3],
        }
    }
}

impl Geometry {
    /// Creates a geometry after validating origin and spacing.
    pub fn new(origin: [f64; 3], spacing: [f64; 3]) -> VoxRegResult<Self> {
        let geometry = Self { origin, spacing };
        geometry.validate()?;
        Ok(geometry)
    }

    pub(crate) fn validate(&self) -> VoxRegResult<()> {
        if self.origin.iter().any(|v| !v.is_finite()) {
            return Err(VoxRegError::InvalidGeometry {
                reason: "origin must be finite",
            });
        }
        if self.spacing.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(VoxRegError::InvalidGeometry {
                reason: "spacing must be finite and positive",
            });
        }
        Ok(())
    }

    /// Maps a (possibly fractional) voxel index to a physical point.
    #[inline]
    pub fn index_to_physical(&self, index: [f64; 3]) -> [f64; 3] {
        [
            self.origin[0] + index[0] * self.spacing[0],
            self.origin[1] + index[1] * self.spacing[1],
            self.origin[2] + index[2] * self.spacing[2],
        ]
    }

    /// Maps a physical point to a continuous voxel index.
    #[inline]
    pub fn physical_to_index(&self, point: [f64; 3]) -> [f64; 3] {
        [
            (point[0] - self.origin[0]) / self.spacing[0],
            (point[1] - self.origin[1]) / self.spacing[1],
            (point[2] - self.origin[2]) / self.spacing[2],
        ]
    }

    /// Physical center of a grid with `size` voxels per axis.
    pub fn center(&self, size: [usize; 3]) -> [f64; 3] {
        self.index_to_physical([
            (size[0] as f64 - 1.0) * 0.5,
            (size[1] as f64 - 1.0) * 0.5,
            (size[2] as f64 - 1.0) * 0.5,
        ])
    }
}

/// Box of voxels given by a start index and a size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub start: [usize; 3],
    pub size: [usize; 3],
}

impl Region {
    /// Region covering a whole volume.
    pub fn full(size: [usize; 3]) -> Self {
        Self {
            start: [0; 3],
            size,
        }
    }

    /// Exclusive end index per axis.
    pub fn end(&self) -> [usize; 3] {
        [
            self.start[0] + self.size[0],
            self.start[1] + self.size[1],
            self.start[2] + self.size[2],
        ]
    }

    /// Number of voxels in the region.
    pub fn len(&self) -> usize {
        self.size.iter().product()
    }

    /// Returns true when the region holds no voxel.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that the region is non-empty and lies inside `volume`.
    pub fn validate(&self, volume: [usize; 3]) -> VoxRegResult<()> {
        let out_of_bounds = (0..3).any(|axis| {
            self.size[axis] == 0
                || self.start[axis]
                    .checked_add(self.size[axis])
                    .map_or(true, |end| end > volume[axis])
        });
        if out_of_bounds {
            return Err(VoxRegError::RegionOutOfBounds {
                start: self.start,
                size: self.size,
                volume,
            });
        }
        Ok(())
    }

    /// Maps a full-resolution region onto a grid shrunk by `factor`.
    ///
    /// The result covers `[start / factor, ceil(end / factor))`, clipped to
    /// `level_size`.
    pub(crate) fn shrink(&self, factor: usize, level_size: [usize; 3]) -> Self {
        let mut start = [0usize; 3];
        let mut size = [0usize; 3];
        let end = self.end();
        for axis in 0..3 {
            let s = (self.start[axis] / factor).min(level_size[axis].saturating_sub(1));
            let e = end[axis].div_ceil(factor).min(level_size[axis]).max(s + 1);
            start[axis] = s;
            size[axis] = e - s;
        }
        Self { start, size }
    }
}

/// Borrowed 3D volume view with geometry.
#[derive(Copy, Clone)]
pub struct VolumeView<'a, T> {
    data: &'a [T],
    size: [usize; 3],
    geometry: Geometry,
}

impl<'a, T> VolumeView<'a, T> {
    /// Creates a view with unit spacing and zero origin.
    pub fn from_slice(data: &'a [T], size: [usize; 3]) -> VoxRegResult<Self> {
        Self::new(data, size, Geometry::default())
    }

    /// Creates a view with explicit geometry.
    pub fn new(data: &'a [T], size: [usize; 3], geometry: Geometry) -> VoxRegResult<Self> {
        let needed = required_len(size)?;
        if data.len() < needed {
            return Err(VoxRegError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        geometry.validate()?;
        Ok(Self {
            data: &data[..needed],
            size,
            geometry,
        })
    }

    /// Returns the voxel count per axis `[nx, ny, nz]`.
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// Returns the physical geometry.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Returns the backing slice.
    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }

    /// Linear index of voxel `(x, y, z)`; callers guarantee bounds.
    #[inline]
    pub(crate) fn offset(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.size[1] + y) * self.size[0] + x
    }

    /// Returns the voxel at `(x, y, z)` if it is within bounds.
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<&'a T> {
        if x >= self.size[0] || y >= self.size[1] || z >= self.size[2] {
            return None;
        }
        self.data.get(self.offset(x, y, z))
    }

    /// Returns the contiguous x-row at `(y, z)`.
    pub fn row(&self, y: usize, z: usize) -> Option<&'a [T]> {
        if y >= self.size[1] || z >= self.size[2] {
            return None;
        }
        let start = self.offset(0, y, z);
        self.data.get(start..start + self.size[0])
    }
}

impl<T: Voxel> VolumeView<'_, T> {
    /// Converts the voxels to an owned `f32` volume with the same geometry.
    pub fn to_f32(&self) -> Volume<f32> {
        Volume {
            data: self.data.iter().map(|v| v.to_f64() as f32).collect(),
            size: self.size,
            geometry: self.geometry,
        }
    }
}

/// Owned contiguous volume buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume<T> {
    data: Vec<T>,
    size: [usize; 3],
    geometry: Geometry,
}

impl<T> Volume<T> {
    /// Wraps a buffer whose length must equal `nx * ny * nz`.
    pub fn new(data: Vec<T>, size: [usize; 3], geometry: Geometry) -> VoxRegResult<Self> {
        let needed = required_len(size)?;
        if data.len() < needed {
            return Err(VoxRegError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        if data.len() > needed {
            return Err(VoxRegError::InvalidDimensions { size });
        }
        geometry.validate()?;
        Ok(Self {
            data,
            size,
            geometry,
        })
    }

    /// Builds a volume by evaluating `f(x, y, z)` for every voxel.
    pub fn from_fn<F>(size: [usize; 3], geometry: Geometry, mut f: F) -> VoxRegResult<Self>
    where
        F: FnMut(usize, usize, usize) -> T,
    {
        let needed = required_len(size)?;
        let mut data = Vec::with_capacity(needed);
        for z in 0..size[2] {
            for y in 0..size[1] {
                for x in 0..size[0] {
                    data.push(f(x, y, z));
                }
            }
        }
        Self::new(data, size, geometry)
    }

    /// Returns a borrowed view of the volume.
    pub fn view(&self) -> VolumeView<'_, T> {
        VolumeView {
            data: &self.data,
            size: self.size,
            geometry: self.geometry,
        }
    }

    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

pub(crate) fn required_len(size: [usize; 3]) -> VoxRegResult<usize> {
    if size.iter().any(|&n| n == 0) {
        return Err(VoxRegError::InvalidDimensions { size });
    }
    size[0]
        .checked_mul(size[1])
        .and_then(|v| v.checked_mul(size[2]))
        .ok_or(VoxRegError::InvalidDimensions { size })
}

#[cfg(test)]
mod tests {
    use super::{Geometry, Region, Voxel};

    #[test]
    fn integer_voxels_round_and_saturate() {
        assert_eq!(<u8 as Voxel>::from_f64(254.6), 255);
        assert_eq!(<u8 as Voxel>::from_f64(300.0), 255);
        assert_eq!(<u8 as Voxel>::from_f64(-4.0), 0);
        assert_eq!(<i16 as Voxel>::from_f64(-1.4), -1);
        assert_eq!(<u32 as Voxel>::from_f64(f64::NAN), 0);
    }

    #[test]
    fn float_voxels_convert_without_rounding() {
        assert_eq!(Voxel::to_f64(0.25f32), 0.25);
        assert_eq!(<f32 as Voxel>::from_f64(-1.5), -1.5);
        assert_eq!(Voxel::to_f64(-3.75f64), -3.75);
    }

    #[test]
    fn geometry_maps_index_and_back() {
        let geometry = Geometry::new([1.0, -2.0, 0.5], [0.5, 2.0, 1.0]).unwrap();
        let p = geometry.index_to_physical([2.0, 3.0, 4.0]);
        assert_eq!(p, [2.0, 4.0, 4.5]);
        assert_eq!(geometry.physical_to_index(p), [2.0, 3.0, 4.0]);
        assert!(Geometry::new([0.0; 3], [1.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn region_shrink_rounds_end_up() {
        let region = Region {
            start: [3, 0, 5],
            size: [10, 16, 3],
        };
        let shrunk = region.shrink(4, [4, 4, 4]);
        assert_eq!(shrunk.start, [0, 0, 1]);
        assert_eq!(shrunk.size, [4, 4, 1]);
    }
}
