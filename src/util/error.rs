//! Error types for voxreg.

use thiserror::Error;

/// Result alias for voxreg operations.
pub type Result<T> = std::result::Result<T, VoxRegError>;

/// Errors that can occur when building inputs or running a registration.
///
/// Numerical trouble inside a single optimizer run is not an error; it is
/// reported through [`crate::OptimizerStatus::Failed`] so the controller can
/// continue with the last good parameters.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum VoxRegError {
    /// A volume dimension is zero or the element count overflows.
    #[error("invalid dimensions: {size:?}")]
    InvalidDimensions { size: [usize; 3] },
    /// The backing buffer does not hold enough voxels.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// Origin or spacing is not usable (non-finite or non-positive spacing).
    #[error("invalid geometry: {reason}")]
    InvalidGeometry { reason: &'static str },
    /// A sampling region does not fit inside the volume.
    #[error("region start {start:?} size {size:?} exceeds volume {volume:?}")]
    RegionOutOfBounds {
        start: [usize; 3],
        size: [usize; 3],
        volume: [usize; 3],
    },
    /// A parameter vector has the wrong length.
    #[error("dimension mismatch: expected {expected} parameters, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Level count, optimizer bounds or schedule are invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// The coarsest pyramid level would be too small along an axis.
    #[error("insufficient resolution: axis {axis} has {size} voxels at the coarsest level, need {min}")]
    InsufficientResolution { axis: usize, size: usize, min: usize },
    /// The volume carries no usable intensity mass.
    #[error("degenerate image: {0}")]
    DegenerateImage(&'static str),
    /// No fixed voxel maps inside the moving volume.
    #[error("no overlap between fixed sampling region and moving volume")]
    NoOverlap,
    /// The linear part of an affine transform cannot be inverted.
    #[error("singular transform: determinant {determinant}")]
    SingularTransform { determinant: f64 },
    /// Image decoding or encoding failed.
    #[error("image I/O error: {reason}")]
    ImageIo { reason: String },
}
