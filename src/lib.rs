//! voxreg is a CPU-first library for multi-resolution affine registration of
//! 3D volumes.
//!
//! The moving volume is aligned to the fixed volume by minimizing the mean
//! squared intensity difference with regular-step gradient descent over a
//! Gaussian pyramid, coarsest level first. Metric evaluation can run in
//! parallel via the `rayon` feature, progress is reported through the
//! `tracing` feature and PNG/TIFF slice stacks are read and written with the
//! `image-io` feature.
//!
//! ```no_run
//! use voxreg::{Geometry, Registration, RegistrationConfig, Volume};
//!
//! # fn main() -> voxreg::VoxRegResult<()> {
//! let fixed = Volume::from_fn([32, 32, 32], Geometry::default(), |x, y, z| {
//!     ((x + y + z) % 17) as u16
//! })?;
//! let moving = fixed.clone();
//! let outcome = Registration::new(RegistrationConfig::default())
//!     .run(fixed.view(), moving.view())?;
//! let transform = outcome.final_transform()?;
//! # let _ = transform;
//! # Ok(())
//! # }
//! ```

pub mod image;
pub mod interpolate;
pub mod metric;
pub mod optimizer;
pub mod registration;
pub mod resample;
mod trace;
pub mod transform;
pub mod util;

pub use image::pyramid::{ImagePyramid, PyramidLevel};
pub use image::{Geometry, Region, Volume, VolumeView, Voxel};
pub use interpolate::LinearInterpolator;
pub use metric::{MeanSquares, MetricEvaluation};
pub use optimizer::{
    CostFunction, FailureReason, IterationReport, OptimizerConfig, OptimizerStatus,
    RegularStepGradientDescent, StopCondition,
};
pub use registration::{
    IterationEvent, LevelCompletedEvent, LevelControl, LevelRecord, LevelTransitionEvent,
    LoggingObserver, Registration, RegistrationConfig, RegistrationObserver, RegistrationOutcome,
    SessionState, StepLengthSchedule,
};
pub use resample::resample;
pub use transform::initializer::InitializerStrategy;
pub use transform::{AffineTransform, AFFINE_DOF};
pub use util::{VoxRegError, VoxRegResult};
