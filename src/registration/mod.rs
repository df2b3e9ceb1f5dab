//! Coarse-to-fine registration controller.
//!
//! A [`Registration`] builds the pyramid, seeds the transform with the
//! configured initializer and then runs one fresh optimizer per level,
//! coarsest first. Each level starts from the previous level's best
//! parameters. A level whose optimizer ends in `Failed` is recorded and
//! skipped: the next level starts from the last good parameters instead of
//! aborting the run. Only invalid configuration and unusable inputs are
//! returned as errors.

use crate::image::pyramid::{ImagePyramid, PyramidLevel};
use crate::image::{Region, VolumeView, Voxel};
use crate::metric::{MeanSquares, MetricEvaluation};
use crate::optimizer::{CostFunction, OptimizerConfig, OptimizerStatus, RegularStepGradientDescent};
use crate::trace::{trace_event, trace_span, trace_warn};
use crate::transform::initializer::{initialize, InitializerStrategy};
use crate::transform::{AffineTransform, AFFINE_DOF};
use crate::util::{VoxRegError, VoxRegResult};

pub mod events;

pub use events::{
    IterationEvent, LevelCompletedEvent, LevelControl, LevelTransitionEvent, LoggingObserver,
    RegistrationObserver, StepLengthSchedule,
};

/// Configuration of a registration run.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationConfig {
    /// Number of pyramid levels (at least 1).
    pub levels: usize,
    /// How the level-0 starting transform is computed.
    pub initializer: InitializerStrategy,
    /// Optimizer settings shared by all levels.
    pub optimizer: OptimizerConfig,
    /// Per-level maximum step length, applied before observers run.
    pub step_schedule: StepLengthSchedule,
    /// Full-resolution fixed region the metric samples; `None` for all of it.
    pub fixed_region: Option<Region>,
    /// Evaluate the metric with rayon (requires the `rayon` feature).
    pub parallel: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            initializer: InitializerStrategy::IntensityMoments,
            optimizer: OptimizerConfig::default(),
            step_schedule: StepLengthSchedule::default(),
            fixed_region: None,
            parallel: false,
        }
    }
}

impl RegistrationConfig {
    /// Rejects configurations that cannot run, before any image work.
    pub fn validate(&self) -> VoxRegResult<()> {
        if self.levels < 1 {
            return Err(VoxRegError::InvalidConfiguration(
                "number of pyramid levels must be at least 1",
            ));
        }
        self.optimizer.validate()?;
        if let Some(scales) = &self.optimizer.scales {
            if scales.len() != AFFINE_DOF {
                return Err(VoxRegError::DimensionMismatch {
                    expected: AFFINE_DOF,
                    got: scales.len(),
                });
            }
        }
        self.step_schedule.validate(self.optimizer.min_step_length)
    }
}

/// Controller state: `Initialized → LevelRunning(i) → Completed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    LevelRunning(usize),
    Completed,
}

/// What happened at one pyramid level.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelRecord {
    pub level: usize,
    pub shrink_factor: usize,
    pub status: OptimizerStatus,
    pub iterations: usize,
    /// Best value reached, if any evaluation succeeded.
    pub value: Option<f64>,
    /// Parameters handed to the next level.
    pub parameters: Vec<f64>,
}

/// Result of a registration run.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationOutcome {
    initial: AffineTransform,
    levels: Vec<LevelRecord>,
    final_parameters: Vec<f64>,
}

impl RegistrationOutcome {
    /// Transform produced by the initializer.
    pub fn initial_transform(&self) -> &AffineTransform {
        &self.initial
    }

    /// Per-level history, coarsest first.
    pub fn levels(&self) -> &[LevelRecord] {
        &self.levels
    }

    /// Parameters recorded for the last level.
    pub fn final_parameters(&self) -> &[f64] {
        &self.final_parameters
    }

    /// Center of rotation shared by all levels.
    pub fn center(&self) -> [f64; 3] {
        self.initial.center()
    }

    /// Final parameters combined with the center.
    pub fn final_transform(&self) -> VoxRegResult<AffineTransform> {
        AffineTransform::from_parameters(&self.final_parameters, self.center())
    }

    /// Indices of levels whose optimizer failed.
    pub fn failed_levels(&self) -> Vec<usize> {
        self.levels
            .iter()
            .filter(|record| record.status.is_failed())
            .map(|record| record.level)
            .collect()
    }

    /// True when any level failed or stopped on a budget.
    pub fn is_partial(&self) -> bool {
        self.levels
            .iter()
            .any(|record| record.status.is_failed() || record.status.is_partial())
    }
}

/// Metric of one level as a function of the affine parameters.
struct LevelCost<'a> {
    metric: MeanSquares,
    level: &'a PyramidLevel,
    center: [f64; 3],
}

impl CostFunction for LevelCost<'_> {
    fn evaluate(&self, parameters: &[f64]) -> VoxRegResult<MetricEvaluation> {
        let transform = AffineTransform::from_parameters(parameters, self.center)?;
        self.metric.evaluate(self.level, &transform)
    }
}

/// Multi-resolution affine registration session.
pub struct Registration<'o> {
    config: RegistrationConfig,
    observers: Vec<&'o mut dyn RegistrationObserver>,
    state: SessionState,
}

impl<'o> Registration<'o> {
    pub fn new(config: RegistrationConfig) -> Self {
        Self {
            config,
            observers: Vec::new(),
            state: SessionState::Initialized,
        }
    }

    /// Registers an observer for the lifetime of the session.
    pub fn observe(mut self, observer: &'o mut dyn RegistrationObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Registers `moving` onto `fixed` starting from the identity centered on
    /// the fixed volume.
    pub fn run<F: Voxel, M: Voxel>(
        &mut self,
        fixed: VolumeView<'_, F>,
        moving: VolumeView<'_, M>,
    ) -> VoxRegResult<RegistrationOutcome> {
        let transform = AffineTransform::identity(fixed.geometry().center(fixed.size()));
        self.run_with_transform(fixed, moving, transform)
    }

    /// Registers `moving` onto `fixed`; the initializer adjusts `transform`'s
    /// center and translation before level 0.
    pub fn run_with_transform<F: Voxel, M: Voxel>(
        &mut self,
        fixed: VolumeView<'_, F>,
        moving: VolumeView<'_, M>,
        mut transform: AffineTransform,
    ) -> VoxRegResult<RegistrationOutcome> {
        self.config.validate()?;
        let _span = trace_span!("registration", levels = self.config.levels).entered();

        let pyramid = ImagePyramid::build_with_region(
            fixed,
            moving,
            self.config.levels,
            self.config.fixed_region,
        )?;
        initialize(self.config.initializer, fixed, moving, &mut transform)?;

        let center = transform.center();
        let metric = MeanSquares::new().with_parallel(self.config.parallel);
        let mut seed = transform.parameters();
        let mut records = Vec::with_capacity(pyramid.num_levels());

        for level in pyramid.levels() {
            self.state = SessionState::LevelRunning(level.index());
            let record = self.run_level(level, pyramid.num_levels(), metric, center, &seed)?;
            seed.clone_from(&record.parameters);
            records.push(record);
        }

        self.state = SessionState::Completed;
        trace_event!(
            "registration_done",
            levels = records.len(),
            failed = records.iter().filter(|r| r.status.is_failed()).count(),
        );
        Ok(RegistrationOutcome {
            initial: transform,
            levels: records,
            final_parameters: seed,
        })
    }

    fn run_level(
        &mut self,
        level: &PyramidLevel,
        num_levels: usize,
        metric: MeanSquares,
        center: [f64; 3],
        seed: &[f64],
    ) -> VoxRegResult<LevelRecord> {
        let index = level.index();
        let _span = trace_span!(
            "level",
            level = index,
            shrink_factor = level.shrink_factor()
        )
        .entered();

        let mut optimizer = RegularStepGradientDescent::new(self.config.optimizer.clone())?;
        let transition = LevelTransitionEvent {
            level: index,
            levels: num_levels,
            shrink_factor: level.shrink_factor(),
            initial_parameters: seed.to_vec(),
        };
        self.config
            .step_schedule
            .apply(index, &mut LevelControl::new(&mut optimizer))?;
        for observer in self.observers.iter_mut() {
            observer.on_level_start(&transition, &mut LevelControl::new(&mut optimizer));
        }

        let cost = LevelCost {
            metric,
            level,
            center,
        };
        optimizer.start(seed)?;
        let observers = &mut self.observers;
        let status = optimizer.run(&cost, |report| {
            let event = IterationEvent {
                level: index,
                iteration: report.iteration,
                value: report.value,
                step_length: report.step_length,
                accepted: report.accepted,
                parameters: report.parameters.clone(),
            };
            for observer in observers.iter_mut() {
                observer.on_iteration(&event);
            }
        });

        let parameters = if status.is_failed() {
            trace_warn!(
                "level_failed",
                level = index,
                reason = format!("{status:?}").as_str(),
            );
            seed.to_vec()
        } else {
            optimizer.last_parameters().to_vec()
        };

        let completed = LevelCompletedEvent {
            level: index,
            status: status.clone(),
            iterations: optimizer.current_iteration(),
            value: optimizer.current_value(),
            parameters: parameters.clone(),
        };
        for observer in self.observers.iter_mut() {
            observer.on_level_end(&completed);
        }

        Ok(LevelRecord {
            level: index,
            shrink_factor: level.shrink_factor(),
            status,
            iterations: optimizer.current_iteration(),
            value: optimizer.current_value(),
            parameters,
        })
    }
}
