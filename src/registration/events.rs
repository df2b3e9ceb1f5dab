//! Typed registration events and observers.
//!
//! Observers receive plain event payloads; the only way an observer can
//! influence a run is through [`LevelControl`] at the start of a level,
//! before the optimizer leaves `Idle`.

use crate::optimizer::{OptimizerStatus, RegularStepGradientDescent};
use crate::trace::{trace_event, trace_warn};
use crate::util::{VoxRegError, VoxRegResult};

/// Sent before the optimizer of a level starts.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelTransitionEvent {
    /// Level index, 0 being the coarsest.
    pub level: usize,
    /// Total number of levels in the run.
    pub levels: usize,
    /// Downsampling factor of this level.
    pub shrink_factor: usize,
    /// Parameters the level starts from.
    pub initial_parameters: Vec<f64>,
}

/// Sent after every completed optimizer iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationEvent {
    pub level: usize,
    /// One-based iteration index within the level.
    pub iteration: usize,
    /// Best metric value seen so far in this level.
    pub value: f64,
    pub step_length: f64,
    pub accepted: bool,
    /// Best parameters seen so far in this level.
    pub parameters: Vec<f64>,
}

/// Sent once the optimizer of a level reached a terminal state.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelCompletedEvent {
    pub level: usize,
    pub status: OptimizerStatus,
    pub iterations: usize,
    /// Best value of the level, if any evaluation succeeded.
    pub value: Option<f64>,
    /// Parameters carried to the next level.
    pub parameters: Vec<f64>,
}

/// Restricted handle on a level's idle optimizer.
pub struct LevelControl<'a> {
    optimizer: &'a mut RegularStepGradientDescent,
}

impl<'a> LevelControl<'a> {
    pub(crate) fn new(optimizer: &'a mut RegularStepGradientDescent) -> Self {
        Self { optimizer }
    }

    pub fn maximum_step_length(&self) -> f64 {
        self.optimizer.maximum_step_length()
    }

    pub fn minimum_step_length(&self) -> f64 {
        self.optimizer.config().min_step_length
    }

    /// Sets the initial step length of the level about to run.
    pub fn set_maximum_step_length(&mut self, max_step_length: f64) -> VoxRegResult<()> {
        self.optimizer.set_maximum_step_length(max_step_length)
    }
}

/// Callbacks invoked at level and iteration boundaries.
///
/// All methods default to no-ops.
pub trait RegistrationObserver {
    fn on_level_start(&mut self, _event: &LevelTransitionEvent, _control: &mut LevelControl<'_>) {}

    fn on_iteration(&mut self, _event: &IterationEvent) {}

    fn on_level_end(&mut self, _event: &LevelCompletedEvent) {}
}

/// Table mapping a pyramid level to the optimizer's maximum step length.
///
/// Levels past the end of the table reuse its last entry; an empty table
/// leaves the optimizer configuration unchanged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepLengthSchedule {
    steps: Vec<f64>,
}

impl StepLengthSchedule {
    pub fn new(steps: Vec<f64>) -> Self {
        Self { steps }
    }

    /// Observed tuning of the affine slice-stack tool: the smallest step at
    /// the coarsest level, growing towards full resolution.
    pub fn observed() -> Self {
        Self::new(vec![0.00125, 0.125 / 2.0, 0.25 / 2.0])
    }

    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Maximum step length for `level`, if the table is not empty.
    pub fn step_for(&self, level: usize) -> Option<f64> {
        self.steps
            .get(level)
            .or_else(|| self.steps.last())
            .copied()
    }

    /// Checks every entry against the optimizer's minimum step length.
    pub fn validate(&self, min_step_length: f64) -> VoxRegResult<()> {
        if self
            .steps
            .iter()
            .any(|s| !s.is_finite() || *s < min_step_length)
        {
            return Err(VoxRegError::InvalidConfiguration(
                "step schedule entries must be finite and at least min_step_length",
            ));
        }
        Ok(())
    }

    pub(crate) fn apply(&self, level: usize, control: &mut LevelControl<'_>) -> VoxRegResult<()> {
        match self.step_for(level) {
            Some(step) => control.set_maximum_step_length(step),
            None => Ok(()),
        }
    }
}

impl RegistrationObserver for StepLengthSchedule {
    fn on_level_start(&mut self, event: &LevelTransitionEvent, control: &mut LevelControl<'_>) {
        if let Err(err) = self.apply(event.level, control) {
            trace_warn!(
                "step_schedule_rejected",
                level = event.level,
                reason = err.to_string().as_str(),
            );
        }
    }
}

/// Observer that reports progress through `tracing` (when enabled).
#[derive(Clone, Copy, Debug)]
pub struct LoggingObserver {
    /// Emit one event every `interval` iterations; 0 disables iteration logs.
    pub interval: usize,
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self { interval: 1 }
    }
}

impl RegistrationObserver for LoggingObserver {
    fn on_level_start(&mut self, event: &LevelTransitionEvent, control: &mut LevelControl<'_>) {
        trace_event!(
            "level_start",
            level = event.level,
            shrink_factor = event.shrink_factor,
            max_step_length = control.maximum_step_length(),
        );
    }

    fn on_iteration(&mut self, event: &IterationEvent) {
        if self.interval > 0 && event.iteration % self.interval == 0 {
            trace_event!(
                "iteration",
                level = event.level,
                iteration = event.iteration,
                value = event.value,
                step_length = event.step_length,
            );
        }
    }

    fn on_level_end(&mut self, event: &LevelCompletedEvent) {
        trace_event!(
            "level_end",
            level = event.level,
            iterations = event.iterations,
            failed = event.status.is_failed(),
            partial = event.status.is_partial(),
        );
    }
}
