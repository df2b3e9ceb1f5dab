//! Gradient-descent optimizer types.
//!
//! The optimizer is decoupled from the metric through [`CostFunction`]: the
//! registration controller wraps a pyramid level, the metric and a transform
//! center into one, and tests can drive the optimizer with analytic
//! functions.

use crate::metric::MetricEvaluation;
use crate::util::{VoxRegError, VoxRegResult};
use std::time::Duration;

mod descent;

pub use descent::RegularStepGradientDescent;

/// Function of a parameter vector with value and gradient.
pub trait CostFunction {
    /// Evaluates value and gradient at `parameters`.
    fn evaluate(&self, parameters: &[f64]) -> VoxRegResult<MetricEvaluation>;
}

impl<F> CostFunction for F
where
    F: Fn(&[f64]) -> VoxRegResult<MetricEvaluation>,
{
    fn evaluate(&self, parameters: &[f64]) -> VoxRegResult<MetricEvaluation> {
        self(parameters)
    }
}

/// Bounds and tolerances for [`RegularStepGradientDescent`].
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerConfig {
    /// Initial step length of every run.
    pub max_step_length: f64,
    /// The run converges once the step length falls below this value.
    pub min_step_length: f64,
    /// Hard iteration budget per run.
    pub max_iterations: usize,
    /// The run converges once the scaled gradient norm falls below this value.
    pub gradient_magnitude_tolerance: f64,
    /// Factor applied to the step length after a rejected step.
    pub relaxation_factor: f64,
    /// Per-parameter scales; larger values make a parameter move less.
    /// `None` means all ones.
    pub scales: Option<Vec<f64>>,
    /// Optional wall-clock budget per run.
    pub timeout: Option<Duration>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_step_length: 1.0,
            min_step_length: 1e-3,
            max_iterations: 100,
            gradient_magnitude_tolerance: 1e-4,
            relaxation_factor: 0.5,
            scales: None,
            timeout: None,
        }
    }
}

impl OptimizerConfig {
    /// Checks bounds independently of the parameter count.
    pub fn validate(&self) -> VoxRegResult<()> {
        validate_step_lengths(self.max_step_length, self.min_step_length)?;
        if self.max_iterations == 0 {
            return Err(VoxRegError::InvalidConfiguration(
                "max_iterations must be at least 1",
            ));
        }
        if !self.gradient_magnitude_tolerance.is_finite() || self.gradient_magnitude_tolerance < 0.0
        {
            return Err(VoxRegError::InvalidConfiguration(
                "gradient_magnitude_tolerance must be finite and non-negative",
            ));
        }
        if !(self.relaxation_factor > 0.0 && self.relaxation_factor < 1.0) {
            return Err(VoxRegError::InvalidConfiguration(
                "relaxation_factor must lie in (0, 1)",
            ));
        }
        if let Some(scales) = &self.scales {
            if scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                return Err(VoxRegError::InvalidConfiguration(
                    "optimizer scales must be finite and positive",
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn scale(&self, index: usize) -> f64 {
        self.scales
            .as_ref()
            .and_then(|scales| scales.get(index).copied())
            .unwrap_or(1.0)
    }
}

pub(crate) fn validate_step_lengths(
    max_step_length: f64,
    min_step_length: f64,
) -> VoxRegResult<()> {
    if !max_step_length.is_finite() || !min_step_length.is_finite() {
        return Err(VoxRegError::InvalidConfiguration(
            "step lengths must be finite",
        ));
    }
    if min_step_length <= 0.0 || min_step_length > max_step_length {
        return Err(VoxRegError::InvalidConfiguration(
            "step lengths must satisfy 0 < min_step_length <= max_step_length",
        ));
    }
    Ok(())
}

/// Why a run converged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopCondition {
    /// Step length dropped below the minimum.
    StepTooSmall,
    /// Scaled gradient norm dropped below the tolerance.
    GradientTolerance,
    /// Iteration budget exhausted.
    MaximumIterations,
    /// Wall-clock budget exhausted.
    TimedOut,
}

impl StopCondition {
    /// True for budget-driven stops that did not meet a convergence test.
    pub fn is_partial(self) -> bool {
        matches!(self, Self::MaximumIterations | Self::TimedOut)
    }
}

/// Why a run failed.
#[derive(Clone, Debug, PartialEq)]
pub enum FailureReason {
    /// The metric could not be evaluated at the current parameters.
    NoOverlap,
    /// Value or gradient at the current parameters is not finite.
    NumericalError(&'static str),
    /// Any other evaluation error.
    Evaluation(VoxRegError),
}

/// Optimizer state machine: `Idle → Running → {Converged, Failed}`.
#[derive(Clone, Debug, PartialEq)]
pub enum OptimizerStatus {
    Idle,
    Running,
    Converged(StopCondition),
    Failed(FailureReason),
}

impl OptimizerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged(_) | Self::Failed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// True when the run stopped on a budget rather than a convergence test.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Converged(stop) if stop.is_partial())
    }
}

/// Summary of one completed optimizer iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationReport {
    /// One-based iteration index.
    pub iteration: usize,
    /// Best value seen so far.
    pub value: f64,
    /// Step length after this iteration.
    pub step_length: f64,
    /// Whether the candidate step was accepted.
    pub accepted: bool,
    /// Best parameters seen so far.
    pub parameters: Vec<f64>,
}
