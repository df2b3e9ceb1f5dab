//! Regular-step gradient descent.
//!
//! Each iteration moves the parameters a fixed step length along the
//! normalized negative (scaled) gradient. A step is accepted only when it
//! lowers the best value seen so far; otherwise the step length is multiplied
//! by the relaxation factor and the same direction is retried on the next
//! iteration. The accepted candidate's evaluation is reused as the next
//! iteration's starting point, so every iteration costs one evaluation.

use crate::metric::MetricEvaluation;
use crate::optimizer::{
    validate_step_lengths, CostFunction, FailureReason, IterationReport, OptimizerConfig,
    OptimizerStatus, StopCondition,
};
use crate::trace::trace_debug;
use crate::util::math::norm;
use crate::util::{VoxRegError, VoxRegResult};
use std::time::Instant;

/// Adaptive-step gradient descent minimizer.
#[derive(Clone, Debug)]
pub struct RegularStepGradientDescent {
    config: OptimizerConfig,
    status: OptimizerStatus,
    parameters: Vec<f64>,
    current: Option<MetricEvaluation>,
    step_length: f64,
    iteration: usize,
    best_value: Option<f64>,
    started: Option<Instant>,
}

impl RegularStepGradientDescent {
    /// Creates an idle optimizer after validating `config`.
    pub fn new(config: OptimizerConfig) -> VoxRegResult<Self> {
        config.validate()?;
        let step_length = config.max_step_length;
        Ok(Self {
            config,
            status: OptimizerStatus::Idle,
            parameters: Vec::new(),
            current: None,
            step_length,
            iteration: 0,
            best_value: None,
            started: None,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn status(&self) -> &OptimizerStatus {
        &self.status
    }

    /// Number of completed iterations.
    pub fn current_iteration(&self) -> usize {
        self.iteration
    }

    /// Best value seen so far, once the first evaluation succeeded.
    pub fn current_value(&self) -> Option<f64> {
        self.best_value
    }

    pub fn current_step_length(&self) -> f64 {
        self.step_length
    }

    pub fn maximum_step_length(&self) -> f64 {
        self.config.max_step_length
    }

    /// Best parameters found; the initial parameters until a step is accepted.
    pub fn last_parameters(&self) -> &[f64] {
        &self.parameters
    }

    /// Changes the initial step length of the next run.
    ///
    /// Only allowed while idle; a running optimizer is never reconfigured.
    pub fn set_maximum_step_length(&mut self, max_step_length: f64) -> VoxRegResult<()> {
        if self.status != OptimizerStatus::Idle {
            return Err(VoxRegError::InvalidConfiguration(
                "maximum step length can only change while the optimizer is idle",
            ));
        }
        validate_step_lengths(max_step_length, self.config.min_step_length)?;
        self.config.max_step_length = max_step_length;
        self.step_length = max_step_length;
        Ok(())
    }

    /// Returns the optimizer to `Idle`, keeping its configuration.
    pub fn reset(&mut self) {
        self.status = OptimizerStatus::Idle;
        self.parameters.clear();
        self.current = None;
        self.step_length = self.config.max_step_length;
        self.iteration = 0;
        self.best_value = None;
        self.started = None;
    }

    /// Moves from `Idle` to `Running` at `initial`.
    pub fn start(&mut self, initial: &[f64]) -> VoxRegResult<()> {
        if self.status != OptimizerStatus::Idle {
            return Err(VoxRegError::InvalidConfiguration(
                "optimizer must be idle to start",
            ));
        }
        if let Some(scales) = &self.config.scales {
            if scales.len() != initial.len() {
                return Err(VoxRegError::DimensionMismatch {
                    expected: initial.len(),
                    got: scales.len(),
                });
            }
        }
        self.parameters = initial.to_vec();
        self.current = None;
        self.step_length = self.config.max_step_length;
        self.iteration = 0;
        self.best_value = None;
        self.started = Some(Instant::now());
        self.status = OptimizerStatus::Running;
        Ok(())
    }

    /// Runs iterations until a terminal state, calling `on_iteration` after
    /// each completed one.
    pub fn run<C, F>(&mut self, cost: &C, mut on_iteration: F) -> OptimizerStatus
    where
        C: CostFunction + ?Sized,
        F: FnMut(&IterationReport),
    {
        while self.status == OptimizerStatus::Running {
            if let Some(report) = self.step(cost) {
                on_iteration(&report);
            }
        }
        self.status.clone()
    }

    /// Performs one iteration.
    ///
    /// Returns a report when an iteration completed; `None` when the
    /// optimizer was not running or stopped before taking a step (failure or
    /// gradient tolerance).
    pub fn step<C: CostFunction + ?Sized>(&mut self, cost: &C) -> Option<IterationReport> {
        if self.status != OptimizerStatus::Running {
            return None;
        }

        let current = match self.current.take() {
            Some(evaluation) => evaluation,
            None => match cost.evaluate(&self.parameters) {
                Ok(evaluation) => evaluation,
                Err(VoxRegError::NoOverlap) => {
                    self.status = OptimizerStatus::Failed(FailureReason::NoOverlap);
                    return None;
                }
                Err(err) => {
                    self.status = OptimizerStatus::Failed(FailureReason::Evaluation(err));
                    return None;
                }
            },
        };
        if !current.value.is_finite() {
            self.status = OptimizerStatus::Failed(FailureReason::NumericalError(
                "metric value is not finite",
            ));
            return None;
        }
        if current.gradient.len() != self.parameters.len()
            || current.gradient.iter().any(|g| !g.is_finite())
        {
            self.status = OptimizerStatus::Failed(FailureReason::NumericalError(
                "metric gradient is not finite",
            ));
            return None;
        }
        let best = *self.best_value.get_or_insert(current.value);

        let scaled: Vec<f64> = current
            .gradient
            .iter()
            .enumerate()
            .map(|(i, g)| g / self.config.scale(i))
            .collect();
        let magnitude = norm(&scaled);
        if magnitude < self.config.gradient_magnitude_tolerance {
            self.current = Some(current);
            self.status = OptimizerStatus::Converged(StopCondition::GradientTolerance);
            return None;
        }

        let candidate: Vec<f64> = self
            .parameters
            .iter()
            .zip(scaled.iter())
            .enumerate()
            .map(|(i, (p, g))| p - self.step_length * (g / magnitude) / self.config.scale(i))
            .collect();

        let accepted = match cost.evaluate(&candidate) {
            Ok(next)
                if next.value.is_finite()
                    && next.value < best
                    && next.gradient.len() == candidate.len()
                    && next.gradient.iter().all(|g| g.is_finite()) =>
            {
                self.best_value = Some(next.value);
                self.parameters = candidate;
                self.current = Some(next);
                true
            }
            // Worse, non-finite or not computable: shrink and retry.
            _ => {
                self.step_length *= self.config.relaxation_factor;
                self.current = Some(current);
                false
            }
        };
        self.iteration += 1;

        let report = IterationReport {
            iteration: self.iteration,
            value: self.best_value.unwrap_or(best),
            step_length: self.step_length,
            accepted,
            parameters: self.parameters.clone(),
        };
        trace_debug!(
            "optimizer_iteration",
            iteration = report.iteration,
            value = report.value,
            step_length = report.step_length,
            accepted = accepted,
        );

        if self.step_length < self.config.min_step_length {
            self.status = OptimizerStatus::Converged(StopCondition::StepTooSmall);
        } else if self.iteration >= self.config.max_iterations {
            self.status = OptimizerStatus::Converged(StopCondition::MaximumIterations);
        } else if let (Some(timeout), Some(started)) = (self.config.timeout, self.started) {
            if started.elapsed() >= timeout {
                self.status = OptimizerStatus::Converged(StopCondition::TimedOut);
            }
        }
        Some(report)
    }
}
