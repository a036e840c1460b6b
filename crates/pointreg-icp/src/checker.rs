use pointreg_3d::Transformation;
use serde::{Deserialize, Serialize};

/// Parameters of the transformation checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckerConfig {
    /// Iteration budget, the run ends in [`ConvergenceState::ConvergedFailure`] once reached.
    pub max_iterations: usize,
    /// Rotation change, in radians, below which an iteration is considered still.
    pub epsilon_rotation: f64,
    /// Translation change below which an iteration is considered still.
    pub epsilon_translation: f64,
    /// Number of consecutive still iterations needed to converge.
    pub smooth_length: usize,
    /// Largest allowed increase of the residual between two iterations.
    pub divergence_bound: Option<f64>,
    /// Largest allowed rotation angle of the accumulated transformation.
    pub max_rotation_norm: Option<f64>,
    /// Largest allowed translation norm of the accumulated transformation.
    pub max_translation_norm: Option<f64>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            epsilon_rotation: 1e-3,
            epsilon_translation: 1e-3,
            smooth_length: 1,
            divergence_bound: None,
            max_rotation_norm: None,
            max_translation_norm: None,
        }
    }
}

impl CheckerConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("checker maxIterations must be at least 1".to_string());
        }
        if self.smooth_length == 0 {
            return Err("checker smoothLength must be at least 1".to_string());
        }
        let thresholds = [
            ("epsilonRotation", Some(self.epsilon_rotation)),
            ("epsilonTranslation", Some(self.epsilon_translation)),
            ("divergenceBound", self.divergence_bound),
            ("maxRotationNorm", self.max_rotation_norm),
            ("maxTranslationNorm", self.max_translation_norm),
        ];
        for (name, value) in thresholds {
            if let Some(value) = value {
                if value.is_nan() || value < 0.0 {
                    return Err(format!("checker {name} must be non-negative, got {value}"));
                }
            }
        }
        Ok(())
    }
}

/// Where a registration run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceState {
    /// Still iterating, the initial state.
    Running,
    /// The increments stayed below the epsilons long enough.
    ConvergedSuccess,
    /// The iteration budget ran out first.
    ConvergedFailure,
    /// The residual grew past the divergence bound, or the estimate left its bounds.
    Diverged,
    /// Stopped by a cancellation request at an iteration boundary.
    Cancelled,
}

impl ConvergenceState {
    /// Whether the run is over.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConvergenceState::Running)
    }
}

/// Diagnostics recorded for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    /// One based iteration index.
    pub iteration: usize,
    /// Residual error reported by the minimizer.
    pub residual_error: f64,
    /// Rotation angle of the increment, in radians.
    pub rotation_delta: f64,
    /// Translation norm of the increment.
    pub translation_delta: f64,
    /// Number of matches with a positive weight.
    pub num_valid_matches: usize,
}

/// The convergence state machine of one registration run.
#[derive(Debug, Clone)]
pub struct TransformationChecker {
    config: CheckerConfig,
    state: ConvergenceState,
    iteration: usize,
    still_count: usize,
    last_residual: Option<f64>,
    trace: Vec<IterationRecord>,
}

impl TransformationChecker {
    /// Start a new run in the [`ConvergenceState::Running`] state.
    pub fn new(config: CheckerConfig) -> Self {
        Self {
            config,
            state: ConvergenceState::Running,
            iteration: 0,
            still_count: 0,
            last_residual: None,
            trace: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    /// Number of iterations checked so far.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Residual of the last checked iteration.
    pub fn last_residual(&self) -> Option<f64> {
        self.last_residual
    }

    /// Records of the checked iterations.
    pub fn trace(&self) -> &[IterationRecord] {
        &self.trace
    }

    /// Consume the checker, keeping its records.
    pub fn into_trace(self) -> Vec<IterationRecord> {
        self.trace
    }

    /// Mark the run as cancelled unless it already ended.
    pub fn cancel(&mut self) -> ConvergenceState {
        if !self.state.is_terminal() {
            self.state = ConvergenceState::Cancelled;
        }
        self.state
    }

    /// Check one iteration and move the state machine.
    ///
    /// Divergence wins over convergence, which wins over running out of
    /// iterations. Once terminal the state no longer changes.
    ///
    /// # Arguments
    ///
    /// * `increment` - The incremental transformation of this iteration.
    /// * `accumulated` - The running estimate after composing the increment.
    /// * `residual_error` - The minimizer residual of this iteration.
    /// * `num_valid_matches` - Number of matches that took part in the minimization.
    pub fn check(
        &mut self,
        increment: &Transformation,
        accumulated: &Transformation,
        residual_error: f64,
        num_valid_matches: usize,
    ) -> ConvergenceState {
        if self.state.is_terminal() {
            return self.state;
        }

        self.iteration += 1;
        let rotation_delta = increment.rotation_angle();
        let translation_delta = increment.translation_norm();
        self.trace.push(IterationRecord {
            iteration: self.iteration,
            residual_error,
            rotation_delta,
            translation_delta,
            num_valid_matches,
        });

        let residual_jump = match (self.config.divergence_bound, self.last_residual) {
            (Some(bound), Some(last)) => residual_error - last > bound,
            _ => false,
        };
        let out_of_bounds = self
            .config
            .max_rotation_norm
            .is_some_and(|bound| accumulated.rotation_angle() > bound)
            || self
                .config
                .max_translation_norm
                .is_some_and(|bound| accumulated.translation_norm() > bound);
        self.last_residual = Some(residual_error);

        if rotation_delta < self.config.epsilon_rotation
            && translation_delta < self.config.epsilon_translation
        {
            self.still_count += 1;
        } else {
            self.still_count = 0;
        }

        self.state = if residual_jump || out_of_bounds {
            ConvergenceState::Diverged
        } else if self.still_count >= self.config.smooth_length {
            ConvergenceState::ConvergedSuccess
        } else if self.iteration >= self.config.max_iterations {
            ConvergenceState::ConvergedFailure
        } else {
            ConvergenceState::Running
        };

        self.state
    }
}
