use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use pointreg_3d::{PointCloud, Transformation};

use crate::{
    checker::{ConvergenceState, IterationRecord, TransformationChecker},
    config::IcpConfig,
    error::IcpError,
    filters::apply_chain,
    index::IndexError,
    matcher::Matcher,
};

/// Tolerance on the rotation block above which a rigid estimate is re-orthonormalized.
const RIGID_TOLERANCE: f64 = 1e-12;

/// Cooperative cancellation flag, polled at iteration boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every run holding a clone of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a registration run.
///
/// The transformation maps the reading frame onto the reference frame.
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Final estimate, including the initial guess.
    pub transformation: Transformation,
    /// Terminal state of the run.
    pub state: ConvergenceState,
    /// The total number of iterations performed.
    pub iterations: usize,
    /// Residual error of the last iteration, infinite if none ran.
    pub residual_error: f64,
    /// Per-iteration records, when requested in the configuration.
    pub trace: Option<Vec<IterationRecord>>,
}

impl IcpResult {
    /// Whether the run ended in [`ConvergenceState::ConvergedSuccess`].
    pub fn converged(&self) -> bool {
        self.state == ConvergenceState::ConvergedSuccess
    }
}

/// Iterative Closest Point registration pipeline.
///
/// The configuration is validated on construction and stays immutable; every
/// call to [`Icp::register`] owns its own convergence state, so one `Icp` can
/// serve concurrent runs.
#[derive(Debug, Clone)]
pub struct Icp {
    config: IcpConfig,
}

impl Icp {
    /// Create a pipeline from a configuration.
    ///
    /// # Errors
    ///
    /// [`IcpError::Configuration`] if any parameter is out of range.
    pub fn new(config: IcpConfig) -> Result<Self, IcpError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create a pipeline from a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, IcpError> {
        Self::new(IcpConfig::from_json(json)?)
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &IcpConfig {
        &self.config
    }

    /// Register `reading` onto `reference`, starting from the identity.
    pub fn register(&self, reading: &PointCloud, reference: &PointCloud) -> Result<IcpResult, IcpError> {
        let initial_guess = Transformation::identity(reading.dim())?;
        self.register_with(reading, reference, &initial_guess, None)
    }

    /// Register `reading` onto `reference`.
    ///
    /// # Arguments
    ///
    /// * `reading` - The cloud to move.
    /// * `reference` - The fixed cloud.
    /// * `initial_guess` - Starting estimate, reading to reference.
    /// * `cancel` - Optional token checked before each iteration.
    ///
    /// # Returns
    ///
    /// The final estimate and the terminal state. Non convergence and
    /// divergence are reported through [`IcpResult::state`].
    ///
    /// # Errors
    ///
    /// Structural problems (empty clouds, dimension mismatch, missing
    /// features) and numerical failures of a stage.
    pub fn register_with(
        &self,
        reading: &PointCloud,
        reference: &PointCloud,
        initial_guess: &Transformation,
        cancel: Option<&CancellationToken>,
    ) -> Result<IcpResult, IcpError> {
        if reading.is_empty() {
            return Err(IcpError::EmptyPointCloud("reading"));
        }
        if reference.is_empty() {
            return Err(IcpError::Index(IndexError::EmptyCloud));
        }
        if reading.dim() != reference.dim() {
            return Err(IcpError::DimensionMismatch {
                reading: reading.dim(),
                reference: reference.dim(),
            });
        }
        if initial_guess.dim() != reference.dim() {
            return Err(IcpError::DimensionMismatch {
                reading: initial_guess.dim(),
                reference: reference.dim(),
            });
        }

        let config = &self.config;
        let parallel = config.parallel;

        // reference side, built once per run
        let reference = apply_chain(&config.reference_filters, reference)?;
        let matcher = Matcher::new(config.matcher.clone());
        let index = matcher.build_index(&reference)?;
        config.error_minimizer.check_features(&reference)?;

        // reading filters do not depend on the estimate
        let reading = apply_chain(&config.reading_filters, reading)?;
        if reading.is_empty() {
            return Err(IcpError::EmptyPointCloud("filtered reading"));
        }

        log::debug!(
            "registering {} reading points against {} reference points",
            reading.len(),
            reference.len()
        );

        let mut transformation = *initial_guess;
        let mut checker = TransformationChecker::new(config.checker.clone());

        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                checker.cancel();
                log::debug!("registration cancelled after {} iterations", checker.iteration());
                break;
            }

            let now = std::time::Instant::now();

            let moved = reading.transformed(&transformation);
            let moved = apply_chain(&config.reading_step_filters, &moved)?;

            let mut matches = matcher.match_cloud(&moved, &index, parallel);
            for filter in &config.outlier_filters {
                filter.apply(&mut matches, &moved, &reference)?;
            }
            let num_valid = matches.num_valid();

            let step = config
                .error_minimizer
                .minimize(&matches, &moved, &reference, parallel)?;

            transformation = step.increment.compose(&transformation);
            if config.error_minimizer.is_rigid() && !transformation.is_rigid(RIGID_TOLERANCE) {
                transformation = transformation.orthonormalized();
            }

            let state = checker.check(&step.increment, &transformation, step.residual_error, num_valid);

            log::debug!(
                "iteration {}: {} valid matches, residual {:.6e}, rotation delta {:.3e}, translation delta {:.3e}, elapsed {:?}",
                checker.iteration(),
                num_valid,
                step.residual_error,
                step.increment.rotation_angle(),
                step.increment.translation_norm(),
                now.elapsed()
            );

            if state.is_terminal() {
                break;
            }
        }

        let state = checker.state();
        let iterations = checker.iteration();
        let residual_error = checker.last_residual().unwrap_or(f64::INFINITY);
        log::debug!("registration ended in {state:?} after {iterations} iterations, residual {residual_error:.6e}");

        Ok(IcpResult {
            transformation,
            state,
            iterations,
            residual_error,
            trace: config.record_trace.then(|| checker.into_trace()),
        })
    }

    /// Apply a registration result to the reading cloud.
    pub fn transform_reading(&self, reading: &PointCloud, result: &IcpResult) -> Result<PointCloud, IcpError> {
        if reading.dim() != result.transformation.dim() {
            return Err(IcpError::DimensionMismatch {
                reading: reading.dim(),
                reference: result.transformation.dim(),
            });
        }
        Ok(reading.transformed(&result.transformation))
    }
}
