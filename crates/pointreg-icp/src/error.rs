use pointreg_3d::{PointCloudError, TransformationError};

use crate::{filters::FilterError, index::IndexError};

/// Error type for the registration pipeline.
///
/// Non-convergence is not an error: it is reported through
/// [`crate::ConvergenceState`] in the registration result.
#[derive(thiserror::Error, Debug)]
pub enum IcpError {
    /// Invalid or unknown stage variant or parameter.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The spatial index could not be built.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// A data filter failed.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// A stage needs a per-point feature the cloud does not carry.
    #[error("The {cloud} cloud is missing the `{feature}` feature required by {stage}")]
    MissingFeature {
        /// Name of the missing feature.
        feature: &'static str,
        /// Which cloud lacks it, `reading` or `reference`.
        cloud: &'static str,
        /// The stage requiring it.
        stage: &'static str,
    },

    /// Too few valid correspondences to solve for a transformation.
    #[error("Need at least {required} valid correspondences, got {actual}")]
    InsufficientData {
        /// Minimum number of valid correspondences.
        required: usize,
        /// Number of valid correspondences available.
        actual: usize,
    },

    /// The solve is ill-conditioned.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// One of the input clouds has no points.
    #[error("The {0} point cloud is empty")]
    EmptyPointCloud(&'static str),

    /// The clouds or the initial guess do not share a dimension.
    #[error("Dimension mismatch: reading is {reading}D, reference is {reference}D")]
    DimensionMismatch {
        /// Dimension of the reading side.
        reading: usize,
        /// Dimension of the reference side.
        reference: usize,
    },

    /// Invalid point cloud manipulation.
    #[error(transparent)]
    PointCloud(#[from] PointCloudError),

    /// Invalid transformation.
    #[error(transparent)]
    Transformation(#[from] TransformationError),
}

impl From<serde_json::Error> for IcpError {
    fn from(err: serde_json::Error) -> Self {
        IcpError::Configuration(err.to_string())
    }
}
