#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Convergence state machine.
pub mod checker;

/// Pipeline configuration documents.
pub mod config;

/// Matched point pairs and their weights.
pub mod correspondence;

/// Error types for the registration pipeline.
pub mod error;

/// Point cloud filters run before and during registration.
pub mod filters;

/// The registration loop.
pub mod icp;

/// Nearest neighbor indices.
pub mod index;

/// Correspondence search.
pub mod matcher;

/// Error metrics and their minimizers.
pub mod minimizer;

/// Correspondence rejection and reweighting.
pub mod outlier;

mod ops;

pub use checker::{CheckerConfig, ConvergenceState, IterationRecord, TransformationChecker};
pub use config::IcpConfig;
pub use correspondence::{Correspondence, CorrespondenceSet};
pub use error::IcpError;
pub use filters::{apply_chain, DataFilter, FilterError};
pub use icp::{CancellationToken, Icp, IcpResult};
pub use index::{IndexError, IndexKind, Neighbor, SpatialIndex};
pub use matcher::{Matcher, MatcherConfig};
pub use minimizer::{ErrorMinimizer, Minimization};
pub use outlier::OutlierFilter;
