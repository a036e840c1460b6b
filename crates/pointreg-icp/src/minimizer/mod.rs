use pointreg_3d::{linalg::squared_distance, PointCloud, Transformation};
use serde::{Deserialize, Serialize};

use crate::{correspondence::CorrespondenceSet, error::IcpError, ops};

mod point_to_plane;
mod point_to_point;

/// Smallest accepted ratio between the extreme singular values of a solve.
pub(crate) const MIN_INVERSE_CONDITION: f64 = 1e-12;

/// Outcome of one minimization step.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimization {
    /// Update to compose with the running estimate, `T_new = increment * T`.
    pub increment: Transformation,
    /// Weighted mean squared error of the matches after the increment.
    pub residual_error: f64,
}

/// The error metric minimized at each iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ErrorMinimizer {
    /// Never moves the reading, only reports the error.
    Identity,
    /// Weighted sum of squared point distances, solved in closed form.
    #[default]
    PointToPoint,
    /// Point to point with an additional uniform scale.
    PointToPointSimilarity,
    /// Weighted sum of squared distances to the reference tangent planes.
    PointToPlane,
}

impl ErrorMinimizer {
    /// Name of the variant, as written in configuration documents.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorMinimizer::Identity => "identity",
            ErrorMinimizer::PointToPoint => "point-to-point",
            ErrorMinimizer::PointToPointSimilarity => "point-to-point-similarity",
            ErrorMinimizer::PointToPlane => "point-to-plane",
        }
    }

    /// Whether the minimizer only produces rigid increments.
    pub fn is_rigid(&self) -> bool {
        !matches!(self, ErrorMinimizer::PointToPointSimilarity)
    }

    /// Check that the clouds carry the features this minimizer needs.
    pub fn check_features(&self, reference: &PointCloud) -> Result<(), IcpError> {
        if matches!(self, ErrorMinimizer::PointToPlane) && reference.normals().is_none() {
            return Err(IcpError::MissingFeature {
                feature: "normals",
                cloud: "reference",
                stage: "point-to-plane minimizer",
            });
        }
        Ok(())
    }

    /// Compute the incremental transformation for the weighted matches.
    ///
    /// # Arguments
    ///
    /// * `set` - The weighted matches.
    /// * `reading` - The reading cloud, in the frame of the running estimate.
    /// * `reference` - The reference cloud.
    /// * `parallel` - Whether to spread the accumulation over the rayon pool.
    ///
    /// # Errors
    ///
    /// * [`IcpError::InsufficientData`] with fewer than D valid matches.
    /// * [`IcpError::MissingFeature`] for point-to-plane without reference normals.
    /// * [`IcpError::NumericalInstability`] for an ill-conditioned solve.
    pub fn minimize(
        &self,
        set: &CorrespondenceSet,
        reading: &PointCloud,
        reference: &PointCloud,
        parallel: bool,
    ) -> Result<Minimization, IcpError> {
        let dim = reading.dim();
        let num_valid = set.num_valid();
        if num_valid < dim {
            return Err(IcpError::InsufficientData {
                required: dim,
                actual: num_valid,
            });
        }
        self.check_features(reference)?;

        let increment = match self {
            ErrorMinimizer::Identity => Transformation::identity(dim)?,
            ErrorMinimizer::PointToPoint => {
                point_to_point::minimize(set, reading, reference, false, parallel)?
            }
            ErrorMinimizer::PointToPointSimilarity => {
                point_to_point::minimize(set, reading, reference, true, parallel)?
            }
            ErrorMinimizer::PointToPlane => {
                point_to_plane::minimize(set, reading, reference, parallel)?
            }
        };

        let residual_error = match self {
            ErrorMinimizer::PointToPlane => {
                point_to_plane::residual(set, reading, reference, &increment, parallel)
            }
            _ => point_residual(set, reading, reference, &increment, parallel),
        };
        if !residual_error.is_finite() {
            return Err(IcpError::NumericalInstability(format!(
                "{} produced a non finite residual",
                self.name()
            )));
        }

        Ok(Minimization {
            increment,
            residual_error,
        })
    }
}

/// Weighted mean squared point distance after applying `increment` to the reading.
fn point_residual(
    set: &CorrespondenceSet,
    reading: &PointCloud,
    reference: &PointCloud,
    increment: &Transformation,
    parallel: bool,
) -> f64 {
    let entries = set.entries();
    let (p, q) = (reading.points(), reference.points());
    let [weight, error] = ops::chunked_sum(entries.len(), parallel, |i, acc: &mut [f64; 2]| {
        let c = &entries[i];
        if c.is_valid() {
            let moved = increment.transform_point(&p[c.reading]);
            acc[0] += c.weight;
            acc[1] += c.weight * squared_distance(&moved, &q[c.reference]);
        }
    });
    error / weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::Correspondence;

    fn identity_set(n: usize) -> CorrespondenceSet {
        CorrespondenceSet::new(
            1,
            (0..n)
                .map(|i| Correspondence {
                    reading: i,
                    reference: i,
                    distance: 0.0,
                    weight: 1.0,
                })
                .collect(),
        )
    }

    #[test]
    fn test_insufficient_data() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = PointCloud::new(vec![[0.0; 3], [1.0, 0.0, 0.0]], None, None)?;
        let result = ErrorMinimizer::PointToPoint.minimize(&identity_set(2), &cloud, &cloud, false);
        assert!(matches!(
            result,
            Err(IcpError::InsufficientData {
                required: 3,
                actual: 2
            })
        ));
        Ok(())
    }

    #[test]
    fn test_point_to_plane_needs_normals() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = PointCloud::new(vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], None, None)?;
        let result = ErrorMinimizer::PointToPlane.minimize(&identity_set(3), &cloud, &cloud, false);
        assert!(matches!(
            result,
            Err(IcpError::MissingFeature {
                cloud: "reference",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_identity_minimizer_reports_error() -> Result<(), Box<dyn std::error::Error>> {
        let reading = PointCloud::from_points_2d(vec![[0.0, 0.0], [1.0, 0.0]]);
        let reference = PointCloud::from_points_2d(vec![[0.0, 1.0], [1.0, 1.0]]);
        let out = ErrorMinimizer::Identity.minimize(&identity_set(2), &reading, &reference, false)?;
        assert_eq!(out.increment, Transformation::identity(2)?);
        assert_eq!(out.residual_error, 1.0);
        Ok(())
    }

    #[test]
    fn test_parse() -> Result<(), serde_json::Error> {
        let m: ErrorMinimizer = serde_json::from_str(r#"{"type": "point-to-plane"}"#)?;
        assert_eq!(m, ErrorMinimizer::PointToPlane);
        assert!(!ErrorMinimizer::PointToPointSimilarity.is_rigid());
        assert!(serde_json::from_str::<ErrorMinimizer>(r#"{"type": "point-to-gaussian"}"#).is_err());
        Ok(())
    }
}
