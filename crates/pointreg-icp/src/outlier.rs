use pointreg_3d::{linalg::dot3, PointCloud};
use serde::{Deserialize, Serialize};

use crate::{correspondence::CorrespondenceSet, error::IcpError};

fn default_median_factor() -> f64 {
    3.0
}

/// Weighting strategy applied to the matches of an iteration.
///
/// Each filter multiplies the current weights by `0` (rejected) or `1`
/// (kept). Statistics are taken over the entries still valid when the filter
/// runs, so chained filters compose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum OutlierFilter {
    /// Keep the closest `ratio` of the matches.
    Trimmed {
        /// Fraction of matches to keep, in `(0, 1]`.
        ratio: f64,
    },

    /// Reject matches farther than `factor` times the median distance.
    MedianDistance {
        /// Multiple of the median distance.
        #[serde(default = "default_median_factor")]
        factor: f64,
    },

    /// Reject matches farther than a fixed distance.
    MaxDistance {
        /// Largest accepted distance.
        max_dist: f64,
    },

    /// Reject matches closer than a fixed distance.
    MinDistance {
        /// Smallest accepted distance.
        min_dist: f64,
    },

    /// Reject matches whose normals differ by more than an angle.
    SurfaceNormal {
        /// Largest accepted angle between the two normals, in radians.
        max_angle: f64,
    },
}

impl Default for OutlierFilter {
    fn default() -> Self {
        OutlierFilter::Trimmed { ratio: 0.9 }
    }
}

/// The `q`-quantile of `values` (nearest rank), `None` when empty.
fn quantile(mut values: Vec<f64>, q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let rank = ((q * values.len() as f64).ceil() as usize).clamp(1, values.len());
    Some(values[rank - 1])
}

impl OutlierFilter {
    /// Name of the variant, as written in configuration documents.
    pub fn name(&self) -> &'static str {
        match self {
            OutlierFilter::Trimmed { .. } => "trimmed",
            OutlierFilter::MedianDistance { .. } => "median-distance",
            OutlierFilter::MaxDistance { .. } => "max-distance",
            OutlierFilter::MinDistance { .. } => "min-distance",
            OutlierFilter::SurfaceNormal { .. } => "surface-normal",
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let name = self.name();
        let (param, value, valid) = match *self {
            OutlierFilter::Trimmed { ratio } => ("ratio", ratio, ratio > 0.0 && ratio <= 1.0),
            OutlierFilter::MedianDistance { factor } => ("factor", factor, factor > 0.0 && factor.is_finite()),
            OutlierFilter::MaxDistance { max_dist } => ("maxDist", max_dist, max_dist > 0.0),
            OutlierFilter::MinDistance { min_dist } => ("minDist", min_dist, min_dist >= 0.0 && min_dist.is_finite()),
            OutlierFilter::SurfaceNormal { max_angle } => (
                "maxAngle",
                max_angle,
                (0.0..=std::f64::consts::FRAC_PI_2).contains(&max_angle),
            ),
        };
        if valid {
            Ok(())
        } else {
            Err(format!("{name}: invalid {param} {value}"))
        }
    }

    /// Update the weights of `set` in place.
    ///
    /// # Arguments
    ///
    /// * `set` - The matches of the current iteration.
    /// * `reading` - The reading cloud the matches were computed from.
    /// * `reference` - The reference cloud.
    ///
    /// # Errors
    ///
    /// [`IcpError::MissingFeature`] if the surface normal filter runs on a
    /// cloud without normals.
    pub fn apply(
        &self,
        set: &mut CorrespondenceSet,
        reading: &PointCloud,
        reference: &PointCloud,
    ) -> Result<(), IcpError> {
        match *self {
            OutlierFilter::Trimmed { ratio } => {
                if let Some(limit) = quantile(set.valid_distances(), ratio) {
                    set.scale_weights(|c| if c.distance <= limit { 1.0 } else { 0.0 });
                }
            }
            OutlierFilter::MedianDistance { factor } => {
                if let Some(median) = quantile(set.valid_distances(), 0.5) {
                    let limit = factor * median;
                    set.scale_weights(|c| if c.distance <= limit { 1.0 } else { 0.0 });
                }
            }
            OutlierFilter::MaxDistance { max_dist } => {
                set.scale_weights(|c| if c.distance <= max_dist { 1.0 } else { 0.0 });
            }
            OutlierFilter::MinDistance { min_dist } => {
                set.scale_weights(|c| if c.distance >= min_dist { 1.0 } else { 0.0 });
            }
            OutlierFilter::SurfaceNormal { max_angle } => {
                let stage = "surface-normal outlier filter";
                let reading_normals = reading.normals().ok_or(IcpError::MissingFeature {
                    feature: "normals",
                    cloud: "reading",
                    stage,
                })?;
                let reference_normals = reference.normals().ok_or(IcpError::MissingFeature {
                    feature: "normals",
                    cloud: "reference",
                    stage,
                })?;

                // normals are unoriented, compare the acute angle
                let min_cos = max_angle.cos();
                set.scale_weights(|c| {
                    let cos = dot3(&reading_normals[c.reading], &reference_normals[c.reference]).abs();
                    if cos >= min_cos {
                        1.0
                    } else {
                        0.0
                    }
                });
            }
        }

        log::trace!("{} outlier filter kept {} matches", self.name(), set.num_valid());
        Ok(())
    }
}
