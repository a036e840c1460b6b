use pointreg_3d::{PointCloud, PointCloudError};
use serde::{Deserialize, Serialize};

mod normals;
mod sampling;

/// Error type for the data filters.
#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    /// The filter needs a feature the input cloud does not carry.
    #[error("The `{filter}` filter requires the `{feature}` feature")]
    MissingFeature {
        /// Name of the missing feature.
        feature: &'static str,
        /// Name of the filter.
        filter: &'static str,
    },

    /// The input cloud has too few points for the filter.
    #[error("The `{filter}` filter needs at least {required} points, got {actual}")]
    InsufficientPoints {
        /// Name of the filter.
        filter: &'static str,
        /// Minimum number of points.
        required: usize,
        /// Number of points in the input cloud.
        actual: usize,
    },

    /// Invalid point cloud manipulation.
    #[error(transparent)]
    PointCloud(#[from] PointCloudError),
}

fn default_normals_knn() -> usize {
    10
}

fn default_sampling_ratio() -> f64 {
    1.0
}

fn default_min_points_per_voxel() -> usize {
    1
}

fn default_towards() -> bool {
    true
}

/// A pure transformation of a point cloud, chained in configured order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum DataFilter {
    /// Return the cloud unchanged.
    Identity,

    /// Drop points with a NaN or infinite coordinate.
    RemoveNonFinite,

    /// Keep the points inside an axis aligned box, or those outside it.
    BoundingBox {
        /// Lower corner of the box.
        min: [f64; 3],
        /// Upper corner of the box.
        max: [f64; 3],
        /// Remove the points inside instead of keeping them.
        #[serde(default)]
        remove_inside: bool,
    },

    /// Keep one point every `step` points.
    FixStepSampling {
        /// Sampling period, at least 1.
        step: usize,
    },

    /// Keep each point with a fixed probability.
    RandomSampling {
        /// Probability to keep a point, in `(0, 1]`.
        probability: f64,
        /// Seed of the generator.
        #[serde(default)]
        seed: u64,
    },

    /// Replace the points of each occupied voxel by their centroid.
    VoxelGrid {
        /// Edge length of the cubic voxels.
        leaf_size: f64,
        /// Voxels with fewer points produce no output.
        #[serde(default = "default_min_points_per_voxel")]
        min_points_per_voxel: usize,
    },

    /// Estimate normals from the `knn` nearest neighbors of each point.
    SurfaceNormals {
        /// Neighborhood size, the point itself included.
        #[serde(default = "default_normals_knn")]
        knn: usize,
    },

    /// Split the cloud into boxes of at most `knn` points, estimate one normal
    /// per box and keep a `ratio` of its points.
    SamplingSurfaceNormals {
        /// Maximum number of points per box.
        #[serde(default = "default_normals_knn")]
        knn: usize,
        /// Fraction of the points of each box to keep, in `(0, 1]`.
        #[serde(default = "default_sampling_ratio")]
        ratio: f64,
    },

    /// Flip normals so they face a viewpoint.
    OrientNormals {
        /// The point the normals should face.
        #[serde(default)]
        viewpoint: [f64; 3],
        /// Face towards the viewpoint, or away from it.
        #[serde(default = "default_towards")]
        towards: bool,
    },
}

impl DataFilter {
    /// Apply the filter, producing a new cloud.
    pub fn apply(&self, cloud: &PointCloud) -> Result<PointCloud, FilterError> {
        match self {
            DataFilter::Identity => Ok(cloud.clone()),
            DataFilter::RemoveNonFinite => sampling::remove_non_finite(cloud),
            DataFilter::BoundingBox {
                min,
                max,
                remove_inside,
            } => sampling::bounding_box(cloud, min, max, *remove_inside),
            DataFilter::FixStepSampling { step } => sampling::fix_step(cloud, *step),
            DataFilter::RandomSampling { probability, seed } => {
                sampling::random(cloud, *probability, *seed)
            }
            DataFilter::VoxelGrid {
                leaf_size,
                min_points_per_voxel,
            } => sampling::voxel_grid(cloud, *leaf_size, *min_points_per_voxel),
            DataFilter::SurfaceNormals { knn } => normals::surface_normals(cloud, *knn),
            DataFilter::SamplingSurfaceNormals { knn, ratio } => {
                normals::sampling_surface_normals(cloud, *knn, *ratio)
            }
            DataFilter::OrientNormals { viewpoint, towards } => {
                normals::orient_normals(cloud, viewpoint, *towards)
            }
        }
    }

    /// Name of the variant, as written in configuration documents.
    pub fn name(&self) -> &'static str {
        match self {
            DataFilter::Identity => "identity",
            DataFilter::RemoveNonFinite => "remove-non-finite",
            DataFilter::BoundingBox { .. } => "bounding-box",
            DataFilter::FixStepSampling { .. } => "fix-step-sampling",
            DataFilter::RandomSampling { .. } => "random-sampling",
            DataFilter::VoxelGrid { .. } => "voxel-grid",
            DataFilter::SurfaceNormals { .. } => "surface-normals",
            DataFilter::SamplingSurfaceNormals { .. } => "sampling-surface-normals",
            DataFilter::OrientNormals { .. } => "orient-normals",
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let name = self.name();
        match self {
            DataFilter::BoundingBox { min, max, .. } => {
                if min.iter().zip(max.iter()).any(|(lo, hi)| lo.is_nan() || hi.is_nan() || lo > hi) {
                    return Err(format!("{name}: min must not exceed max"));
                }
            }
            DataFilter::FixStepSampling { step } if *step == 0 => {
                return Err(format!("{name}: step must be at least 1"));
            }
            DataFilter::RandomSampling { probability, .. }
                if !(*probability > 0.0 && *probability <= 1.0) =>
            {
                return Err(format!("{name}: probability must be in (0, 1], got {probability}"));
            }
            DataFilter::VoxelGrid { leaf_size, .. } if !(leaf_size.is_finite() && *leaf_size > 0.0) => {
                return Err(format!("{name}: leafSize must be positive, got {leaf_size}"));
            }
            DataFilter::SurfaceNormals { knn } if *knn < 3 => {
                return Err(format!("{name}: knn must be at least 3, got {knn}"));
            }
            DataFilter::SamplingSurfaceNormals { knn, ratio } => {
                if *knn < 3 {
                    return Err(format!("{name}: knn must be at least 3, got {knn}"));
                }
                if !(*ratio > 0.0 && *ratio <= 1.0) {
                    return Err(format!("{name}: ratio must be in (0, 1], got {ratio}"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Run a chain of filters in order.
pub fn apply_chain(filters: &[DataFilter], cloud: &PointCloud) -> Result<PointCloud, FilterError> {
    let mut out = cloud.clone();
    for filter in filters {
        out = filter.apply(&out)?;
        log::trace!("{} filter kept {} points", filter.name(), out.len());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters() -> Result<(), serde_json::Error> {
        let filters: Vec<DataFilter> = serde_json::from_str(
            r#"[
                {"type": "voxel-grid", "leafSize": 0.5},
                {"type": "bounding-box", "min": [0, 0, 0], "max": [1, 1, 1], "removeInside": true},
                {"type": "surface-normals"},
                {"type": "orient-normals", "viewpoint": [0, 0, 10]}
            ]"#,
        )?;
        assert_eq!(
            filters[0],
            DataFilter::VoxelGrid {
                leaf_size: 0.5,
                min_points_per_voxel: 1
            }
        );
        assert_eq!(filters[2], DataFilter::SurfaceNormals { knn: 10 });
        assert_eq!(
            filters[3],
            DataFilter::OrientNormals {
                viewpoint: [0.0, 0.0, 10.0],
                towards: true
            }
        );
        assert!(serde_json::from_str::<DataFilter>(r#"{"type": "octree-grid"}"#).is_err());
        Ok(())
    }

    #[test]
    fn test_validate() {
        assert!(DataFilter::FixStepSampling { step: 0 }.validate().is_err());
        assert!(DataFilter::RandomSampling {
            probability: 1.5,
            seed: 0
        }
        .validate()
        .is_err());
        assert!(DataFilter::SurfaceNormals { knn: 8 }.validate().is_ok());
    }

    #[test]
    fn test_chain_order() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = PointCloud::from_points_2d((0..10).map(|i| [i as f64, 0.0]).collect());
        let chain = [
            DataFilter::FixStepSampling { step: 2 },
            DataFilter::BoundingBox {
                min: [3.0, -1.0, -1.0],
                max: [10.0, 1.0, 1.0],
                remove_inside: false,
            },
        ];
        let out = apply_chain(&chain, &cloud)?;
        let xs = out.points().iter().map(|p| p[0]).collect::<Vec<_>>();
        assert_eq!(xs, vec![4.0, 6.0, 8.0]);
        Ok(())
    }
}
