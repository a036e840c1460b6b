use pointreg_3d::PointCloud;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    correspondence::{Correspondence, CorrespondenceSet},
    index::{IndexError, IndexKind, SpatialIndex},
};

/// Parameters of the nearest neighbor matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MatcherConfig {
    /// Spatial index backend.
    #[serde(rename = "type")]
    pub kind: IndexKind,
    /// Number of reference neighbors per reading point.
    pub knn: usize,
    /// Approximation factor of the search, `0` for exact.
    pub epsilon: f64,
    /// Matches farther than this start with a zero weight.
    pub max_dist: Option<f64>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::KdTree,
            knn: 1,
            epsilon: 0.0,
            max_dist: None,
        }
    }
}

impl MatcherConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.knn == 0 {
            return Err("matcher knn must be at least 1".to_string());
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(format!("matcher epsilon must be non-negative, got {}", self.epsilon));
        }
        if self.epsilon > 0.0 && self.kind != IndexKind::KdTree {
            return Err(format!(
                "approximate search is only available with the kdtree matcher, not {}",
                self.kind.name()
            ));
        }
        if let Some(max_dist) = self.max_dist {
            if !max_dist.is_finite() || max_dist <= 0.0 {
                return Err(format!("matcher maxDist must be positive, got {max_dist}"));
            }
        }
        Ok(())
    }
}

/// Finds the nearest reference points of every reading point.
#[derive(Debug, Clone)]
pub struct Matcher {
    config: MatcherConfig,
}

impl Matcher {
    /// Create a matcher from its parameters.
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// The matcher parameters.
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Build the spatial index this matcher queries.
    pub fn build_index(&self, reference: &PointCloud) -> Result<SpatialIndex, IndexError> {
        SpatialIndex::build(reference, self.config.kind, self.config.epsilon)
    }

    /// Match every point of `reading` against `index`.
    ///
    /// Each point is queried independently. The initial weight of a match is
    /// the reading point weight (or `1`), and `0` beyond `maxDist`.
    ///
    /// # Arguments
    ///
    /// * `reading` - The reading cloud, already expressed in the reference frame.
    /// * `index` - Index over the reference cloud.
    /// * `parallel` - Whether to spread the queries over the rayon pool.
    pub fn match_cloud(&self, reading: &PointCloud, index: &SpatialIndex, parallel: bool) -> CorrespondenceSet {
        let knn = self.config.knn.min(index.len());
        let weights = reading.weights();

        let query = |(i, point): (usize, &[f64; 3])| {
            let base_weight = weights.map_or(1.0, |w| w[i].max(0.0));
            index
                .knn(point, knn)
                .into_iter()
                .map(|nn| {
                    let in_range = self.config.max_dist.map_or(true, |max_dist| nn.distance <= max_dist);
                    Correspondence {
                        reading: i,
                        reference: nn.index,
                        distance: nn.distance,
                        weight: if in_range { base_weight } else { 0.0 },
                    }
                })
                .collect::<Vec<_>>()
        };

        let per_point: Vec<Vec<Correspondence>> = if parallel {
            reading.points().par_iter().enumerate().map(query).collect()
        } else {
            reading.points().iter().enumerate().map(query).collect()
        };

        CorrespondenceSet::new(knn, per_point.into_iter().flatten().collect())
    }
}
