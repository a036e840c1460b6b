use std::cmp::Ordering;

use pointreg_3d::PointCloud;
use serde::{Deserialize, Serialize};

mod brute_force;
pub use brute_force::BruteForce;

mod kd_tree;
pub use kd_tree::KdTree;

mod kiddo_tree;
pub use kiddo_tree::KiddoTree;

/// Error type for the spatial index.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// The reference cloud has no points.
    #[error("Cannot build a spatial index over an empty point cloud")]
    EmptyCloud,

    /// The approximation factor is negative or not finite.
    #[error("Approximation factor must be finite and non-negative, got {0}")]
    InvalidEpsilon(f64),
}

/// A neighbor returned by a k-nearest-neighbor query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the neighbor in the indexed cloud.
    pub index: usize,
    /// Euclidean distance to the query.
    pub distance: f64,
}

/// Ascending distance, ties broken by the lower index.
pub(crate) fn neighbor_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.index.cmp(&b.index))
}

/// The available spatial index backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexKind {
    /// Median split k-d tree, exact or `(1 + epsilon)` approximate.
    #[default]
    #[serde(rename = "kdtree")]
    KdTree,
    /// Exact search backed by `kiddo`.
    #[serde(rename = "kiddo")]
    Kiddo,
    /// Exhaustive linear scan.
    #[serde(rename = "brute-force")]
    BruteForce,
}

impl IndexKind {
    /// Name of the backend, as written in configuration documents.
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::KdTree => "kdtree",
            IndexKind::Kiddo => "kiddo",
            IndexKind::BruteForce => "brute-force",
        }
    }
}

/// A searchable structure over the points of a cloud, read-only once built.
pub enum SpatialIndex {
    /// See [`KdTree`].
    KdTree(KdTree),
    /// See [`KiddoTree`].
    Kiddo(KiddoTree),
    /// See [`BruteForce`].
    BruteForce(BruteForce),
}

impl SpatialIndex {
    /// Build an index over `cloud`.
    ///
    /// # Arguments
    ///
    /// * `cloud` - The cloud to index, usually the reference.
    /// * `kind` - The backend to use.
    /// * `epsilon` - Approximation factor, only honoured by [`IndexKind::KdTree`].
    ///
    /// # Errors
    ///
    /// [`IndexError::EmptyCloud`] if the cloud has no points.
    pub fn build(cloud: &PointCloud, kind: IndexKind, epsilon: f64) -> Result<Self, IndexError> {
        if cloud.is_empty() {
            return Err(IndexError::EmptyCloud);
        }
        if !(epsilon.is_finite() && epsilon >= 0.0) {
            return Err(IndexError::InvalidEpsilon(epsilon));
        }

        let index = match kind {
            IndexKind::KdTree => SpatialIndex::KdTree(KdTree::new(cloud, epsilon)),
            IndexKind::Kiddo => SpatialIndex::Kiddo(KiddoTree::new(cloud)),
            IndexKind::BruteForce => SpatialIndex::BruteForce(BruteForce::new(cloud)),
        };
        log::trace!("built {} index over {} points", kind.name(), cloud.len());

        Ok(index)
    }

    /// Find the `k` nearest neighbors of `query`, ascending by distance, ties by index.
    pub fn knn(&self, query: &[f64; 3], k: usize) -> Vec<Neighbor> {
        match self {
            SpatialIndex::KdTree(tree) => tree.knn(query, k),
            SpatialIndex::Kiddo(tree) => tree.knn(query, k),
            SpatialIndex::BruteForce(scan) => scan.knn(query, k),
        }
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        match self {
            SpatialIndex::KdTree(tree) => tree.len(),
            SpatialIndex::Kiddo(tree) => tree.len(),
            SpatialIndex::BruteForce(scan) => scan.len(),
        }
    }

    /// Whether the index holds no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
