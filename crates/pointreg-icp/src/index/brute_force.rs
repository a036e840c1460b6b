use pointreg_3d::{linalg::squared_distance, PointCloud};

use super::{neighbor_order, Neighbor};

/// Exhaustive nearest neighbor search, mainly a reference for the trees.
pub struct BruteForce {
    points: Vec<[f64; 3]>,
}

impl BruteForce {
    /// Copy the points of `cloud` into the scan.
    pub fn new(cloud: &PointCloud) -> Self {
        Self {
            points: cloud.points().to_vec(),
        }
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the scan holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Find the `k` nearest neighbors of `query`.
    pub fn knn(&self, query: &[f64; 3], k: usize) -> Vec<Neighbor> {
        let mut all = self
            .points
            .iter()
            .enumerate()
            .map(|(index, p)| Neighbor {
                index,
                distance: squared_distance(p, query).sqrt(),
            })
            .collect::<Vec<_>>();

        if k < all.len() {
            all.select_nth_unstable_by(k, neighbor_order);
            all.truncate(k);
        }
        all.sort_by(neighbor_order);
        all
    }
}
