use std::num::NonZeroUsize;

use kiddo::{immutable::float::kdtree::ImmutableKdTree, SquaredEuclidean};
use pointreg_3d::PointCloud;

use super::{neighbor_order, Neighbor};

enum Backend {
    /// Tree over the `x, y` coordinates of a 2D cloud.
    Planar(ImmutableKdTree<f64, u32, 2, 32>),
    /// Tree over the full coordinates of a 3D cloud.
    Spatial(ImmutableKdTree<f64, u32, 3, 32>),
}

/// Exact nearest neighbor search backed by a balanced `kiddo` tree.
///
/// Results are re-sorted so equal distances come back in index order.
pub struct KiddoTree {
    backend: Backend,
    len: usize,
}

impl KiddoTree {
    /// Build the tree over `cloud`.
    pub fn new(cloud: &PointCloud) -> Self {
        let backend = if cloud.dim() == 2 {
            let planar = cloud.points().iter().map(|p| [p[0], p[1]]).collect::<Vec<_>>();
            Backend::Planar(ImmutableKdTree::new_from_slice(&planar))
        } else {
            Backend::Spatial(ImmutableKdTree::new_from_slice(cloud.points()))
        };

        Self {
            backend,
            len: cloud.len(),
        }
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the `k` nearest neighbors of `query`.
    ///
    /// `kiddo` returns an arbitrary subset of points tied at the k-th distance,
    /// so the query is widened until every tie is in hand before truncating.
    pub fn knn(&self, query: &[f64; 3], k: usize) -> Vec<Neighbor> {
        let k = k.min(self.len());
        if k == 0 {
            return Vec::new();
        }

        let mut qty = k;
        loop {
            let mut neighbors = self.nearest(query, qty);
            let kth = neighbors[k - 1].distance;
            let widened = neighbors.last().is_some_and(|last| last.distance > kth);
            if widened || qty == self.len() {
                neighbors.truncate(k);
                return neighbors;
            }
            qty = (qty * 2).min(self.len());
        }
    }

    fn nearest(&self, query: &[f64; 3], qty: usize) -> Vec<Neighbor> {
        let Some(qty) = NonZeroUsize::new(qty) else {
            return Vec::new();
        };

        let found = match &self.backend {
            Backend::Planar(tree) => tree.nearest_n::<SquaredEuclidean>(&[query[0], query[1]], qty),
            Backend::Spatial(tree) => tree.nearest_n::<SquaredEuclidean>(query, qty),
        };

        let mut neighbors = found
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance: nn.distance.sqrt(),
            })
            .collect::<Vec<_>>();
        neighbors.sort_by(neighbor_order);
        neighbors
    }
}
