use std::collections::BinaryHeap;

use pointreg_3d::{linalg::squared_distance, PointCloud};

use super::Neighbor;

/// Heap entry ordered by squared distance, then by index.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance_sq: f64,
    index: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance_sq
            .total_cmp(&other.distance_sq)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct Node {
    point: [f64; 3],
    index: usize,
    split_dimension: usize,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

impl Node {
    fn new(points: &[[f64; 3]], indices: &mut [usize], depth: usize, dim: usize) -> Option<Box<Node>> {
        if indices.is_empty() {
            return None;
        }

        // choose split axis
        let split_dimension = depth % dim;

        // partition around the median along the split axis
        let median_index = indices.len() / 2;
        indices.select_nth_unstable_by(median_index, |&a, &b| {
            points[a][split_dimension]
                .total_cmp(&points[b][split_dimension])
                .then_with(|| a.cmp(&b))
        });

        let (left, rest) = indices.split_at_mut(median_index);
        let (median, right) = rest.split_first_mut()?;
        let index = *median;

        Some(Box::new(Node {
            point: points[index],
            index,
            split_dimension,
            left: Node::new(points, left, depth + 1, dim),
            right: Node::new(points, right, depth + 1, dim),
        }))
    }

    fn knn_search(&self, query: &[f64; 3], k: usize, prune_factor: f64, heap: &mut BinaryHeap<Candidate>) {
        let candidate = Candidate {
            distance_sq: squared_distance(&self.point, query),
            index: self.index,
        };

        if heap.len() < k {
            heap.push(candidate);
        } else if let Some(top) = heap.peek() {
            if candidate < *top {
                heap.pop();
                heap.push(candidate);
            }
        }

        // determine which side of the node to search first
        let split_distance = query[self.split_dimension] - self.point[self.split_dimension];
        let (nearer, further) = if split_distance < 0.0 {
            (&self.left, &self.right)
        } else {
            (&self.right, &self.left)
        };

        if let Some(near_node) = nearer {
            near_node.knn_search(query, k, prune_factor, heap);
        }

        // equal distances must still be visited so ties resolve by index
        let worst = match heap.peek() {
            Some(top) if heap.len() >= k => top.distance_sq,
            _ => f64::INFINITY,
        };
        if split_distance * split_distance * prune_factor <= worst {
            if let Some(further_node) = further {
                further_node.knn_search(query, k, prune_factor, heap);
            }
        }
    }
}

/// A median split k-d tree over the points of a cloud.
///
/// With `epsilon == 0` the search is exact. With `epsilon > 0` a subtree is
/// skipped once its splitting plane is farther than `worst / (1 + epsilon)`,
/// so every returned distance is within `(1 + epsilon)` of the true k-th
/// nearest distance.
pub struct KdTree {
    root: Option<Box<Node>>,
    len: usize,
    epsilon: f64,
}

impl KdTree {
    /// Build the tree over `cloud`, splitting only along its first `dim` axes.
    pub fn new(cloud: &PointCloud, epsilon: f64) -> Self {
        let mut indices = (0..cloud.len()).collect::<Vec<_>>();
        let root = Node::new(cloud.points(), &mut indices, 0, cloud.dim());
        Self {
            root,
            len: cloud.len(),
            epsilon,
        }
    }

    /// The approximation factor used by the search.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Find the `k` nearest neighbors of `query`.
    pub fn knn(&self, query: &[f64; 3], k: usize) -> Vec<Neighbor> {
        let k = k.min(self.len);
        if k == 0 {
            return Vec::new();
        }

        let prune_factor = (1.0 + self.epsilon) * (1.0 + self.epsilon);
        let mut heap = BinaryHeap::with_capacity(k + 1);
        if let Some(root) = &self.root {
            root.knn_search(query, k, prune_factor, &mut heap);
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor {
                index: c.index,
                distance: c.distance_sq.sqrt(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knn() -> Result<(), Box<dyn std::error::Error>> {
        let points = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        let tree = KdTree::new(&PointCloud::new(points, None, None)?, 0.0);

        let knn = tree.knn(&[0.0, 0.0, 0.0], 1);
        assert_eq!(
            knn,
            vec![Neighbor {
                index: 0,
                distance: 0.0
            }]
        );

        let knn = tree.knn(&[0.9, 0.1, 0.0], 2);
        assert_eq!(knn[0].index, 1);
        assert_eq!(knn[1].index, 0);
        Ok(())
    }

    #[test]
    fn test_duplicate_coordinates() -> Result<(), Box<dyn std::error::Error>> {
        // many points sharing the same x value
        let points = (0..64).map(|i| [1.0, (i % 8) as f64, (i / 8) as f64]).collect();
        let tree = KdTree::new(&PointCloud::new(points, None, None)?, 0.0);
        let knn = tree.knn(&[1.0, 3.0, 5.0], 1);
        assert_eq!(knn[0].index, 5 * 8 + 3);
        assert_eq!(knn[0].distance, 0.0);
        Ok(())
    }

    #[test]
    fn test_approximate_bound() -> Result<(), Box<dyn std::error::Error>> {
        let points = (0..400)
            .map(|i| [(i % 20) as f64 * 0.37, (i / 20) as f64 * 0.53, 0.0])
            .collect::<Vec<_>>();
        let cloud = PointCloud::with_dim(2, points)?;
        let exact = KdTree::new(&cloud, 0.0);
        let approx = KdTree::new(&cloud, 0.5);

        for q in [[1.1, 2.2, 0.0], [5.0, 0.3, 0.0], [3.3, 9.9, 0.0]] {
            let best = exact.knn(&q, 3);
            let found = approx.knn(&q, 3);
            assert_eq!(found.len(), 3);
            assert!(found[2].distance <= best[2].distance * 1.5 + 1e-12);
        }
        Ok(())
    }
}
