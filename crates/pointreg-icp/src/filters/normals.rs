use pointreg_3d::{linalg::dot3, PointCloud};
use rayon::prelude::*;

use super::FilterError;
use crate::{index::KdTree, ops};

/// Normal of the best fitting plane (line in 2D) through the selected points.
///
/// The sign is chosen so the largest component is positive. Returns `None`
/// when the points all coincide.
fn pca_normal(points: &[[f64; 3]], members: &[usize], dim: usize) -> Option<[f64; 3]> {
    let inv_count = 1.0 / members.len() as f64;

    let mut mean = [0.0; 3];
    for &i in members {
        for d in 0..dim {
            mean[d] += points[i][d] * inv_count;
        }
    }

    let mut covariance = [[0.0; 3]; 3];
    for &i in members {
        for r in 0..dim {
            for c in 0..dim {
                covariance[r][c] += (points[i][r] - mean[r]) * (points[i][c] - mean[c]) * inv_count;
            }
        }
    }

    let decomposition = ops::svd(dim, |r, c| covariance[r][c]);
    if decomposition.s[0].is_nan() || decomposition.s[0] <= 0.0 {
        return None;
    }

    // singular vector of the smallest singular value
    let mut normal = [0.0; 3];
    for (d, n) in normal.iter_mut().enumerate().take(dim) {
        *n = decomposition.v.read(d, dim - 1);
    }

    let largest = normal
        .iter()
        .copied()
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(0.0);
    if largest < 0.0 {
        normal.iter_mut().for_each(|n| *n = -*n);
    }

    Some(normal)
}

pub(super) fn surface_normals(cloud: &PointCloud, knn: usize) -> Result<PointCloud, FilterError> {
    let dim = cloud.dim();
    if cloud.len() < dim {
        return Err(FilterError::InsufficientPoints {
            filter: "surface-normals",
            required: dim,
            actual: cloud.len(),
        });
    }

    let tree = KdTree::new(cloud, 0.0);
    let points = cloud.points();
    let normals = points
        .par_iter()
        .map(|p| {
            let members = tree.knn(p, knn).into_iter().map(|nn| nn.index).collect::<Vec<_>>();
            pca_normal(points, &members, dim).unwrap_or([0.0; 3])
        })
        .collect::<Vec<_>>();

    let mut out = cloud.clone();
    out.set_normals(normals)?;
    Ok(out)
}

/// Recursively split `indices` at the median of the widest axis until every
/// box holds at most `max_points` points.
fn split_boxes(
    points: &[[f64; 3]],
    indices: &mut [usize],
    max_points: usize,
    dim: usize,
    boxes: &mut Vec<Vec<usize>>,
) {
    if indices.len() <= max_points {
        boxes.push(indices.to_vec());
        return;
    }

    let extent = |axis: usize| {
        let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            (lo.min(points[i][axis]), hi.max(points[i][axis]))
        });
        hi - lo
    };
    let axis = (0..dim)
        .max_by(|&a, &b| extent(a).total_cmp(&extent(b)))
        .unwrap_or(0);

    let mid = indices.len() / 2;
    indices.select_nth_unstable_by(mid, |&a, &b| {
        points[a][axis]
            .total_cmp(&points[b][axis])
            .then_with(|| a.cmp(&b))
    });

    let (left, right) = indices.split_at_mut(mid);
    split_boxes(points, left, max_points, dim, boxes);
    split_boxes(points, right, max_points, dim, boxes);
}

pub(super) fn sampling_surface_normals(
    cloud: &PointCloud,
    knn: usize,
    ratio: f64,
) -> Result<PointCloud, FilterError> {
    let dim = cloud.dim();
    if cloud.len() < dim {
        return Err(FilterError::InsufficientPoints {
            filter: "sampling-surface-normals",
            required: dim,
            actual: cloud.len(),
        });
    }

    let points = cloud.points();
    let mut indices = (0..cloud.len()).collect::<Vec<_>>();
    let mut boxes = Vec::new();
    split_boxes(points, &mut indices, knn.max(dim), dim, &mut boxes);

    // boxes too small to define a plane are dropped
    let mut kept = boxes
        .into_par_iter()
        .filter(|members| members.len() >= dim)
        .flat_map_iter(|mut members| {
            members.sort_unstable();
            let normal = pca_normal(points, &members, dim).unwrap_or([0.0; 3]);
            let count = members.len();
            let keep = ((ratio * count as f64).ceil() as usize).clamp(1, count);
            (0..keep)
                .map(|j| (members[j * count / keep], normal))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    kept.sort_unstable_by_key(|(i, _)| *i);

    let selected = kept.iter().map(|(i, _)| *i).collect::<Vec<_>>();
    let mut out = cloud.select(&selected)?;
    out.set_normals(kept.into_iter().map(|(_, n)| n).collect())?;
    Ok(out)
}

pub(super) fn orient_normals(
    cloud: &PointCloud,
    viewpoint: &[f64; 3],
    towards: bool,
) -> Result<PointCloud, FilterError> {
    let normals = cloud.normals().ok_or(FilterError::MissingFeature {
        feature: "normals",
        filter: "orient-normals",
    })?;

    let oriented = cloud
        .points()
        .iter()
        .zip(normals.iter())
        .map(|(p, n)| {
            let to_view = [viewpoint[0] - p[0], viewpoint[1] - p[1], viewpoint[2] - p[2]];
            let facing = dot3(n, &to_view) >= 0.0;
            if facing == towards {
                *n
            } else {
                [-n[0], -n[1], -n[2]]
            }
        })
        .collect();

    let mut out = cloud.clone();
    out.set_normals(oriented)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn plane(n: usize) -> Result<PointCloud, pointreg_3d::PointCloudError> {
        let points = (0..n * n)
            .map(|i| [(i % n) as f64 * 0.1, (i / n) as f64 * 0.1, 0.0])
            .collect();
        PointCloud::new(points, None, None)
    }

    #[test]
    fn test_surface_normals_plane() -> Result<(), Box<dyn std::error::Error>> {
        let out = surface_normals(&plane(10)?, 8)?;
        let normals = out.normals().ok_or("normals")?;
        assert_eq!(normals.len(), 100);
        for n in normals {
            assert_relative_eq!(n[2], 1.0, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_surface_normals_line_2d() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = PointCloud::from_points_2d((0..20).map(|i| [i as f64 * 0.5, 2.0]).collect());
        let out = surface_normals(&cloud, 5)?;
        for n in out.normals().ok_or("normals")? {
            assert_relative_eq!(n[1], 1.0, epsilon = 1e-9);
            assert_eq!(n[2], 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_surface_normals_too_few_points() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], None, None)?;
        assert!(matches!(
            surface_normals(&cloud, 5),
            Err(FilterError::InsufficientPoints { required: 3, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_sampling_surface_normals() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = StdRng::seed_from_u64(3);
        let points = (0..200)
            .map(|_| [rng.random::<f64>(), rng.random::<f64>(), 0.5])
            .collect();
        let cloud = PointCloud::new(points, None, None)?.with_label("id", (0..200).collect())?;

        let out = sampling_surface_normals(&cloud, 10, 0.5)?;
        assert!(out.len() >= 100 && out.len() < 200);
        for n in out.normals().ok_or("normals")? {
            assert_relative_eq!(n[2], 1.0, epsilon = 1e-9);
        }
        // the kept points stay in input order
        let ids = out.label("id").ok_or("id")?;
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        Ok(())
    }

    #[test]
    fn test_orient_normals() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            None,
            Some(vec![[0.0, 0.0, 1.0], [0.0, 0.0, -1.0]]),
        )?;
        let out = orient_normals(&cloud, &[0.0, 0.0, -5.0], true)?;
        assert_eq!(out.normals().ok_or("normals")?, &[[0.0, 0.0, -1.0], [0.0, 0.0, -1.0]]);

        let out = orient_normals(&cloud, &[0.0, 0.0, -5.0], false)?;
        assert_eq!(out.normals().ok_or("normals")?, &[[0.0, 0.0, 1.0], [0.0, 0.0, 1.0]]);

        let bare = PointCloud::from_points_2d(vec![[0.0, 0.0]]);
        assert!(matches!(
            orient_normals(&bare, &[0.0; 3], true),
            Err(FilterError::MissingFeature { .. })
        ));
        Ok(())
    }
}
