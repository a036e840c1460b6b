use pointreg_3d::{PointCloud, Transformation};

use super::MIN_INVERSE_CONDITION;
use crate::{correspondence::CorrespondenceSet, error::IcpError, ops};

fn determinant(m: &[[f64; 3]; 3], dim: usize) -> f64 {
    if dim == 2 {
        m[0][0] * m[1][1] - m[0][1] * m[1][0]
    } else {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }
}

/// Weighted Kabsch, or Umeyama when `with_scale` is set.
///
/// Finds `R`, `t` (and `s`) minimizing `sum w |s R p + t - q|^2` where `p` are
/// the reading points and `q` their matched reference points.
pub(super) fn minimize(
    set: &CorrespondenceSet,
    reading: &PointCloud,
    reference: &PointCloud,
    with_scale: bool,
    parallel: bool,
) -> Result<Transformation, IcpError> {
    let dim = reading.dim();
    let entries = set.entries();
    let (p, q) = (reading.points(), reference.points());

    // identity transformation is a special case
    if set.valid().all(|c| p[c.reading] == q[c.reference]) {
        return Ok(Transformation::identity(dim)?);
    }

    // weighted centroids
    let sums = ops::chunked_sum(entries.len(), parallel, |i, acc: &mut [f64; 7]| {
        let c = &entries[i];
        if c.is_valid() {
            acc[0] += c.weight;
            for d in 0..3 {
                acc[1 + d] += c.weight * p[c.reading][d];
                acc[4 + d] += c.weight * q[c.reference][d];
            }
        }
    });
    let total_weight = sums[0];
    let src_centroid = [sums[1] / total_weight, sums[2] / total_weight, sums[3] / total_weight];
    let dst_centroid = [sums[4] / total_weight, sums[5] / total_weight, sums[6] / total_weight];

    // cross covariance H = sum w (q - q_mean) (p - p_mean)^T and the reading spread
    let moments = ops::chunked_sum(entries.len(), parallel, |i, acc: &mut [f64; 10]| {
        let c = &entries[i];
        if c.is_valid() {
            let src = p[c.reading];
            let dst = q[c.reference];
            let sc = [src[0] - src_centroid[0], src[1] - src_centroid[1], src[2] - src_centroid[2]];
            let dc = [dst[0] - dst_centroid[0], dst[1] - dst_centroid[1], dst[2] - dst_centroid[2]];
            for r in 0..3 {
                for col in 0..3 {
                    acc[r * 3 + col] += c.weight * dc[r] * sc[col];
                }
            }
            acc[9] += c.weight * (sc[0] * sc[0] + sc[1] * sc[1] + sc[2] * sc[2]);
        }
    });

    if moments.iter().any(|v| !v.is_finite()) || !total_weight.is_finite() {
        return Err(IcpError::NumericalInstability(
            "non finite cross covariance".to_string(),
        ));
    }

    let h = |r: usize, col: usize| moments[r * 3 + col] / total_weight;
    let decomposition = ops::svd(dim, h);

    // a rank one cross covariance leaves the rotation about the common line free
    let (largest, second) = (decomposition.s[0], decomposition.s[1]);
    if dim == 3 && largest > 0.0 && second <= MIN_INVERSE_CONDITION * largest {
        return Err(IcpError::NumericalInstability(
            "matched points are collinear, the rotation is undefined".to_string(),
        ));
    }

    let mut rotation = [[0.0; 3]; 3];
    for (d, row) in rotation.iter_mut().enumerate() {
        row[d] = 1.0;
    }

    let mut trace_sd = 0.0;
    if decomposition.s[0] > 0.0 {
        // R = U diag(1, .., d) V^T with d correcting reflections
        let mut uvt = [[0.0; 3]; 3];
        for r in 0..dim {
            for col in 0..dim {
                uvt[r][col] = (0..dim)
                    .map(|k| decomposition.u.read(r, k) * decomposition.v.read(col, k))
                    .sum();
            }
        }
        let mut correction = [1.0; 3];
        if determinant(&uvt, dim) < 0.0 {
            correction[dim - 1] = -1.0;
        }

        for r in 0..dim {
            for col in 0..dim {
                rotation[r][col] = (0..dim)
                    .map(|k| decomposition.u.read(r, k) * correction[k] * decomposition.v.read(col, k))
                    .sum();
            }
        }
        trace_sd = (0..dim).map(|k| decomposition.s[k] * correction[k]).sum();
    }

    let scale = if with_scale {
        let spread = moments[9] / total_weight;
        if spread <= f64::EPSILON {
            return Err(IcpError::NumericalInstability(
                "reading points collapse to a single location, scale is undefined".to_string(),
            ));
        }
        trace_sd / spread
    } else {
        1.0
    };
    if !(scale.is_finite() && scale > 0.0) {
        return Err(IcpError::NumericalInstability(format!("invalid scale estimate {scale}")));
    }

    let mut linear = rotation;
    let mut translation = dst_centroid;
    for r in 0..dim {
        for col in 0..dim {
            linear[r][col] = scale * rotation[r][col];
            translation[r] -= linear[r][col] * src_centroid[col];
        }
    }
    if dim == 2 {
        translation[2] = 0.0;
    }

    Ok(Transformation::from_rotation_translation(dim, &linear, &translation)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::Correspondence;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn one_to_one(n: usize) -> CorrespondenceSet {
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

    fn random_cloud(n: usize) -> Result<PointCloud, pointreg_3d::PointCloudError> {
        let mut rng = StdRng::seed_from_u64(42);
        let points = (0..n)
            .map(|_| [rng.random::<f64>(), rng.random::<f64>(), rng.random::<f64>()])
            .collect();
        PointCloud::new(points, None, None)
    }

    #[test]
    fn test_fit_transformation_identity() -> Result<(), Box<dyn std::error::Error>> {
        let cloud = random_cloud(30)?;
        let t = minimize(&one_to_one(30), &cloud, &cloud, false, false)?;
        assert_eq!(t, Transformation::identity(3)?);
        Ok(())
    }

    #[test]
    fn test_fit_transformation() -> Result<(), Box<dyn std::error::Error>> {
        let reading = random_cloud(100)?;
        let expected = Transformation::from_axis_angle([1.0, 0.5, -0.2], 0.4, [0.1, -0.3, 0.2])?;
        let reference = reading.transformed(&expected);

        let t = minimize(&one_to_one(100), &reading, &reference, false, true)?;
        let (m, e) = (t.homogeneous(), expected.homogeneous());
        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(m[i][j], e[i][j], epsilon = 1e-9);
            }
        }
        Ok(())
    }

    #[test]
    fn test_fit_transformation_2d() -> Result<(), Box<dyn std::error::Error>> {
        let reading = PointCloud::from_points_2d(vec![[0.0, 0.0], [2.0, 0.0], [0.0, 1.0], [3.0, 2.0]]);
        let expected = Transformation::from_planar(-0.7, 1.0, 0.5);
        let reference = reading.transformed(&expected);

        let t = minimize(&one_to_one(4), &reading, &reference, false, false)?;
        assert_eq!(t.dim(), 2);
        assert_relative_eq!(t.rotation_angle(), 0.7, epsilon = 1e-10);
        assert_relative_eq!(t.translation()[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(t.translation()[1], 0.5, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_zero_weights_are_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let reading = PointCloud::from_points_2d(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [50.0, 50.0]]);
        let reference = PointCloud::from_points_2d(vec![[1.0, 0.0], [2.0, 0.0], [1.0, 1.0], [0.0, 0.0]]);
        let mut set = one_to_one(4);
        set.scale_weights(|c| if c.reading == 3 { 0.0 } else { 1.0 });

        let t = minimize(&set, &reading, &reference, false, false)?;
        assert_relative_eq!(t.translation()[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(t.rotation_angle(), 0.0, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_similarity() -> Result<(), Box<dyn std::error::Error>> {
        let reading = random_cloud(50)?;
        let rigid = Transformation::from_axis_angle([0.0, 0.0, 1.0], 0.3, [0.5, 0.0, -0.1])?;
        let points = reading
            .points()
            .iter()
            .map(|p| rigid.transform_point(&[p[0] * 1.5, p[1] * 1.5, p[2] * 1.5]))
            .collect();
        let reference = PointCloud::new(points, None, None)?;

        let t = minimize(&one_to_one(50), &reading, &reference, true, false)?;
        assert_relative_eq!(t.scale(), 1.5, epsilon = 1e-9);
        assert_relative_eq!(t.rotation_angle(), 0.3, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_collinear_points_fail() -> Result<(), Box<dyn std::error::Error>> {
        let points = (0..10).map(|i| i as f64).map(|t| [t, 2.0 * t, 3.0 * t]).collect::<Vec<_>>();
        let reading = PointCloud::new(points, None, None)?;
        let reference = reading.transformed(&Transformation::from_axis_angle([0.0, 0.0, 1.0], 0.2, [1.0, 0.0, 0.5])?);

        let result = minimize(&one_to_one(10), &reading, &reference, false, false);
        assert!(matches!(result, Err(IcpError::NumericalInstability(_))));
        Ok(())
    }

    #[test]
    fn test_coplanar_points_are_solved() -> Result<(), Box<dyn std::error::Error>> {
        let points = (0..16).map(|i| [(i % 4) as f64, (i / 4) as f64, 0.0]).collect::<Vec<_>>();
        let reading = PointCloud::new(points, None, None)?;
        let expected = Transformation::from_axis_angle([0.0, 0.0, 1.0], 0.3, [0.2, -0.1, 0.0])?;
        let reference = reading.transformed(&expected);

        let t = minimize(&one_to_one(16), &reading, &reference, false, false)?;
        assert_relative_eq!(t.rotation_angle(), 0.3, epsilon = 1e-9);
        assert_relative_eq!(t.translation()[0], 0.2, epsilon = 1e-9);
        Ok(())
    }
}
