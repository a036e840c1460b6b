use pointreg_3d::{linalg::dot3, PointCloud, Transformation};

use super::MIN_INVERSE_CONDITION;
use crate::{correspondence::CorrespondenceSet, error::IcpError, ops};

/// Row stride of the packed normal equations, `A` is stored row major
/// followed by `b`.
const STRIDE: usize = 6;

fn reference_normals(reference: &PointCloud) -> Result<&[[f64; 3]], IcpError> {
    reference.normals().ok_or(IcpError::MissingFeature {
        feature: "normals",
        cloud: "reference",
        stage: "point-to-plane minimizer",
    })
}

/// Jacobian row of one match: rotation terms first, then translation.
fn jacobian_row(centered: &[f64; 3], n: &[f64; 3], dim: usize) -> [f64; STRIDE] {
    if dim == 2 {
        [centered[0] * n[1] - centered[1] * n[0], n[0], n[1], 0.0, 0.0, 0.0]
    } else {
        [
            centered[1] * n[2] - centered[2] * n[1],
            centered[2] * n[0] - centered[0] * n[2],
            centered[0] * n[1] - centered[1] * n[0],
            n[0],
            n[1],
            n[2],
        ]
    }
}

/// Linearised point-to-plane step.
///
/// Minimizes `sum w ((R p + t - q) . n)^2` with `n` the reference normal,
/// using a small angle approximation of `R` around the reading centroid.
/// The system has 6 unknowns in 3D and 3 in 2D.
pub(super) fn minimize(
    set: &CorrespondenceSet,
    reading: &PointCloud,
    reference: &PointCloud,
    parallel: bool,
) -> Result<Transformation, IcpError> {
    let dim = reading.dim();
    let num_vars = if dim == 2 { 3 } else { 6 };
    let normals = reference_normals(reference)?;
    let entries = set.entries();
    let (p, q) = (reading.points(), reference.points());

    let sums = ops::chunked_sum(entries.len(), parallel, |i, acc: &mut [f64; 4]| {
        let c = &entries[i];
        if c.is_valid() {
            acc[0] += c.weight;
            for d in 0..3 {
                acc[1 + d] += c.weight * p[c.reading][d];
            }
        }
    });
    let centroid = [sums[1] / sums[0], sums[2] / sums[0], sums[3] / sums[0]];

    // normal equations A x = b
    let system = ops::chunked_sum(entries.len(), parallel, |i, acc: &mut [f64; STRIDE * STRIDE + STRIDE]| {
        let c = &entries[i];
        if !c.is_valid() {
            return;
        }
        let src = p[c.reading];
        let dst = q[c.reference];
        let n = &normals[c.reference];
        let centered = [src[0] - centroid[0], src[1] - centroid[1], src[2] - centroid[2]];
        let diff = [src[0] - dst[0], src[1] - dst[1], src[2] - dst[2]];
        let residual = dot3(&diff, n);
        let a = jacobian_row(&centered, n, dim);

        for r in 0..num_vars {
            for col in 0..num_vars {
                acc[r * STRIDE + col] += c.weight * a[r] * a[col];
            }
            acc[STRIDE * STRIDE + r] -= c.weight * a[r] * residual;
        }
    });

    if system.iter().any(|v| !v.is_finite()) {
        return Err(IcpError::NumericalInstability(
            "non finite point-to-plane normal equations".to_string(),
        ));
    }

    let decomposition = ops::svd(num_vars, |r, col| system[r * STRIDE + col]);
    let inverse_condition = decomposition.inverse_condition();
    if inverse_condition < MIN_INVERSE_CONDITION {
        return Err(IcpError::NumericalInstability(format!(
            "point-to-plane normal equations are ill conditioned (inverse condition {inverse_condition:e})"
        )));
    }
    let x = decomposition.solve(&system[STRIDE * STRIDE..STRIDE * STRIDE + num_vars]);

    let (omega, step) = if dim == 2 {
        ([0.0, 0.0, x[0]], [x[1], x[2], 0.0])
    } else {
        ([x[0], x[1], x[2]], [x[3], x[4], x[5]])
    };
    let rotation = ops::rotation_from_vector(&omega);

    // x -> R (x - c) + c + t
    let mut translation = [0.0; 3];
    for r in 0..dim {
        let rotated_centroid = (0..3).map(|col| rotation[r][col] * centroid[col]).sum::<f64>();
        translation[r] = centroid[r] + step[r] - rotated_centroid;
    }

    Ok(Transformation::from_rotation_translation(dim, &rotation, &translation)?)
}

/// Weighted mean squared distance to the reference planes after `increment`.
pub(super) fn residual(
    set: &CorrespondenceSet,
    reading: &PointCloud,
    reference: &PointCloud,
    increment: &Transformation,
    parallel: bool,
) -> f64 {
    let Some(normals) = reference.normals() else {
        return f64::NAN;
    };
    let entries = set.entries();
    let (p, q) = (reading.points(), reference.points());

    let [weight, error] = ops::chunked_sum(entries.len(), parallel, |i, acc: &mut [f64; 2]| {
        let c = &entries[i];
        if c.is_valid() {
            let moved = increment.transform_point(&p[c.reading]);
            let dst = q[c.reference];
            let diff = [moved[0] - dst[0], moved[1] - dst[1], moved[2] - dst[2]];
            let distance = dot3(&diff, &normals[c.reference]);
            acc[0] += c.weight;
            acc[1] += c.weight * distance * distance;
        }
    });
    error / weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::Correspondence;
    use approx::assert_relative_eq;

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

    /// Three orthogonal faces of a corner, with their normals.
    fn corner() -> Result<PointCloud, pointreg_3d::PointCloudError> {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for i in 1..6 {
            for j in 1..6 {
                let (u, v) = (i as f64 * 0.2, j as f64 * 0.3);
                points.extend([[0.0, u, v], [u, 0.0, v], [u, v, 0.0]]);
                normals.extend([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
            }
        }
        PointCloud::new(points, None, Some(normals))
    }

    #[test]
    fn test_translation_is_exact() -> Result<(), Box<dyn std::error::Error>> {
        let reference = corner()?;
        let offset = Transformation::from_rotation_translation(
            3,
            &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            &[0.1, -0.2, 0.05],
        )?;
        let reading = reference.transformed(&offset);
        let set = one_to_one(reading.len());

        let t = minimize(&set, &reading, &reference, false)?;
        let expected = offset.inverse().translation();
        for d in 0..3 {
            assert_relative_eq!(t.translation()[d], expected[d], epsilon = 1e-9);
        }
        assert_relative_eq!(residual(&set, &reading, &reference, &t, false), 0.0, epsilon = 1e-18);
        Ok(())
    }

    #[test]
    fn test_small_rotation_converges() -> Result<(), Box<dyn std::error::Error>> {
        let reference = corner()?;
        let motion = Transformation::from_axis_angle([0.3, -0.2, 1.0], 0.05, [0.02, 0.01, -0.03])?;
        let mut reading = reference.transformed(&motion);
        let set = one_to_one(reading.len());

        let mut estimate = Transformation::identity(3)?;
        for _ in 0..5 {
            let step = minimize(&set, &reading, &reference, true)?;
            reading = reading.transformed(&step);
            estimate = step.compose(&estimate);
        }

        let error = estimate.compose(&motion);
        assert_relative_eq!(error.rotation_angle(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(error.translation_norm(), 0.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_single_plane_is_ill_conditioned() -> Result<(), Box<dyn std::error::Error>> {
        let points = (0..25)
            .map(|i| [(i % 5) as f64, (i / 5) as f64, 0.0])
            .collect::<Vec<_>>();
        let normals = vec![[0.0, 0.0, 1.0]; points.len()];
        let reference = PointCloud::new(points, None, Some(normals))?;

        let result = minimize(&one_to_one(25), &reference, &reference, false);
        assert!(matches!(result, Err(IcpError::NumericalInstability(_))));
        Ok(())
    }

    #[test]
    fn test_planar_line_pair() -> Result<(), Box<dyn std::error::Error>> {
        // two perpendicular walls seen from above
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for i in 1..10 {
            points.push([i as f64 * 0.1, 0.0]);
            normals.push([0.0, 1.0, 0.0]);
            points.push([0.0, i as f64 * 0.1]);
            normals.push([1.0, 0.0, 0.0]);
        }
        let reference = PointCloud::from_points_2d(points).with_normals(normals)?;
        let reading = reference.transformed(&Transformation::from_planar(0.0, 0.3, -0.1));

        let t = minimize(&one_to_one(reading.len()), &reading, &reference, false)?;
        assert_eq!(t.dim(), 2);
        assert_relative_eq!(t.translation()[0], -0.3, epsilon = 1e-9);
        assert_relative_eq!(t.translation()[1], 0.1, epsilon = 1e-9);
        Ok(())
    }
}
