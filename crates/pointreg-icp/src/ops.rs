use rayon::prelude::*;

/// Number of terms folded by one worker before partial sums are combined.
///
/// Fixed so the reduction tree does not depend on the thread count.
pub(crate) const CHUNK_SIZE: usize = 1024;

/// Sum `N` accumulators over `0..len` in a fixed reduction order.
///
/// Each chunk of [`CHUNK_SIZE`] items is folded sequentially, then the chunk
/// partials are added in chunk order. Parallel and sequential runs give
/// bit-identical results.
pub(crate) fn chunked_sum<const N: usize, F>(len: usize, parallel: bool, term: F) -> [f64; N]
where
    F: Fn(usize, &mut [f64; N]) + Sync,
{
    let num_chunks = len.div_ceil(CHUNK_SIZE);
    let fold_chunk = |chunk: usize| {
        let mut acc = [0.0; N];
        let end = ((chunk + 1) * CHUNK_SIZE).min(len);
        for i in chunk * CHUNK_SIZE..end {
            term(i, &mut acc);
        }
        acc
    };

    let partials: Vec<[f64; N]> = if parallel {
        (0..num_chunks).into_par_iter().map(fold_chunk).collect()
    } else {
        (0..num_chunks).map(fold_chunk).collect()
    };

    let mut total = [0.0; N];
    for partial in &partials {
        for (t, p) in total.iter_mut().zip(partial.iter()) {
            *t += p;
        }
    }
    total
}

/// Singular value decomposition of a small square matrix, `A = U diag(s) V^T`.
pub(crate) struct Svd {
    pub u: faer::Mat<f64>,
    /// Singular values in non-increasing order.
    pub s: Vec<f64>,
    pub v: faer::Mat<f64>,
}

/// Decompose the `n x n` matrix whose entries are given by `entry(row, col)`.
pub(crate) fn svd(n: usize, entry: impl Fn(usize, usize) -> f64) -> Svd {
    let m = faer::Mat::<f64>::from_fn(n, n, entry);
    let decomposition = m.svd();
    let s = (0..n).map(|i| decomposition.s_diagonal().read(i)).collect();
    Svd {
        u: decomposition.u().to_owned(),
        s,
        v: decomposition.v().to_owned(),
    }
}

impl Svd {
    /// Ratio of the smallest to the largest singular value, `0` for a null matrix.
    pub fn inverse_condition(&self) -> f64 {
        let s_max = self.s.first().copied().unwrap_or(0.0);
        let s_min = self.s.last().copied().unwrap_or(0.0);
        if s_max > 0.0 {
            s_min / s_max
        } else {
            0.0
        }
    }

    /// Solve `A x = b` through the pseudo inverse `V diag(1/s) U^T`.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.s.len();
        let mut x = vec![0.0; n];
        for k in 0..n {
            if self.s[k] <= 0.0 {
                continue;
            }
            let ut_b = (0..n).map(|i| self.u.read(i, k) * b[i]).sum::<f64>() / self.s[k];
            for (j, xj) in x.iter_mut().enumerate() {
                *xj += self.v.read(j, k) * ut_b;
            }
        }
        x
    }
}

/// Rotation matrix (row major) from a rotation vector, identity for a null vector.
pub(crate) fn rotation_from_vector(omega: &[f64; 3]) -> [[f64; 3]; 3] {
    let angle = (omega[0] * omega[0] + omega[1] * omega[1] + omega[2] * omega[2]).sqrt();
    if angle == 0.0 {
        return [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    }
    let [x, y, z] = [omega[0] / angle, omega[1] / angle, omega[2] / angle];
    let (sin, cos) = angle.sin_cos();
    let t = 1.0 - cos;
    [
        [t * x * x + cos, t * x * y - sin * z, t * x * z + sin * y],
        [t * x * y + sin * z, t * y * y + cos, t * y * z - sin * x],
        [t * x * z - sin * y, t * y * z + sin * x, t * z * z + cos],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_chunked_sum_matches_sequential() {
        let len = 3 * CHUNK_SIZE + 17;
        let term = |i: usize, acc: &mut [f64; 2]| {
            acc[0] += 1.0;
            acc[1] += (i as f64).sqrt() * 0.1;
        };
        let parallel = chunked_sum(len, true, term);
        let sequential = chunked_sum(len, false, term);
        assert_eq!(parallel[0], len as f64);
        assert_eq!(parallel[1].to_bits(), sequential[1].to_bits());
    }

    #[test]
    fn test_chunked_sum_empty() {
        let total = chunked_sum::<3, _>(0, true, |_, acc| acc[0] += 1.0);
        assert_eq!(total, [0.0; 3]);
    }

    #[test]
    fn test_svd_solve() {
        // symmetric positive definite system
        let a = [[4.0, 1.0, 0.0], [1.0, 3.0, 0.5], [0.0, 0.5, 2.0]];
        let x_true = [1.0, -2.0, 0.5];
        let b = (0..3)
            .map(|i| (0..3).map(|j| a[i][j] * x_true[j]).sum::<f64>())
            .collect::<Vec<_>>();

        let decomposition = svd(3, |i, j| a[i][j]);
        assert!(decomposition.inverse_condition() > 0.1);
        let x = decomposition.solve(&b);
        for i in 0..3 {
            assert_relative_eq!(x[i], x_true[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn test_svd_singular() {
        let decomposition = svd(2, |i, _| if i == 0 { 1.0 } else { 0.0 });
        assert!(decomposition.inverse_condition() < 1e-12);
    }

    #[test]
    fn test_rotation_from_vector() {
        let r = rotation_from_vector(&[0.0, 0.0, std::f64::consts::FRAC_PI_2]);
        assert_relative_eq!(r[0][1], -1.0, epsilon = 1e-12);
        assert_relative_eq!(r[1][0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(r[2][2], 1.0, epsilon = 1e-12);
        assert_eq!(rotation_from_vector(&[0.0; 3])[1][1], 1.0);
    }
}
