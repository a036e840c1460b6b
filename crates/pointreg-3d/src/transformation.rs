use glam::{DMat3, DMat4, DVec3, DVec4};

/// Error type for transformation construction.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransformationError {
    /// Only 2D and 3D transformations are supported.
    #[error("Invalid transformation dimension {0}, expected 2 or 3")]
    InvalidDimension(usize),

    /// The homogeneous matrix does not have (D+1)x(D+1) entries.
    #[error("Homogeneous matrix must be {expected}x{expected}, got {rows}x{cols}")]
    InvalidShape {
        /// Expected number of rows and columns.
        expected: usize,
        /// Number of rows found.
        rows: usize,
        /// Number of columns found in the first offending row.
        cols: usize,
    },

    /// The rotation axis has zero length.
    #[error("Cannot compute a rotation from a zero axis")]
    ZeroAxis,

    /// The rotation block is not orthonormal.
    #[error("Transformation is not rigid, orthonormality error {0}")]
    NotRigid(f64),
}

/// A homogeneous (D+1)x(D+1) transformation with D = 2 or 3.
///
/// Internally the matrix is always stored as a 4x4; planar transformations keep
/// the z row and column equal to the identity so they never move points out of
/// the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transformation {
    dim: usize,
    matrix: DMat4,
}

fn check_dim(dim: usize) -> Result<(), TransformationError> {
    match dim {
        2 | 3 => Ok(()),
        _ => Err(TransformationError::InvalidDimension(dim)),
    }
}

impl Transformation {
    /// The identity transformation in `dim` dimensions.
    pub fn identity(dim: usize) -> Result<Self, TransformationError> {
        check_dim(dim)?;
        Ok(Self {
            dim,
            matrix: DMat4::IDENTITY,
        })
    }

    /// Create a transformation from a row-major linear block and a translation.
    ///
    /// For `dim == 2` only the upper-left 2x2 block and the first two translation
    /// components are used.
    pub fn from_rotation_translation(
        dim: usize,
        rotation: &[[f64; 3]; 3],
        translation: &[f64; 3],
    ) -> Result<Self, TransformationError> {
        check_dim(dim)?;
        let matrix = if dim == 2 {
            DMat4::from_cols(
                DVec4::new(rotation[0][0], rotation[1][0], 0.0, 0.0),
                DVec4::new(rotation[0][1], rotation[1][1], 0.0, 0.0),
                DVec4::Z,
                DVec4::new(translation[0], translation[1], 0.0, 1.0),
            )
        } else {
            DMat4::from_cols(
                DVec4::new(rotation[0][0], rotation[1][0], rotation[2][0], 0.0),
                DVec4::new(rotation[0][1], rotation[1][1], rotation[2][1], 0.0),
                DVec4::new(rotation[0][2], rotation[1][2], rotation[2][2], 0.0),
                DVec4::new(translation[0], translation[1], translation[2], 1.0),
            )
        };
        Ok(Self { dim, matrix })
    }

    /// Create a transformation from the rows of a (D+1)x(D+1) homogeneous matrix.
    pub fn from_homogeneous(rows: &[Vec<f64>]) -> Result<Self, TransformationError> {
        let size = rows.len();
        if !(3..=4).contains(&size) {
            return Err(TransformationError::InvalidDimension(size.saturating_sub(1)));
        }
        if let Some(row) = rows.iter().find(|row| row.len() != size) {
            return Err(TransformationError::InvalidShape {
                expected: size,
                rows: size,
                cols: row.len(),
            });
        }

        let dim = size - 1;
        let mut rotation = [[0.0; 3]; 3];
        let mut translation = [0.0; 3];
        for i in 0..dim {
            rotation[i][..dim].copy_from_slice(&rows[i][..dim]);
            translation[i] = rows[i][dim];
        }
        Self::from_rotation_translation(dim, &rotation, &translation)
    }

    /// Create a 3D transformation from an axis, an angle in radians and a translation.
    ///
    /// Example:
    ///
    /// ```
    /// use pointreg_3d::Transformation;
    ///
    /// let t = Transformation::from_axis_angle([0.0, 0.0, 2.0], 0.5, [1.0, 0.0, 0.0]).unwrap();
    /// assert!((t.rotation_angle() - 0.5).abs() < 1e-12);
    /// ```
    pub fn from_axis_angle(
        axis: [f64; 3],
        angle: f64,
        translation: [f64; 3],
    ) -> Result<Self, TransformationError> {
        let axis = DVec3::from_array(axis)
            .try_normalize()
            .ok_or(TransformationError::ZeroAxis)?;
        let rotation = DMat4::from_axis_angle(axis, angle);
        Ok(Self {
            dim: 3,
            matrix: DMat4::from_translation(DVec3::from_array(translation)) * rotation,
        })
    }

    /// Create a 2D transformation from a rotation angle and a translation.
    pub fn from_planar(angle: f64, tx: f64, ty: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self {
            dim: 2,
            matrix: DMat4::from_cols(
                DVec4::new(c, s, 0.0, 0.0),
                DVec4::new(-s, c, 0.0, 0.0),
                DVec4::Z,
                DVec4::new(tx, ty, 0.0, 1.0),
            ),
        }
    }

    /// Dimension of the space the transformation acts on.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The underlying 4x4 matrix.
    #[inline]
    pub fn matrix(&self) -> &DMat4 {
        &self.matrix
    }

    /// The rows of the (D+1)x(D+1) homogeneous matrix.
    pub fn homogeneous(&self) -> Vec<Vec<f64>> {
        let mut idx = (0..self.dim).collect::<Vec<_>>();
        idx.push(3);
        idx.iter()
            .map(|&i| {
                let row = self.matrix.row(i);
                idx.iter().map(|&j| row[j]).collect()
            })
            .collect()
    }

    /// The 3x3 linear block in row-major order.
    pub fn rotation(&self) -> [[f64; 3]; 3] {
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, val) in row.iter_mut().enumerate() {
                *val = self.matrix.col(j)[i];
            }
        }
        out
    }

    /// The translation part.
    pub fn translation(&self) -> [f64; 3] {
        self.matrix.w_axis.truncate().to_array()
    }

    /// Euclidean norm of the translation.
    pub fn translation_norm(&self) -> f64 {
        self.matrix.w_axis.truncate().length()
    }

    fn linear_block(&self) -> DMat3 {
        DMat3::from_mat4(self.matrix)
    }

    /// Uniform scale of the linear block, 1 for rigid transformations.
    pub fn scale(&self) -> f64 {
        self.linear_block()
            .determinant()
            .abs()
            .powf(1.0 / self.dim as f64)
    }

    /// Rotation angle in radians of the linear block, with the scale removed.
    pub fn rotation_angle(&self) -> f64 {
        if self.dim == 2 {
            return self.matrix.x_axis.y.atan2(self.matrix.x_axis.x).abs();
        }
        let scale = self.scale();
        if scale <= f64::EPSILON {
            return 0.0;
        }
        let r = self.linear_block() * (1.0 / scale);
        let trace = r.x_axis.x + r.y_axis.y + r.z_axis.z;
        ((trace - 1.0) * 0.5).clamp(-1.0, 1.0).acos()
    }

    /// Compose two transformations, `self * other`: `other` is applied first.
    pub fn compose(&self, other: &Transformation) -> Transformation {
        debug_assert_eq!(self.dim, other.dim);
        Self {
            dim: self.dim,
            matrix: self.matrix * other.matrix,
        }
    }

    /// The inverse transformation.
    pub fn inverse(&self) -> Transformation {
        Self {
            dim: self.dim,
            matrix: self.matrix.inverse(),
        }
    }

    /// Apply the transformation to a point.
    #[inline]
    pub fn transform_point(&self, point: &[f64; 3]) -> [f64; 3] {
        self.matrix
            .transform_point3(DVec3::from_array(*point))
            .to_array()
    }

    /// Apply only the linear block to a direction vector.
    #[inline]
    pub fn rotate_vector(&self, vector: &[f64; 3]) -> [f64; 3] {
        self.matrix
            .transform_vector3(DVec3::from_array(*vector))
            .to_array()
    }

    /// Largest absolute deviation of `RᵀR` from the identity, `f64::INFINITY` for reflections.
    pub fn orthonormality_error(&self) -> f64 {
        let r = self.linear_block();
        if r.determinant() <= 0.0 {
            return f64::INFINITY;
        }
        let gram = r.transpose() * r - DMat3::IDENTITY;
        gram.to_cols_array()
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    /// Check that the linear block is a proper rotation within `tolerance`.
    pub fn is_rigid(&self, tolerance: f64) -> bool {
        self.orthonormality_error() <= tolerance
    }

    /// Same as [`Transformation::is_rigid`] but reports the error.
    pub fn check_rigid(&self, tolerance: f64) -> Result<(), TransformationError> {
        let err = self.orthonormality_error();
        match err <= tolerance {
            true => Ok(()),
            false => Err(TransformationError::NotRigid(err)),
        }
    }

    /// Re-project the linear block onto the closest proper rotation (Gram-Schmidt).
    pub fn orthonormalized(&self) -> Transformation {
        let r = self.linear_block();
        let x = r.x_axis.try_normalize().unwrap_or(DVec3::X);
        let y = (r.y_axis - x * x.dot(r.y_axis))
            .try_normalize()
            .unwrap_or_else(|| x.any_orthonormal_vector());
        let z = x.cross(y);

        let mut matrix = self.matrix;
        matrix.x_axis = x.extend(0.0);
        matrix.y_axis = y.extend(0.0);
        matrix.z_axis = z.extend(0.0);
        Self {
            dim: self.dim,
            matrix,
        }
    }
}
