use std::collections::BTreeMap;

use crate::{linalg, transformation::Transformation};

/// Error type for point cloud construction and manipulation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PointCloudError {
    /// The operation needs at least one point.
    #[error("Point cloud data is empty")]
    EmptyData,

    /// Only 2D and 3D point clouds are supported.
    #[error("Invalid point cloud dimension {0}, expected 2 or 3")]
    InvalidDimension(usize),

    /// A per-point feature is not aligned with the points.
    #[error("Feature `{feature}` has {actual} entries, expected {expected}")]
    FeatureLength {
        /// Name of the feature.
        feature: String,
        /// Expected number of entries.
        expected: usize,
        /// Number of entries found.
        actual: usize,
    },

    /// A point of a planar cloud has a non-zero z coordinate.
    #[error("Point {0} of a 2D cloud has a non-zero z coordinate")]
    NonPlanarPoint(usize),

    /// A point index is out of bounds.
    #[error("Index {index} out of bounds for a cloud of {len} points")]
    IndexOutOfBounds {
        /// The offending index.
        index: usize,
        /// Number of points in the cloud.
        len: usize,
    },
}

/// A named multi-column per-point feature stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    width: usize,
    values: Vec<f64>,
}

impl Descriptor {
    /// Create a descriptor with `width` values per point.
    pub fn new(width: usize, values: Vec<f64>) -> Self {
        Self { width, values }
    }

    /// Number of values per point.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of points described.
    pub fn len(&self) -> usize {
        match self.width {
            0 => 0,
            w => self.values.len() / w,
        }
    }

    /// Whether the descriptor is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All the values, row-major.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// The values of the i-th point.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.width..(i + 1) * self.width]
    }
}

/// A point cloud with points and optional per-point features.
///
/// Points are stored as `[f64; 3]`; planar clouds (`dim == 2`) keep `z == 0`.
/// Every feature present holds exactly one entry per point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    // The dimension of the cloud, 2 or 3.
    dim: usize,
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The colors of the points.
    colors: Option<Vec<[u8; 3]>>,
    // The normals of the points.
    normals: Option<Vec<[f64; 3]>>,
    // The scalar weights of the points.
    weights: Option<Vec<f64>>,
    // Named descriptors.
    descriptors: BTreeMap<String, Descriptor>,
    // Named integer labels.
    labels: BTreeMap<String, Vec<i64>>,
}

fn check_len(feature: &str, expected: usize, actual: usize) -> Result<(), PointCloudError> {
    if expected != actual {
        return Err(PointCloudError::FeatureLength {
            feature: feature.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

impl PointCloud {
    /// Create a new 3D point cloud from points, colors (optional), and normals (optional).
    pub fn new(
        points: Vec<[f64; 3]>,
        colors: Option<Vec<[u8; 3]>>,
        normals: Option<Vec<[f64; 3]>>,
    ) -> Result<Self, PointCloudError> {
        let mut pc = Self::with_dim(3, points)?;
        if let Some(colors) = colors {
            pc = pc.with_colors(colors)?;
        }
        if let Some(normals) = normals {
            pc = pc.with_normals(normals)?;
        }
        Ok(pc)
    }

    /// Create a point cloud of the given dimension without features.
    ///
    /// Planar clouds must have all z coordinates equal to zero.
    pub fn with_dim(dim: usize, points: Vec<[f64; 3]>) -> Result<Self, PointCloudError> {
        if dim != 2 && dim != 3 {
            return Err(PointCloudError::InvalidDimension(dim));
        }
        if dim == 2 {
            if let Some(i) = points.iter().position(|p| p[2] != 0.0) {
                return Err(PointCloudError::NonPlanarPoint(i));
            }
        }
        Ok(Self {
            dim,
            points,
            colors: None,
            normals: None,
            weights: None,
            descriptors: BTreeMap::new(),
            labels: BTreeMap::new(),
        })
    }

    /// Create a planar point cloud from 2D points.
    pub fn from_points_2d(points: Vec<[f64; 2]>) -> Self {
        Self {
            dim: 2,
            points: points.into_iter().map(|[x, y]| [x, y, 0.0]).collect(),
            colors: None,
            normals: None,
            weights: None,
            descriptors: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Attach colors to the points.
    pub fn with_colors(mut self, colors: Vec<[u8; 3]>) -> Result<Self, PointCloudError> {
        check_len("colors", self.len(), colors.len())?;
        self.colors = Some(colors);
        Ok(self)
    }

    /// Attach normals to the points.
    pub fn with_normals(mut self, normals: Vec<[f64; 3]>) -> Result<Self, PointCloudError> {
        check_len("normals", self.len(), normals.len())?;
        self.normals = Some(normals);
        Ok(self)
    }

    /// Attach scalar weights to the points.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self, PointCloudError> {
        check_len("weights", self.len(), weights.len())?;
        self.weights = Some(weights);
        Ok(self)
    }

    /// Attach a named descriptor with `width` values per point.
    pub fn with_descriptor(
        mut self,
        name: impl Into<String>,
        width: usize,
        values: Vec<f64>,
    ) -> Result<Self, PointCloudError> {
        let name = name.into();
        check_len(&name, self.len() * width, values.len())?;
        self.descriptors.insert(name, Descriptor::new(width, values));
        Ok(self)
    }

    /// Attach a named integer label to the points.
    pub fn with_label(
        mut self,
        name: impl Into<String>,
        values: Vec<i64>,
    ) -> Result<Self, PointCloudError> {
        let name = name.into();
        check_len(&name, self.len(), values.len())?;
        self.labels.insert(name, values);
        Ok(self)
    }

    /// Replace the normals, keeping everything else.
    pub fn set_normals(&mut self, normals: Vec<[f64; 3]>) -> Result<(), PointCloudError> {
        check_len("normals", self.len(), normals.len())?;
        self.normals = Some(normals);
        Ok(())
    }

    /// Get the dimension of the point cloud.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Get as reference the normals of the points in the point cloud.
    pub fn normals(&self) -> Option<&[[f64; 3]]> {
        self.normals.as_deref()
    }

    /// Get as reference the weights of the points in the point cloud.
    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    /// Get a named descriptor.
    pub fn descriptor(&self, name: &str) -> Option<&Descriptor> {
        self.descriptors.get(name)
    }

    /// All the named descriptors.
    pub fn descriptors(&self) -> &BTreeMap<String, Descriptor> {
        &self.descriptors
    }

    /// Get a named label.
    pub fn label(&self, name: &str) -> Option<&[i64]> {
        self.labels.get(name).map(|v| v.as_slice())
    }

    /// All the named labels.
    pub fn labels(&self) -> &BTreeMap<String, Vec<i64>> {
        &self.labels
    }

    /// Build a new cloud with the points at `indices`, keeping every feature aligned.
    pub fn select(&self, indices: &[usize]) -> Result<Self, PointCloudError> {
        let len = self.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(PointCloudError::IndexOutOfBounds { index, len });
        }

        let pick = |i: &usize| self.points[*i];
        Ok(Self {
            dim: self.dim,
            points: indices.iter().map(pick).collect(),
            colors: self
                .colors
                .as_ref()
                .map(|c| indices.iter().map(|&i| c[i]).collect()),
            normals: self
                .normals
                .as_ref()
                .map(|n| indices.iter().map(|&i| n[i]).collect()),
            weights: self
                .weights
                .as_ref()
                .map(|w| indices.iter().map(|&i| w[i]).collect()),
            descriptors: self
                .descriptors
                .iter()
                .map(|(name, desc)| {
                    let values = indices
                        .iter()
                        .flat_map(|&i| desc.row(i).iter().copied())
                        .collect();
                    (name.clone(), Descriptor::new(desc.width(), values))
                })
                .collect(),
            labels: self
                .labels
                .iter()
                .map(|(name, values)| (name.clone(), indices.iter().map(|&i| values[i]).collect()))
                .collect(),
        })
    }

    /// Transform the points and normals in place.
    pub fn transform_mut(&mut self, transformation: &Transformation) {
        let src = self.points.clone();
        linalg::transform_points(&src, transformation.matrix(), &mut self.points);
        if let Some(normals) = self.normals.as_mut() {
            let src = normals.clone();
            linalg::rotate_normals(&src, transformation.matrix(), normals);
        }
    }

    /// Return a transformed copy of the cloud.
    pub fn transformed(&self, transformation: &Transformation) -> Self {
        let mut out = self.clone();
        out.transform_mut(transformation);
        out
    }

    /// Get the minimum bound of the point cloud.
    pub fn min_bound(&self) -> Result<[f64; 3], PointCloudError> {
        let first = *self.points.first().ok_or(PointCloudError::EmptyData)?;
        Ok(self.points.iter().fold(first, |a, b| {
            [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])]
        }))
    }

    /// Get the maximum bound of the point cloud.
    pub fn max_bound(&self) -> Result<[f64; 3], PointCloudError> {
        let first = *self.points.first().ok_or(PointCloudError::EmptyData)?;
        Ok(self.points.iter().fold(first, |a, b| {
            [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])]
        }))
    }

    /// Get the centroid of the point cloud.
    pub fn centroid(&self) -> Result<[f64; 3], PointCloudError> {
        if self.points.is_empty() {
            return Err(PointCloudError::EmptyData);
        }
        let sum = self.points.iter().fold([0.0; 3], |acc, p| {
            [acc[0] + p[0], acc[1] + p[1], acc[2] + p[2]]
        });
        let n = self.points.len() as f64;
        Ok([sum[0] / n, sum[1] / n, sum[2] / n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointcloud() -> Result<(), PointCloudError> {
        let pointcloud = PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            Some(vec![[255, 0, 0], [0, 255, 0]]),
            Some(vec![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]),
        )?;

        assert_eq!(pointcloud.len(), 2);
        assert_eq!(pointcloud.dim(), 3);
        assert_eq!(pointcloud.points().len(), 2);

        if let Some(colors) = pointcloud.colors() {
            assert_eq!(colors.len(), 2);
        }
        if let Some(normals) = pointcloud.normals() {
            assert_eq!(normals.len(), 2);
        }

        assert_eq!(pointcloud.min_bound()?, [0.0, 0.0, 0.0]);
        assert_eq!(pointcloud.max_bound()?, [1.0, 0.0, 0.0]);
        assert_eq!(pointcloud.centroid()?, [0.5, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_feature_length_mismatch() {
        let res = PointCloud::new(vec![[0.0; 3], [1.0; 3]], None, Some(vec![[0.0, 0.0, 1.0]]));
        assert!(matches!(
            res,
            Err(PointCloudError::FeatureLength {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_planar_validation() {
        assert!(matches!(
            PointCloud::with_dim(2, vec![[0.0, 0.0, 0.0], [1.0, 1.0, 0.5]]),
            Err(PointCloudError::NonPlanarPoint(1))
        ));
        assert!(matches!(
            PointCloud::with_dim(4, vec![]),
            Err(PointCloudError::InvalidDimension(4))
        ));

        let pc = PointCloud::from_points_2d(vec![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(pc.dim(), 2);
        assert_eq!(pc.points()[1], [3.0, 4.0, 0.0]);
    }

    #[test]
    fn test_select_keeps_features_aligned() -> Result<(), PointCloudError> {
        let pc = PointCloud::from_points_2d(vec![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]])
            .with_weights(vec![0.1, 0.2, 0.3])?
            .with_descriptor("intensity", 2, vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0])?
            .with_label("segment", vec![7, 8, 9])?;

        let sub = pc.select(&[2, 0])?;
        assert_eq!(sub.points(), &[[2.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        assert_eq!(sub.weights(), Some(&[0.3, 0.1][..]));
        let desc = sub.descriptor("intensity").ok_or(PointCloudError::EmptyData)?;
        assert_eq!(desc.row(0), &[3.0, 30.0]);
        assert_eq!(desc.row(1), &[1.0, 10.0]);
        assert_eq!(sub.label("segment"), Some(&[9, 7][..]));

        assert!(matches!(
            pc.select(&[3]),
            Err(PointCloudError::IndexOutOfBounds { index: 3, len: 3 })
        ));
        Ok(())
    }

    #[test]
    fn test_transform_updates_normals() -> Result<(), Box<dyn std::error::Error>> {
        let pc = PointCloud::new(vec![[1.0, 0.0, 0.0]], None, Some(vec![[1.0, 0.0, 0.0]]))?;
        let t = Transformation::from_axis_angle(
            [0.0, 0.0, 1.0],
            std::f64::consts::FRAC_PI_2,
            [0.0, 0.0, 1.0],
        )?;
        let out = pc.transformed(&t);

        let p = out.points()[0];
        assert!((p[0]).abs() < 1e-12 && (p[1] - 1.0).abs() < 1e-12 && (p[2] - 1.0).abs() < 1e-12);
        let n = out.normals().ok_or("missing normals")?[0];
        assert!((n[0]).abs() < 1e-12 && (n[1] - 1.0).abs() < 1e-12 && n[2].abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_empty_bounds() {
        let pc = PointCloud::from_points_2d(vec![]);
        assert!(matches!(pc.centroid(), Err(PointCloudError::EmptyData)));
    }
}
