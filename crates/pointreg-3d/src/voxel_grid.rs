use std::collections::BTreeMap;

use glam::DVec3;

use crate::pointcloud::{Descriptor, PointCloud, PointCloudError};

/// A voxel grid for downsampling point clouds.
///
/// Voxels are visited in key order, so the output is deterministic.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    /// The size of the voxel (leaf) in x, y, z dimensions.
    leaf_size: DVec3,
    /// Minimum number of points required per voxel.
    min_points_per_voxel: usize,
}

impl VoxelGrid {
    /// Creates a new `VoxelGrid` with the specified leaf size.
    ///
    /// # Arguments
    /// * `leaf_size` - The size of the voxel in x, y, z dimensions.
    ///
    /// # Returns
    /// `None` if any dimension of `leaf_size` is not strictly positive.
    pub fn new(leaf_size: [f64; 3]) -> Option<Self> {
        let leaf_size = DVec3::from_array(leaf_size);
        if !(leaf_size.cmpgt(DVec3::ZERO).all() && leaf_size.is_finite()) {
            return None;
        }
        Some(VoxelGrid {
            leaf_size,
            min_points_per_voxel: 1,
        })
    }

    /// Set the minimum number of points a voxel needs to produce an output point.
    pub fn with_min_points_per_voxel(mut self, min_points: usize) -> Self {
        self.min_points_per_voxel = min_points.max(1);
        self
    }

    fn voxel_key(&self, point: &[f64; 3]) -> [i64; 3] {
        let p = DVec3::from_array(*point) / self.leaf_size;
        [p.x.floor() as i64, p.y.floor() as i64, p.z.floor() as i64]
    }

    /// Downsamples the input point cloud by grouping points into voxels and computing centroids.
    ///
    /// Normals, colors, weights and descriptors are averaged per voxel, labels
    /// keep the value of the first point of each voxel.
    ///
    /// # Arguments
    /// * `point_cloud` - The input point cloud to downsample.
    ///
    /// # Returns
    /// A new `PointCloud` containing one point per occupied voxel.
    pub fn downsample(&self, point_cloud: &PointCloud) -> Result<PointCloud, PointCloudError> {
        let mut grid: BTreeMap<[i64; 3], Vec<usize>> = BTreeMap::new();
        for (i, point) in point_cloud.points().iter().enumerate() {
            grid.entry(self.voxel_key(point)).or_default().push(i);
        }

        let groups = grid
            .into_values()
            .filter(|members| members.len() >= self.min_points_per_voxel)
            .collect::<Vec<_>>();

        let points = groups
            .iter()
            .map(|members| mean3(members.iter().map(|&i| point_cloud.points()[i])))
            .collect::<Vec<_>>();

        let mut out = PointCloud::with_dim(point_cloud.dim(), points)?;

        if let Some(normals) = point_cloud.normals() {
            let averaged = groups
                .iter()
                .map(|members| {
                    let n = DVec3::from_array(mean3(members.iter().map(|&i| normals[i])));
                    n.try_normalize().unwrap_or(n).to_array()
                })
                .collect();
            out = out.with_normals(averaged)?;
        }

        if let Some(colors) = point_cloud.colors() {
            let averaged = groups
                .iter()
                .map(|members| {
                    let c = mean3(members.iter().map(|&i| {
                        let c = colors[i];
                        [c[0] as f64, c[1] as f64, c[2] as f64]
                    }));
                    [c[0].round() as u8, c[1].round() as u8, c[2].round() as u8]
                })
                .collect();
            out = out.with_colors(averaged)?;
        }

        if let Some(weights) = point_cloud.weights() {
            let averaged = groups
                .iter()
                .map(|members| members.iter().map(|&i| weights[i]).sum::<f64>() / members.len() as f64)
                .collect();
            out = out.with_weights(averaged)?;
        }

        for (name, desc) in point_cloud.descriptors() {
            let averaged = average_descriptor(desc, &groups);
            out = out.with_descriptor(name.clone(), desc.width(), averaged)?;
        }

        for (name, values) in point_cloud.labels() {
            let first = groups.iter().map(|members| values[members[0]]).collect();
            out = out.with_label(name.clone(), first)?;
        }

        Ok(out)
    }
}

fn mean3(values: impl Iterator<Item = [f64; 3]>) -> [f64; 3] {
    let (sum, count) = values.fold((DVec3::ZERO, 0usize), |(acc, n), v| {
        (acc + DVec3::from_array(v), n + 1)
    });
    (sum / count.max(1) as f64).to_array()
}

fn average_descriptor(desc: &Descriptor, groups: &[Vec<usize>]) -> Vec<f64> {
    let width = desc.width();
    let mut out = Vec::with_capacity(groups.len() * width);
    for members in groups {
        let inv_count = 1.0 / members.len() as f64;
        for col in 0..width {
            let sum = members.iter().map(|&i| desc.row(i)[col]).sum::<f64>();
            out.push(sum * inv_count);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_invalid_leaf_size() {
        assert!(VoxelGrid::new([0.0, 1.0, 1.0]).is_none());
        assert!(VoxelGrid::new([1.0, -1.0, 1.0]).is_none());
        assert!(VoxelGrid::new([1.0, 1.0, 1.0]).is_some());
    }

    #[test]
    fn test_downsample_centroids() -> Result<(), Box<dyn std::error::Error>> {
        let points = vec![
            [0.1, 0.1, 0.1],
            [0.3, 0.3, 0.3],
            [1.5, 1.5, 1.5],
            [1.7, 1.7, 1.7],
        ];
        let colors = vec![[10, 20, 30], [30, 40, 50], [0, 0, 0], [255, 255, 255]];
        let normals = vec![
            [1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        let pc = PointCloud::new(points, Some(colors), Some(normals))?
            .with_label("id", vec![1, 2, 3, 4])?;

        let grid = VoxelGrid::new([1.0, 1.0, 1.0]).ok_or("invalid leaf size")?;
        let out = grid.downsample(&pc)?;

        assert_eq!(out.len(), 2);
        assert_relative_eq!(out.points()[0][0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(out.points()[1][2], 1.6, epsilon = 1e-12);
        assert_eq!(out.colors().ok_or("colors")?[0], [20, 30, 40]);
        assert_eq!(out.normals().ok_or("normals")?[1], [0.0, 1.0, 0.0]);
        assert_eq!(out.label("id"), Some(&[1, 3][..]));
        Ok(())
    }

    #[test]
    fn test_min_points_per_voxel() -> Result<(), Box<dyn std::error::Error>> {
        let pc = PointCloud::from_points_2d(vec![[0.1, 0.1], [0.2, 0.2], [5.0, 5.0]]);
        let grid = VoxelGrid::new([1.0, 1.0, 1.0])
            .ok_or("invalid leaf size")?
            .with_min_points_per_voxel(2);
        let out = grid.downsample(&pc)?;
        assert_eq!(out.len(), 1);
        assert_eq!(out.dim(), 2);
        assert_relative_eq!(out.points()[0][1], 0.15, epsilon = 1e-12);
        Ok(())
    }
}
