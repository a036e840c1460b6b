use pointreg_3d::{PointCloud, VoxelGrid};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::FilterError;

fn keep_where(cloud: &PointCloud, keep: impl Fn(usize, &[f64; 3]) -> bool) -> Result<PointCloud, FilterError> {
    let indices = cloud
        .points()
        .iter()
        .enumerate()
        .filter(|(i, p)| keep(*i, p))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    Ok(cloud.select(&indices)?)
}

pub(super) fn remove_non_finite(cloud: &PointCloud) -> Result<PointCloud, FilterError> {
    keep_where(cloud, |_, p| p.iter().all(|v| v.is_finite()))
}

pub(super) fn bounding_box(
    cloud: &PointCloud,
    min: &[f64; 3],
    max: &[f64; 3],
    remove_inside: bool,
) -> Result<PointCloud, FilterError> {
    let dim = cloud.dim();
    keep_where(cloud, |_, p| {
        let inside = (0..dim).all(|d| p[d] >= min[d] && p[d] <= max[d]);
        inside != remove_inside
    })
}

pub(super) fn fix_step(cloud: &PointCloud, step: usize) -> Result<PointCloud, FilterError> {
    let step = step.max(1);
    keep_where(cloud, |i, _| i % step == 0)
}

pub(super) fn random(cloud: &PointCloud, probability: f64, seed: u64) -> Result<PointCloud, FilterError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let draws = (0..cloud.len())
        .map(|_| rng.random::<f64>() < probability)
        .collect::<Vec<_>>();
    keep_where(cloud, |i, _| draws[i])
}

pub(super) fn voxel_grid(
    cloud: &PointCloud,
    leaf_size: f64,
    min_points_per_voxel: usize,
) -> Result<PointCloud, FilterError> {
    let Some(grid) = VoxelGrid::new([leaf_size; 3]) else {
        return Ok(cloud.clone());
    };
    Ok(grid
        .with_min_points_per_voxel(min_points_per_voxel)
        .downsample(cloud)?)
}
