#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Linear algebra kernels over point arrays.
pub mod linalg;

/// Point cloud container with per-point features.
pub mod pointcloud;

/// Homogeneous transformations in 2D and 3D.
pub mod transformation;

/// Voxel grid downsampling.
pub mod voxel_grid;

pub use pointcloud::{Descriptor, PointCloud, PointCloudError};
pub use transformation::{Transformation, TransformationError};
pub use voxel_grid::VoxelGrid;
