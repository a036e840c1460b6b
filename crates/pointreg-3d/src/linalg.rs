use glam::{DMat4, DVec3};

/// Transform a set of points using a homogeneous matrix.
///
/// # Arguments
///
/// * `src_points` - A set of points to be transformed.
/// * `dst_m_src` - The homogeneous matrix mapping the source frame to the destination frame.
/// * `dst_points` - A pre-allocated vector to store the transformed points.
///
/// PRECONDITION: dst_points is a pre-allocated vector of the same size as source.
///
/// Example:
///
/// ```
/// use glam::{DMat4, DVec3};
/// use pointreg_3d::linalg::transform_points;
///
/// let src_points = vec![[2.0, 2.0, 2.0], [3.0, 4.0, 5.0]];
/// let dst_m_src = DMat4::from_translation(DVec3::new(1.0, 0.0, 0.0));
/// let mut dst_points = vec![[0.0; 3]; src_points.len()];
/// transform_points(&src_points, &dst_m_src, &mut dst_points);
/// assert_eq!(dst_points[0], [3.0, 2.0, 2.0]);
/// ```
pub fn transform_points(src_points: &[[f64; 3]], dst_m_src: &DMat4, dst_points: &mut [[f64; 3]]) {
    assert_eq!(src_points.len(), dst_points.len());

    for (point_dst, point_src) in dst_points.iter_mut().zip(src_points.iter()) {
        let p = dst_m_src.transform_point3(DVec3::from_array(*point_src));
        *point_dst = p.to_array();
    }
}

/// Rotate a set of direction vectors and re-normalize them.
///
/// Only the linear block of `dst_m_src` is applied, so translations do not
/// affect the result. Zero vectors are left untouched.
pub fn rotate_normals(src_normals: &[[f64; 3]], dst_m_src: &DMat4, dst_normals: &mut [[f64; 3]]) {
    assert_eq!(src_normals.len(), dst_normals.len());

    for (normal_dst, normal_src) in dst_normals.iter_mut().zip(src_normals.iter()) {
        let n = dst_m_src.transform_vector3(DVec3::from_array(*normal_src));
        *normal_dst = n.try_normalize().unwrap_or(n).to_array();
    }
}

/// Squared euclidean distance between two points.
#[inline]
pub fn squared_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// Dot product of two 3-vectors.
#[inline]
pub fn dot3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
