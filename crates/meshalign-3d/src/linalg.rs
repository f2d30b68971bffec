use glam::DVec3;

use crate::transforms::RigidTransform;

/// Write `transform` applied to every point of `src_points` into `dst_points`.
///
/// Panics if the two slices differ in length.
///
/// ```
/// use meshalign_3d::{linalg::transform_points, transforms::RigidTransform};
///
/// let src_points = vec![[2.0, 2.0, 2.0], [3.0, 4.0, 5.0]];
/// let mut dst_points = vec![[0.0; 3]; src_points.len()];
/// transform_points(&src_points, &RigidTransform::IDENTITY, &mut dst_points);
/// assert_eq!(src_points, dst_points);
/// ```
pub fn transform_points(
    src_points: &[[f64; 3]],
    transform: &RigidTransform,
    dst_points: &mut [[f64; 3]],
) {
    assert_eq!(src_points.len(), dst_points.len());

    // a matrix is cheaper than a quaternion when applied to many points
    let rotation = transform.rotation_matrix();
    let translation = transform.translation;

    for (dst, src) in dst_points.iter_mut().zip(src_points.iter()) {
        *dst = (rotation * DVec3::from_array(*src) + translation).to_array();
    }
}
