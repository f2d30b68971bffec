use glam::DVec3;

use crate::{linalg::transform_points, transforms::RigidTransform};

/// Errors that can occur when creating a point cloud.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PointCloudError {
    /// The point cloud has no points.
    #[error("Pointcloud data is empty")]
    EmptyData,

    /// A point has a NaN or infinite coordinate.
    #[error("Point {0} has a non-finite coordinate")]
    NonFinite(usize),
}

/// A non-empty set of 3D points.
///
/// Points have no identity beyond their position and are never mutated once
/// the cloud is built.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    points: Vec<[f64; 3]>,
}

impl PointCloud {
    /// Create a point cloud, rejecting empty input and non-finite coordinates.
    pub fn new(points: Vec<[f64; 3]>) -> Result<Self, PointCloudError> {
        if points.is_empty() {
            return Err(PointCloudError::EmptyData);
        }
        if let Some(i) = points
            .iter()
            .position(|p| !p.iter().all(|v| v.is_finite()))
        {
            return Err(PointCloudError::NonFinite(i));
        }
        Ok(Self { points })
    }

    /// Create a point cloud from `glam` vectors.
    pub fn from_dvec3(points: &[DVec3]) -> Result<Self, PointCloudError> {
        Self::new(points.iter().map(|p| p.to_array()).collect())
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

    /// Iterate over the points as `glam` vectors.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = DVec3> + '_ {
        self.points.iter().map(|p| DVec3::from_array(*p))
    }

    /// Mean of all points.
    pub fn centroid(&self) -> DVec3 {
        self.iter().fold(DVec3::ZERO, |acc, p| acc + p) / self.len() as f64
    }

    /// Get the minimum bound of the point cloud.
    pub fn min_bound(&self) -> DVec3 {
        self.iter().fold(DVec3::splat(f64::INFINITY), DVec3::min)
    }

    /// Get the maximum bound of the point cloud.
    pub fn max_bound(&self) -> DVec3 {
        self.iter().fold(DVec3::splat(f64::NEG_INFINITY), DVec3::max)
    }

    /// Return a copy of the cloud with every point moved by `transform`.
    pub fn transformed(&self, transform: &RigidTransform) -> Self {
        let mut points = vec![[0.0; 3]; self.points.len()];
        transform_points(&self.points, transform, &mut points);
        Self { points }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DQuat;

    #[test]
    fn test_pointcloud() -> Result<(), PointCloudError> {
        let pointcloud = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 2.0, -1.0]])?;

        assert_eq!(pointcloud.len(), 3);
        assert!(!pointcloud.is_empty());
        assert_eq!(pointcloud.points()[1], [1.0, 0.0, 0.0]);
        assert!(pointcloud
            .centroid()
            .abs_diff_eq(DVec3::new(2.0 / 3.0, 2.0 / 3.0, -1.0 / 3.0), 1e-12));
        assert_eq!(pointcloud.min_bound(), DVec3::new(0.0, 0.0, -1.0));
        assert_eq!(pointcloud.max_bound(), DVec3::new(1.0, 2.0, 0.0));
        Ok(())
    }

    #[test]
    fn test_pointcloud_empty() {
        assert_eq!(PointCloud::new(vec![]), Err(PointCloudError::EmptyData));
    }

    #[test]
    fn test_pointcloud_non_finite() {
        let res = PointCloud::new(vec![[0.0; 3], [f64::NAN, 0.0, 0.0]]);
        assert_eq!(res, Err(PointCloudError::NonFinite(1)));
    }

    #[test]
    fn test_pointcloud_transformed() -> Result<(), PointCloudError> {
        let pointcloud = PointCloud::new(vec![[1.0, 0.0, 0.0]])?;
        let transform = RigidTransform::new(
            DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2),
            DVec3::new(0.0, 0.0, 1.0),
        );
        let moved = pointcloud.transformed(&transform);
        let p = DVec3::from_array(moved.points()[0]);
        assert!(p.abs_diff_eq(DVec3::new(0.0, 1.0, 1.0), 1e-12));
        Ok(())
    }
}
