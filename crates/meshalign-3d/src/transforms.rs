use glam::{DMat3, DQuat, DVec3};
use serde::{Deserialize, Serialize};

/// Errors produced when building rotations.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// The rotation axis has (near) zero length.
    #[error("cannot compute rotation from a zero axis")]
    ZeroAxis,

    /// The matrix is not a proper rotation.
    #[error("matrix is not a proper rotation (det = {0})")]
    NotARotation(f64),
}

/// A rigid motion: rotation followed by translation, `p' = R · p + t`.
///
/// The rotation is kept as a unit quaternion so repeated composition does not
/// drift away from orthonormality.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    /// Rotation part.
    pub rotation: DQuat,
    /// Translation part.
    pub translation: DVec3,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    /// The transform that leaves every point in place.
    pub const IDENTITY: Self = Self {
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a transform, normalizing the rotation.
    pub fn new(rotation: DQuat, translation: DVec3) -> Self {
        Self {
            rotation: rotation.normalize(),
            translation,
        }
    }

    /// Create a transform from a rotation matrix.
    ///
    /// PRECONDITION: `rotation` is orthonormal.
    pub fn from_rotation_matrix(
        rotation: &DMat3,
        translation: DVec3,
    ) -> Result<Self, TransformError> {
        let det = rotation.determinant();
        if (det - 1.0).abs() > 1e-6 {
            return Err(TransformError::NotARotation(det));
        }
        Ok(Self::new(DQuat::from_mat3(rotation), translation))
    }

    /// Create a transform from an axis, an angle in radians and a translation.
    ///
    /// The axis does not need to be normalized.
    ///
    /// Example:
    ///
    /// ```
    /// use glam::DVec3;
    /// use meshalign_3d::transforms::RigidTransform;
    ///
    /// let angle = std::f64::consts::FRAC_PI_2;
    /// let t = RigidTransform::from_axis_angle(DVec3::Y, angle, DVec3::ZERO).unwrap();
    /// assert!(t.transform_point(DVec3::X).abs_diff_eq(-DVec3::Z, 1e-12));
    /// ```
    pub fn from_axis_angle(
        axis: DVec3,
        angle: f64,
        translation: DVec3,
    ) -> Result<Self, TransformError> {
        let magnitude = axis.length();
        if magnitude < 1e-10 {
            return Err(TransformError::ZeroAxis);
        }
        Ok(Self::new(
            DQuat::from_axis_angle(axis / magnitude, angle),
            translation,
        ))
    }

    /// Create a transform from a row-major rotation matrix and a translation.
    pub fn from_rows(
        rotation: &[[f64; 3]; 3],
        translation: &[f64; 3],
    ) -> Result<Self, TransformError> {
        let rotation = DMat3::from_cols_array_2d(rotation).transpose();
        Self::from_rotation_matrix(&rotation, DVec3::from_array(*translation))
    }

    /// Rotation as a row-major matrix.
    pub fn rotation_rows(&self) -> [[f64; 3]; 3] {
        self.rotation_matrix().transpose().to_cols_array_2d()
    }

    /// Rotation as a matrix.
    #[inline]
    pub fn rotation_matrix(&self) -> DMat3 {
        DMat3::from_quat(self.rotation)
    }

    /// Apply the transform to a point.
    #[inline]
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Compose two transforms: `self ∘ other` applies `other` first, then `self`.
    ///
    /// R_new = R_self * R_other
    /// t_new = R_self * t_other + t_self
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        Self::new(
            self.rotation * other.rotation,
            self.rotation * other.translation + self.translation,
        )
    }

    /// The transform that undoes `self`.
    pub fn inverse(&self) -> RigidTransform {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Magnitude of the rotation in radians, in `[0, π]`.
    ///
    /// Uses `atan2` on the quaternion parts, which stays accurate for tiny angles.
    pub fn rotation_angle(&self) -> f64 {
        let q = self.rotation;
        2.0 * q.xyz().length().atan2(q.w.abs())
    }

    /// Angle in radians between the rotations of two transforms.
    pub fn angle_to(&self, other: &RigidTransform) -> f64 {
        let relative = RigidTransform {
            rotation: self.rotation.inverse() * other.rotation,
            translation: DVec3::ZERO,
        };
        relative.rotation_angle()
    }
}

impl std::ops::Mul for RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: RigidTransform) -> RigidTransform {
        self.compose(&rhs)
    }
}
