//! Rigid alignment utilities (Kabsch)

use glam::{DMat3, DVec3};
use thiserror::Error;

use crate::svd::svd3;

/// Error type for closed-form rigid alignment.
#[derive(Debug, Error, PartialEq)]
pub enum RigidError {
    /// Source and destination arrays must have the same length
    #[error("Source and destination arrays must have the same length ({0} != {1})")]
    MismatchedInputLengths(usize, usize),

    /// At least three point pairs are needed to fix a rotation
    #[error("Need at least 3 point pairs, got {0}")]
    NotEnoughPoints(usize),
}

/// A rotation extracted from a cross-covariance matrix.
#[derive(Debug, Clone, Copy)]
pub struct ProperRotation {
    /// Rotation matrix with determinant +1.
    pub rotation: DMat3,
    /// Singular values of the covariance matrix.
    pub singular_values: DVec3,
    /// Whether the sign of the weakest singular direction was flipped to avoid a reflection.
    pub reflection_corrected: bool,
    /// Whether the underlying SVD converged.
    pub converged: bool,
}

impl ProperRotation {
    /// Number of singular values larger than `tolerance` times the largest one.
    pub fn rank(&self, tolerance: f64) -> usize {
        let s = self.singular_values;
        let max = s.max_element();
        if max <= 0.0 {
            return 0;
        }
        s.to_array()
            .iter()
            .filter(|&&value| value > tolerance * max)
            .count()
    }
}

/// Outer product `a bᵀ`.
#[inline]
pub fn outer(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// Replace the zeroed columns of a rank-deficient `U` so it becomes a
/// right-handed orthonormal basis. Columns `i`, `i+1`, `i+2` are treated cyclically.
fn complete_basis(u: DMat3) -> DMat3 {
    let mut cols = [u.x_axis, u.y_axis, u.z_axis];
    let valid = cols.map(|c| c.length_squared() > 0.5);

    match valid.iter().filter(|&&v| v).count() {
        3 => return u,
        0 => return DMat3::IDENTITY,
        2 => {
            let i = valid.iter().position(|&v| !v).unwrap_or(2);
            cols[i] = cols[(i + 1) % 3].cross(cols[(i + 2) % 3]);
        }
        _ => {
            let i = valid.iter().position(|&v| v).unwrap_or(0);
            let next = cols[i].any_orthonormal_vector();
            cols[(i + 1) % 3] = next;
            cols[(i + 2) % 3] = cols[i].cross(next);
        }
    }

    DMat3::from_cols(cols[0], cols[1], cols[2])
}

/// Extract the best-fit rotation from a cross-covariance matrix.
///
/// `h` must be accumulated as `Σ (dst - dst_mean)(src - src_mean)ᵀ`, so that
/// the returned rotation maps centered source points onto centered destination
/// points: `R = U · D · Vᵀ` with `D = diag(1, 1, ±1)` acting on the smallest
/// singular value, chosen so that `det(R) = +1`.
pub fn rotation_from_covariance(h: &DMat3) -> ProperRotation {
    let svd = svd3(h);
    let u = complete_basis(svd.u);

    let mut rotation = u * svd.vt;
    let reflection_corrected = rotation.determinant() < 0.0;

    if reflection_corrected {
        // flip the singular direction with the least support
        let s = svd.s;
        let weakest = if s.x <= s.y && s.x <= s.z {
            0
        } else if s.y <= s.z {
            1
        } else {
            2
        };
        let mut diagonal = DVec3::ONE;
        diagonal[weakest] = -1.0;
        rotation = u * DMat3::from_diagonal(diagonal) * svd.vt;
    }

    ProperRotation {
        rotation,
        singular_values: svd.s,
        reflection_corrected,
        converged: svd.converged,
    }
}

/// Compute the centroid of a set of points.
///
/// Returns zero for an empty slice.
pub fn centroid(points: &[DVec3]) -> DVec3 {
    if points.is_empty() {
        return DVec3::ZERO;
    }
    points.iter().fold(DVec3::ZERO, |acc, &p| acc + p) / points.len() as f64
}

/// Closed-form rigid fit between corresponding point sets.
///
/// Returns `(R, t)` minimizing `Σ |dst_i - (R · src_i + t)|²`.
///
/// For more details, see: Arun, K., Huang, T. S., and Blostein, S. D.
/// "Least-squares fitting of two 3-D point sets." IEEE PAMI, 1987.
pub fn fit_rigid(src: &[DVec3], dst: &[DVec3]) -> Result<(DMat3, DVec3), RigidError> {
    if src.len() != dst.len() {
        return Err(RigidError::MismatchedInputLengths(src.len(), dst.len()));
    }
    if src.len() < 3 {
        return Err(RigidError::NotEnoughPoints(src.len()));
    }

    let mu_s = centroid(src);
    let mu_d = centroid(dst);

    let h = src
        .iter()
        .zip(dst.iter())
        .fold(DMat3::ZERO, |acc, (&s, &d)| acc + outer(d - mu_d, s - mu_s));

    let r = rotation_from_covariance(&h).rotation;
    let t = mu_d - r * mu_s;

    Ok((r, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DQuat;

    fn sample_points() -> Vec<DVec3> {
        vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 2.0, 0.0),
            DVec3::new(0.0, 0.0, 3.0),
            DVec3::new(1.0, 1.0, 1.0),
            DVec3::new(-0.5, 0.25, 2.0),
        ]
    }

    #[test]
    fn test_fit_rigid_identity() -> Result<(), RigidError> {
        let points = sample_points();
        let (r, t) = fit_rigid(&points, &points)?;
        assert!(r.abs_diff_eq(DMat3::IDENTITY, 1e-9));
        assert!(t.abs_diff_eq(DVec3::ZERO, 1e-9));
        Ok(())
    }

    #[test]
    fn test_fit_rigid_recovers_transform() -> Result<(), RigidError> {
        let src = sample_points();
        let expected_r = DMat3::from_quat(DQuat::from_axis_angle(
            DVec3::new(1.0, 2.0, -0.5).normalize(),
            0.8,
        ));
        let expected_t = DVec3::new(5.0, -3.0, 2.0);
        let dst = src
            .iter()
            .map(|&p| expected_r * p + expected_t)
            .collect::<Vec<_>>();

        let (r, t) = fit_rigid(&src, &dst)?;
        assert!(r.abs_diff_eq(expected_r, 1e-9), "got {r}");
        assert!(t.abs_diff_eq(expected_t, 1e-9), "got {t}");
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_fit_rigid_reflection_is_proper() -> Result<(), RigidError> {
        let src = sample_points();
        let dst = src
            .iter()
            .map(|p| DVec3::new(-p.x, p.y, p.z))
            .collect::<Vec<_>>();

        let (r, _) = fit_rigid(&src, &dst)?;
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
        assert!((r.transpose() * r).abs_diff_eq(DMat3::IDENTITY, 1e-9));
        Ok(())
    }

    #[test]
    fn test_rotation_from_reflecting_covariance() {
        let h = DMat3::from_diagonal(DVec3::new(3.0, 2.0, -1.0));
        let proper = rotation_from_covariance(&h);
        assert!(proper.reflection_corrected);
        assert_relative_eq!(proper.rotation.determinant(), 1.0, epsilon = 1e-12);
        assert!(proper.rotation.abs_diff_eq(DMat3::IDENTITY, 1e-12));
    }

    #[test]
    fn test_fit_rigid_planar_points() -> Result<(), RigidError> {
        let src = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(1.0, 2.0, 0.0),
            DVec3::new(-1.5, 0.5, 0.0),
        ];
        let expected_r = DMat3::from_quat(DQuat::from_rotation_z(0.4) * DQuat::from_rotation_x(0.3));
        let expected_t = DVec3::new(0.5, 1.0, -2.0);
        let dst = src
            .iter()
            .map(|&p| expected_r * p + expected_t)
            .collect::<Vec<_>>();

        let (r, t) = fit_rigid(&src, &dst)?;
        assert!(r.abs_diff_eq(expected_r, 1e-9), "got {r}");
        assert!(t.abs_diff_eq(expected_t, 1e-9), "got {t}");
        Ok(())
    }

    #[test]
    fn test_complete_basis() {
        let u = DMat3::from_cols(DVec3::Y, DVec3::ZERO, DVec3::ZERO);
        let full = complete_basis(u);
        assert_eq!(full.x_axis, DVec3::Y);
        assert_relative_eq!(full.determinant(), 1.0, epsilon = 1e-12);
        assert!((full.transpose() * full).abs_diff_eq(DMat3::IDENTITY, 1e-12));

        let u = DMat3::from_cols(DVec3::X, DVec3::Y, DVec3::ZERO);
        assert_eq!(complete_basis(u), DMat3::IDENTITY);
    }

    #[test]
    fn test_rank() {
        let proper = rotation_from_covariance(&outer(DVec3::X, DVec3::Y));
        assert_eq!(proper.rank(1e-9), 1);
        let proper = rotation_from_covariance(&DMat3::IDENTITY);
        assert_eq!(proper.rank(1e-9), 3);
        let proper = rotation_from_covariance(&DMat3::ZERO);
        assert_eq!(proper.rank(1e-9), 0);
    }

    #[test]
    fn test_fit_rigid_errors() {
        let points = sample_points();
        assert_eq!(
            fit_rigid(&points, &points[..2]),
            Err(RigidError::MismatchedInputLengths(6, 2))
        );
        assert_eq!(
            fit_rigid(&points[..2], &points[..2]),
            Err(RigidError::NotEnoughPoints(2))
        );
    }

    #[test]
    fn test_centroid() {
        let c = centroid(&[DVec3::new(1.0, 2.0, 3.0), DVec3::new(4.0, 5.0, 6.0)]);
        assert!(c.abs_diff_eq(DVec3::new(2.5, 3.5, 4.5), 1e-12));
        assert_eq!(centroid(&[]), DVec3::ZERO);
    }
}
