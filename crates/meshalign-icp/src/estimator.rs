use glam::{DMat3, DVec3};
use meshalign_3d::transforms::{RigidTransform, TransformError};
use meshalign_linalg::rigid::{outer, rotation_from_covariance, RigidError};

use crate::{
    config::{RankPolicy, RegistrationConfig},
    correspondence::Correspondence,
};

/// Reasons an iteration cannot produce a motion update.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EstimateError {
    /// Too few correspondences survived outlier rejection.
    #[error("insufficient correspondences: found {found}, need {required}")]
    InsufficientCorrespondences {
        /// Correspondences available.
        found: usize,
        /// Correspondences required.
        required: usize,
    },

    /// The covariance does not determine a unique rotation.
    #[error("rank deficient covariance, singular values {singular_values:?}")]
    RankDeficient {
        /// Singular values of the covariance matrix.
        singular_values: [f64; 3],
    },

    /// The moving and reference sets have different lengths.
    #[error("mismatched pair counts ({0} != {1})")]
    MismatchedPairs(usize, usize),

    /// The decomposition produced a matrix that is not a proper rotation.
    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl From<RigidError> for EstimateError {
    fn from(e: RigidError) -> Self {
        match e {
            RigidError::MismatchedInputLengths(a, b) => EstimateError::MismatchedPairs(a, b),
            RigidError::NotEnoughPoints(found) => EstimateError::InsufficientCorrespondences {
                found,
                required: 3,
            },
        }
    }
}

/// Output of one rigid-motion estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionEstimate {
    /// Incremental motion that moves the transformed moving points onto their matches.
    pub delta: RigidTransform,
    /// `delta` composed on the left of the estimate it was computed from.
    pub updated: RigidTransform,
    /// Singular values of the covariance matrix.
    pub singular_values: DVec3,
    /// Whether a reflection had to be turned into a proper rotation.
    pub reflection_corrected: bool,
    /// Root mean square distance of the correspondences before the update.
    pub rmse: f64,
}

/// Closed-form estimator of the rigid motion between matched point sets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidMotionEstimator {
    min_correspondences: usize,
    rank_policy: RankPolicy,
    rank_tolerance: f64,
}

impl Default for RigidMotionEstimator {
    fn default() -> Self {
        Self::from_config(&RegistrationConfig::default())
    }
}

impl RigidMotionEstimator {
    /// Create an estimator. `min_correspondences` is raised to 3 if lower.
    pub fn new(min_correspondences: usize, rank_policy: RankPolicy, rank_tolerance: f64) -> Self {
        Self {
            min_correspondences: min_correspondences.max(3),
            rank_policy,
            rank_tolerance,
        }
    }

    /// Create an estimator with the policies of `config`.
    pub fn from_config(config: &RegistrationConfig) -> Self {
        Self::new(
            config.min_correspondences,
            config.rank_policy,
            config.rank_tolerance,
        )
    }

    /// Estimate the motion aligning `correspondences` and compose it onto `current`.
    ///
    /// The covariance is `Σ (r - r̄)(m - m̄)ᵀ` over the reference points `r` and the
    /// moving points `m` already expressed in the reference frame by `current`.
    pub fn estimate(
        &self,
        correspondences: &[Correspondence],
        current: &RigidTransform,
    ) -> Result<MotionEstimate, EstimateError> {
        let n = correspondences.len();
        if n < self.min_correspondences {
            return Err(EstimateError::InsufficientCorrespondences {
                found: n,
                required: self.min_correspondences,
            });
        }
        let count = n as f64;

        // moving centroid in its own frame, then carried into the reference frame
        let local_centroid = correspondences
            .iter()
            .fold(DVec3::ZERO, |acc, c| acc + c.moving_local)
            / count;
        let moving_centroid = current.transform_point(local_centroid);
        let reference_centroid = correspondences
            .iter()
            .fold(DVec3::ZERO, |acc, c| acc + c.reference)
            / count;

        let covariance = correspondences.iter().fold(DMat3::ZERO, |acc, c| {
            acc + outer(c.reference - reference_centroid, c.moving - moving_centroid)
        });

        // non-convergence is already logged by the decomposition
        let proper = rotation_from_covariance(&covariance);

        if proper.rank(self.rank_tolerance) < 2 {
            let singular_values = proper.singular_values.to_array();
            match self.rank_policy {
                RankPolicy::Skip => {
                    return Err(EstimateError::RankDeficient { singular_values });
                }
                RankPolicy::Accept => {
                    log::warn!("accepting rotation from rank deficient covariance {singular_values:?}");
                }
            }
        }

        let translation = reference_centroid - proper.rotation * moving_centroid;
        let delta = RigidTransform::from_rotation_matrix(&proper.rotation, translation)?;

        let rmse = (correspondences.iter().map(|c| c.distance_sq).sum::<f64>() / count).sqrt();

        Ok(MotionEstimate {
            delta,
            updated: delta.compose(current),
            singular_values: proper.singular_values,
            reflection_corrected: proper.reflection_corrected,
            rmse,
        })
    }

    /// Estimate the motion taking `moving[i]` onto `reference[i]`, starting from identity.
    pub fn estimate_from_pairs(
        &self,
        moving: &[DVec3],
        reference: &[DVec3],
    ) -> Result<MotionEstimate, EstimateError> {
        if moving.len() != reference.len() {
            return Err(RigidError::MismatchedInputLengths(moving.len(), reference.len()).into());
        }

        let correspondences = moving
            .iter()
            .zip(reference.iter())
            .enumerate()
            .map(|(i, (&m, &r))| Correspondence {
                moving_index: i,
                moving_local: m,
                moving: m,
                reference_index: i,
                reference: r,
                distance_sq: m.distance_squared(r),
            })
            .collect::<Vec<_>>();

        self.estimate(&correspondences, &RigidTransform::IDENTITY)
    }
}
