use glam::DVec3;
use meshalign_3d::transforms::RigidTransform;
use serde::{Deserialize, Serialize};

use crate::{
    index::{NearestNeighborIndex, Neighbor},
    parallel::{ExecutionStrategy, ParallelError},
};

/// A moving point paired with its nearest reference point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Index of the moving point in the moving cloud.
    pub moving_index: usize,
    /// The moving point in its own frame.
    pub moving_local: DVec3,
    /// The moving point under the current transform estimate.
    pub moving: DVec3,
    /// Index of the matched point in the reference cloud.
    pub reference_index: usize,
    /// The matched reference point.
    pub reference: DVec3,
    /// Squared distance between `moving` and `reference`.
    pub distance_sq: f64,
}

impl Correspondence {
    /// Distance between the transformed moving point and its match.
    pub fn distance(&self) -> f64 {
        self.distance_sq.sqrt()
    }
}

/// Policy for discarding correspondences before estimating motion.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierRejection {
    /// Keep every correspondence.
    #[default]
    None,
    /// Drop pairs farther apart than the given distance.
    MaxDistance(f64),
    /// Drop pairs whose distance exceeds `median + k · σ`, with `σ = 1.4826 · MAD`.
    MedianAbsoluteDeviation {
        /// Number of robust standard deviations to tolerate.
        k: f64,
    },
}

/// Median of a sorted, non-empty slice.
fn sorted_median(values: &[f64]) -> f64 {
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

impl OutlierRejection {
    /// Filter `correspondences` in place, preserving order.
    ///
    /// Returns the number of removed pairs.
    pub fn apply(&self, correspondences: &mut Vec<Correspondence>) -> usize {
        let before = correspondences.len();
        match *self {
            OutlierRejection::None => {}
            OutlierRejection::MaxDistance(max) => {
                let max_sq = max * max;
                correspondences.retain(|c| c.distance_sq <= max_sq);
            }
            OutlierRejection::MedianAbsoluteDeviation { k } => {
                if correspondences.is_empty() {
                    return 0;
                }

                let mut distances = correspondences
                    .iter()
                    .map(Correspondence::distance)
                    .collect::<Vec<_>>();
                distances.sort_unstable_by(f64::total_cmp);
                let median = sorted_median(&distances);

                let mut deviations = distances
                    .iter()
                    .map(|d| (d - median).abs())
                    .collect::<Vec<_>>();
                deviations.sort_unstable_by(f64::total_cmp);
                let sigma = 1.4826 * sorted_median(&deviations);

                let threshold = median + k * sigma;
                correspondences.retain(|c| c.distance() <= threshold);
            }
        }
        before - correspondences.len()
    }
}

/// Pair every moving point, moved by `transform`, with its nearest reference point.
///
/// `scratch` holds the raw query results and is reused across calls.
pub fn find_correspondences(
    index: &dyn NearestNeighborIndex,
    moving: &[DVec3],
    transform: &RigidTransform,
    strategy: ExecutionStrategy,
    scratch: &mut Vec<Neighbor>,
) -> Result<Vec<Correspondence>, ParallelError> {
    scratch.clear();
    scratch.resize(moving.len(), Neighbor::default());

    index.nearest_batch(moving, transform, strategy, scratch)?;

    let correspondences = moving
        .iter()
        .zip(scratch.iter())
        .enumerate()
        .map(|(moving_index, (&local, nn))| Correspondence {
            moving_index,
            moving_local: local,
            moving: transform.transform_point(local),
            reference_index: nn.index,
            reference: nn.point,
            distance_sq: nn.distance_sq,
        })
        .collect();

    Ok(correspondences)
}
