use glam::DVec3;
use meshalign_3d::transforms::RigidTransform;
use serde::{Deserialize, Serialize};

use crate::{
    flat_kdtree::FlatKdTree,
    kdtree::{KdTree, KdTreeError},
    parallel::{ExecuteExt, ExecutionStrategy, ParallelError},
};

/// Result of a nearest-neighbor query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the matched point in the indexed point set.
    pub index: usize,
    /// The matched point.
    pub point: DVec3,
    /// Squared Euclidean distance between the query and the match.
    pub distance_sq: f64,
    /// Number of tree nodes inspected while searching.
    pub nodes_visited: usize,
}

impl Default for Neighbor {
    fn default() -> Self {
        Self::unset()
    }
}

impl Neighbor {
    pub(crate) fn unset() -> Self {
        Self {
            index: usize::MAX,
            point: DVec3::ZERO,
            distance_sq: f64::INFINITY,
            nodes_visited: 0,
        }
    }

    #[inline]
    pub(crate) fn update(&mut self, index: usize, point: DVec3, distance_sq: f64) {
        self.index = index;
        self.point = point;
        self.distance_sq = distance_sq;
    }

    /// Take the candidate if it is closer, or if nothing has been recorded yet.
    ///
    /// The second case keeps a real match when squared distances overflow to infinity.
    #[inline]
    pub(crate) fn offer(&mut self, index: usize, point: DVec3, distance_sq: f64) {
        if distance_sq < self.distance_sq || self.index == usize::MAX {
            self.update(index, point, distance_sq);
        }
    }

    /// Euclidean distance between the query and the match.
    pub fn distance(&self) -> f64 {
        self.distance_sq.sqrt()
    }
}

/// Spatial index backend used by the registration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// [`FlatKdTree`], the node-buffer tree.
    #[default]
    Flat,
    /// [`KdTree`], the owned-node tree.
    Tree,
}

/// A read-only exact nearest-neighbor index over a fixed point set.
pub trait NearestNeighborIndex: Send + Sync {
    /// Number of indexed points.
    fn len(&self) -> usize;

    /// Whether the index holds no points.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nearest indexed point to `query`.
    fn nearest(&self, query: DVec3) -> Neighbor;

    /// Resolve `transform · q` for every query `q`, writing one result per slot of `out`.
    fn nearest_batch(
        &self,
        queries: &[DVec3],
        transform: &RigidTransform,
        strategy: ExecutionStrategy,
        out: &mut [Neighbor],
    ) -> Result<(), ParallelError> {
        queries.execute_with(strategy, out, |query, slot| {
            *slot = self.nearest(transform.transform_point(*query));
        })
    }
}

impl NearestNeighborIndex for KdTree {
    fn len(&self) -> usize {
        KdTree::len(self)
    }

    fn nearest(&self, query: DVec3) -> Neighbor {
        self.closest_point(query)
    }
}

impl NearestNeighborIndex for FlatKdTree {
    fn len(&self) -> usize {
        FlatKdTree::len(self)
    }

    fn nearest(&self, query: DVec3) -> Neighbor {
        FlatKdTree::nearest(self, query)
    }

    fn nearest_batch(
        &self,
        queries: &[DVec3],
        transform: &RigidTransform,
        strategy: ExecutionStrategy,
        out: &mut [Neighbor],
    ) -> Result<(), ParallelError> {
        FlatKdTree::nearest_batch(self, queries, Some(transform), strategy, out)
    }
}

/// Build the index selected by `backend` over `points`.
pub fn build_index(
    backend: IndexBackend,
    points: &[[f64; 3]],
) -> Result<Box<dyn NearestNeighborIndex>, KdTreeError> {
    let index: Box<dyn NearestNeighborIndex> = match backend {
        IndexBackend::Flat => Box::new(FlatKdTree::build(points)?),
        IndexBackend::Tree => Box::new(KdTree::build(points)?),
    };
    log::debug!("built {:?} index over {} points", backend, points.len());
    Ok(index)
}

/// Nearest point to `query` by linear scan.
///
/// Slow, but trivially correct. Returns `None` for an empty slice.
pub fn brute_force_nearest(points: &[[f64; 3]], query: DVec3) -> Option<Neighbor> {
    points
        .iter()
        .enumerate()
        .map(|(index, p)| {
            let point = DVec3::from_array(*p);
            Neighbor {
                index,
                point,
                distance_sq: point.distance_squared(query),
                nodes_visited: 0,
            }
        })
        .min_by(|a, b| a.distance_sq.total_cmp(&b.distance_sq))
}
