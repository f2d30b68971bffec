use glam::DVec3;
use meshalign_3d::transforms::RigidTransform;

use crate::{
    index::Neighbor,
    kdtree::KdTreeError,
    parallel::{ExecuteExt, ExecutionStrategy, ParallelError},
};

/// Child index marking an absent subtree.
pub const NO_CHILD: i32 = -1;

/// A node of a [`FlatKdTree`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatNode {
    /// The median point stored at this node.
    pub point: DVec3,
    /// Index of the point in the array the tree was built from.
    pub index: usize,
    /// Split axis, `depth % 3`.
    pub axis: u8,
    /// Node index of the lesser subtree, or [`NO_CHILD`].
    pub lesser: i32,
    /// Node index of the greater subtree, or [`NO_CHILD`].
    pub greater: i32,
}

/// Winning node of a flat tree query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeMatch {
    /// Index into [`FlatKdTree::nodes`].
    pub node: usize,
    /// Squared distance from the query to the node point.
    pub distance_sq: f64,
    /// Number of nodes inspected by the search.
    pub nodes_visited: usize,
}

/// A kd-tree stored in a single contiguous node buffer.
///
/// Nodes address their children by integer index, the root is node `0`.
/// Queries only read the buffer, so any number of them may run concurrently.
#[derive(Debug, Clone)]
pub struct FlatKdTree {
    nodes: Vec<FlatNode>,
}

fn build_range(
    points: &[DVec3],
    order: &mut [usize],
    depth: usize,
    nodes: &mut Vec<FlatNode>,
) -> i32 {
    if order.is_empty() {
        return NO_CHILD;
    }

    let axis = depth % 3;
    let mid = order.len() / 2;

    // partial quickselect: everything left of mid is <= order[mid] on axis, everything right >=
    order.select_nth_unstable_by(mid, |&a, &b| points[a][axis].total_cmp(&points[b][axis]));

    let slot = nodes.len();
    let index = order[mid];
    nodes.push(FlatNode {
        point: points[index],
        index,
        axis: axis as u8,
        lesser: NO_CHILD,
        greater: NO_CHILD,
    });

    let (lesser, rest) = order.split_at_mut(mid);
    let greater = &mut rest[1..];

    let lesser = build_range(points, lesser, depth + 1, nodes);
    let greater = build_range(points, greater, depth + 1, nodes);
    nodes[slot].lesser = lesser;
    nodes[slot].greater = greater;

    slot as i32
}

impl FlatKdTree {
    /// Build a tree from a non-empty set of points.
    ///
    /// Nodes are emitted in pre-order while the index range is partitioned in place.
    pub fn build(points: &[[f64; 3]]) -> Result<Self, KdTreeError> {
        if points.is_empty() {
            return Err(KdTreeError::EmptyPoints);
        }
        if points.len() > i32::MAX as usize {
            return Err(KdTreeError::TooManyPoints(points.len()));
        }

        let points = points
            .iter()
            .map(|p| DVec3::from_array(*p))
            .collect::<Vec<_>>();
        let mut order = (0..points.len()).collect::<Vec<_>>();
        let mut nodes = Vec::with_capacity(points.len());

        build_range(&points, &mut order, 0, &mut nodes);

        Ok(Self { nodes })
    }

    /// The node buffer, root first.
    pub fn nodes(&self) -> &[FlatNode] {
        &self.nodes
    }

    /// Number of points in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: construction rejects empty input.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of levels from the root to the deepest leaf.
    pub fn depth(&self) -> usize {
        self.subtree_depth(0)
    }

    fn subtree_depth(&self, node: i32) -> usize {
        match usize::try_from(node).ok().and_then(|i| self.nodes.get(i)) {
            Some(n) => 1 + self.subtree_depth(n.lesser).max(self.subtree_depth(n.greater)),
            None => 0,
        }
    }

    /// Nearest node to `query`.
    ///
    /// The search recurses without allocating and writes only to its own
    /// stack, which is what makes batched calls safe to parallelize.
    pub fn nearest_node(&self, query: DVec3) -> NodeMatch {
        let mut best = NodeMatch {
            node: 0,
            distance_sq: f64::INFINITY,
            nodes_visited: 0,
        };
        self.search(0, query, &mut best);
        best
    }

    fn search(&self, node: i32, query: DVec3, best: &mut NodeMatch) {
        let Some(current) = usize::try_from(node).ok().and_then(|i| self.nodes.get(i)) else {
            return;
        };
        best.nodes_visited += 1;

        let axis = current.axis as usize;
        let distance_sq = current.point.distance_squared(query);

        if current.lesser == NO_CHILD && current.greater == NO_CHILD {
            if distance_sq < best.distance_sq {
                best.node = node as usize;
                best.distance_sq = distance_sq;
            }
            return;
        }

        let split_distance = query[axis] - current.point[axis];
        let (nearer, further) = if split_distance > 0.0 {
            (current.greater, current.lesser)
        } else {
            (current.lesser, current.greater)
        };

        self.search(nearer, query, best);

        if distance_sq < best.distance_sq {
            best.node = node as usize;
            best.distance_sq = distance_sq;
        }

        if split_distance * split_distance < best.distance_sq {
            self.search(further, query, best);
        }
    }

    /// Nearest stored point to `query`.
    pub fn nearest(&self, query: DVec3) -> Neighbor {
        let found = self.nearest_node(query);
        let node = &self.nodes[found.node];
        Neighbor {
            index: node.index,
            point: node.point,
            distance_sq: found.distance_sq,
            nodes_visited: found.nodes_visited,
        }
    }

    /// Resolve a batch of queries, one output slot per query.
    ///
    /// When `transform` is given each query is moved by it before the search,
    /// so the tree can follow a changing alignment estimate without a rebuild.
    pub fn nearest_batch(
        &self,
        queries: &[DVec3],
        transform: Option<&RigidTransform>,
        strategy: ExecutionStrategy,
        out: &mut [Neighbor],
    ) -> Result<(), ParallelError> {
        match transform {
            Some(transform) => queries.execute_with(strategy, out, |query, slot| {
                *slot = self.nearest(transform.transform_point(*query));
            }),
            None => queries.execute_with(strategy, out, |query, slot| {
                *slot = self.nearest(*query);
            }),
        }
    }
}
