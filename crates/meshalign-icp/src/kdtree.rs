use glam::DVec3;

use crate::index::Neighbor;

/// Errors raised while building a spatial index.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum KdTreeError {
    /// The tree needs at least one point.
    #[error("cannot build a kd-tree from an empty point set")]
    EmptyPoints,

    /// The point count does not fit the node index type.
    #[error("too many points for a flat kd-tree: {0}")]
    TooManyPoints(usize),
}

struct Node {
    point: DVec3,
    index: usize,
    axis: usize,
    lesser: Option<Box<Node>>,
    greater: Option<Box<Node>>,
}

impl Node {
    fn new(items: &mut [(usize, DVec3)], depth: usize) -> Option<Box<Node>> {
        if items.is_empty() {
            return None;
        }

        // choose split axis
        let axis = depth % 3;

        // sort points along split axis
        items.sort_unstable_by(|a, b| a.1[axis].total_cmp(&b.1[axis]));
        let median_index = items.len() / 2;

        // create node with the median point
        let (lesser, rest) = items.split_at_mut(median_index);
        let ((index, point), greater) = rest.split_first_mut()?;

        Some(Box::new(Node {
            point: *point,
            index: *index,
            axis,
            lesser: Node::new(lesser, depth + 1),
            greater: Node::new(greater, depth + 1),
        }))
    }

    fn is_leaf(&self) -> bool {
        self.lesser.is_none() && self.greater.is_none()
    }

    fn depth(&self) -> usize {
        let lesser = self.lesser.as_ref().map_or(0, |n| n.depth());
        let greater = self.greater.as_ref().map_or(0, |n| n.depth());
        1 + lesser.max(greater)
    }

    fn closest_point(&self, target: DVec3, best: &mut Neighbor) {
        best.nodes_visited += 1;
        let distance_sq = self.point.distance_squared(target);

        if self.is_leaf() {
            best.offer(self.index, self.point, distance_sq);
            return;
        }

        // search first on the side of the split plane that holds the target
        let split_distance = target[self.axis] - self.point[self.axis];
        let (nearer, further) = if split_distance > 0.0 {
            (&self.greater, &self.lesser)
        } else {
            (&self.lesser, &self.greater)
        };

        if let Some(node) = nearer {
            node.closest_point(target, best);
        }

        best.offer(self.index, self.point, distance_sq);

        // the far side can only hold a closer point if the plane is closer than the best match
        if split_distance * split_distance < best.distance_sq {
            if let Some(node) = further {
                node.closest_point(target, best);
            }
        }
    }
}

/// A kd-tree with parent-owned nodes.
///
/// Built once from a point set by recursive median splits on cycling axes and
/// read-only afterwards. Each input point is stored in exactly one node.
pub struct KdTree {
    root: Box<Node>,
    len: usize,
}

impl KdTree {
    /// Build a tree from a non-empty set of points.
    pub fn build(points: &[[f64; 3]]) -> Result<Self, KdTreeError> {
        let mut items = points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, DVec3::from_array(*p)))
            .collect::<Vec<_>>();

        let root = Node::new(&mut items, 0).ok_or(KdTreeError::EmptyPoints)?;

        Ok(Self {
            root,
            len: points.len(),
        })
    }

    /// Number of points in the tree.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: construction rejects empty input.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels from the root to the deepest leaf.
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Exact nearest neighbor of `target` by branch-and-bound search.
    pub fn closest_point(&self, target: DVec3) -> Neighbor {
        let mut best = Neighbor::unset();
        self.root.closest_point(target, &mut best);
        best
    }
}
