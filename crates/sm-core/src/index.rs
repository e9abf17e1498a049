//! Balanced k-d tree over the 4-D star field.
//!
//! Built wholesale from a point set by splitting at the median and cycling
//! the split axis through 0..3; never mutated afterwards. Each node keeps the
//! bounding box of everything beneath it, and range queries prune any
//! subtree whose box lies entirely outside the query ball.
//!
//! | Operation     | Cost                          |
//! |---------------|-------------------------------|
//! | `build`       | O(n log n) (median select per level) |
//! | `range_query` | O(k + log n) amortized for k hits    |

use crate::constants::LEAF_SIZE;
use crate::star::{StarId, squared_distance};

/// Axis-aligned box in 4-D.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: [f64; 4],
    pub max: [f64; 4],
}

impl BoundingBox {
    /// Smallest box containing every point. Inverted (empty) if none.
    pub fn around(points: &[IndexedPoint]) -> Self {
        let mut bbox = Self {
            min: [f64::INFINITY; 4],
            max: [f64::NEG_INFINITY; 4],
        };
        for p in points {
            for axis in 0..4 {
                bbox.min[axis] = bbox.min[axis].min(p.coordinates[axis]);
                bbox.max[axis] = bbox.max[axis].max(p.coordinates[axis]);
            }
        }
        bbox
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains(&self, point: &[f64; 4]) -> bool {
        (0..4).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    /// Squared distance from a point to the nearest point of the box.
    /// Zero when the point is inside.
    pub fn squared_distance_to(&self, point: &[f64; 4]) -> f64 {
        (0..4)
            .map(|axis| {
                let p = point[axis];
                let gap = if p < self.min[axis] {
                    self.min[axis] - p
                } else if p > self.max[axis] {
                    p - self.max[axis]
                } else {
                    0.0
                };
                gap * gap
            })
            .sum()
    }

    /// True when the ball around `center` with `radius` touches the box.
    pub fn intersects_ball(&self, center: &[f64; 4], radius: f64) -> bool {
        radius.is_infinite() || self.squared_distance_to(center) <= radius * radius
    }
}

/// A star's position as seen by the index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexedPoint {
    pub id: StarId,
    pub coordinates: [f64; 4],
}

#[derive(Clone, Copy, Debug)]
enum NodeKind {
    Leaf { start: usize, end: usize },
    Split {
        axis: usize,
        value: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Clone, Copy, Debug)]
struct KdNode {
    bbox: BoundingBox,
    kind: NodeKind,
}

/// Immutable k-d tree. Nodes live in an arena; leaves index ranges of the
/// reordered point array.
#[derive(Debug)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    points: Vec<IndexedPoint>,
    leaf_size: usize,
}

impl Default for KdTree {
    fn default() -> Self {
        Self::build(Vec::new())
    }
}

impl KdTree {
    /// Build with the default leaf size.
    pub fn build(points: Vec<IndexedPoint>) -> Self {
        Self::build_with_leaf_size(points, LEAF_SIZE)
    }

    pub fn build_with_leaf_size(mut points: Vec<IndexedPoint>, leaf_size: usize) -> Self {
        let leaf_size = leaf_size.max(1);
        let mut nodes = Vec::with_capacity(2 * points.len() / leaf_size + 1);
        if !points.is_empty() {
            build_node(&mut points, 0, 0, leaf_size, &mut nodes);
        }
        Self {
            nodes,
            points,
            leaf_size,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// Bounding box of the whole tree, if any points are indexed.
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.nodes.first().map(|n| n.bbox)
    }

    /// Longest root-to-leaf path, counting the root as depth 1.
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut deepest = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((index, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let NodeKind::Split { left, right, .. } = self.nodes[index].kind {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
        deepest
    }

    /// Split (axis, value) of the root node, if the root is not a leaf.
    pub fn root_split(&self) -> Option<(usize, f64)> {
        match self.nodes.first()?.kind {
            NodeKind::Split { axis, value, .. } => Some((axis, value)),
            NodeKind::Leaf { .. } => None,
        }
    }

    /// Ids of every point within `radius` (inclusive) of `center`.
    /// An infinite radius returns everything. Order is unspecified.
    pub fn range_query(&self, center: &[f64; 4], radius: f64) -> Vec<StarId> {
        let mut hits = Vec::new();
        if self.nodes.is_empty() || radius.is_nan() || radius < 0.0 {
            return hits;
        }
        let radius_sq = radius * radius;

        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.bbox.intersects_ball(center, radius) {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { start, end } => {
                    hits.extend(
                        self.points[start..end]
                            .iter()
                            .filter(|p| {
                                radius.is_infinite()
                                    || squared_distance(&p.coordinates, center) <= radius_sq
                            })
                            .map(|p| p.id),
                    );
                }
                NodeKind::Split { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        hits
    }
}

/// Recursively build the subtree for `points`, which occupy
/// `offset..offset + points.len()` of the tree's point array. Returns the
/// arena index of the new node.
fn build_node(
    points: &mut [IndexedPoint],
    offset: usize,
    depth: usize,
    leaf_size: usize,
    nodes: &mut Vec<KdNode>,
) -> usize {
    let bbox = BoundingBox::around(points);
    let index = nodes.len();
    nodes.push(KdNode {
        bbox,
        kind: NodeKind::Leaf {
            start: offset,
            end: offset + points.len(),
        },
    });

    if points.len() <= leaf_size {
        return index;
    }

    let axis = depth % 4;
    let mid = points.len() / 2;
    points.select_nth_unstable_by(mid, |a, b| {
        a.coordinates[axis].total_cmp(&b.coordinates[axis])
    });
    let value = points[mid].coordinates[axis];

    let (lower, upper) = points.split_at_mut(mid);
    let left = build_node(lower, offset, depth + 1, leaf_size, nodes);
    let right = build_node(upper, offset + mid, depth + 1, leaf_size, nodes);

    nodes[index].kind = NodeKind::Split {
        axis,
        value,
        left,
        right,
    };
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn random_points(n: usize, seed: u64) -> Vec<IndexedPoint> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..n)
            .map(|i| IndexedPoint {
                id: StarId(i as u64),
                coordinates: std::array::from_fn(|_| rng.random_range(-1.0..=1.0)),
            })
            .collect()
    }

    fn brute_force(points: &[IndexedPoint], center: &[f64; 4], radius: f64) -> Vec<StarId> {
        let mut ids: Vec<StarId> = points
            .iter()
            .filter(|p| squared_distance(&p.coordinates, center) <= radius * radius)
            .map(|p| p.id)
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_empty_tree() {
        let tree = KdTree::build(Vec::new());
        assert!(tree.is_empty());
        assert_eq!(tree.depth(), 0);
        assert!(tree.bounds().is_none());
        assert!(tree.range_query(&[0.0; 4], 10.0).is_empty());
    }

    #[test]
    fn test_small_tree_is_single_leaf() {
        let tree = KdTree::build(random_points(5, 1));
        assert_eq!(tree.depth(), 1);
        assert!(tree.root_split().is_none());
    }

    #[test]
    fn test_root_splits_first_axis_at_median() {
        let points = random_points(101, 2);
        let mut xs: Vec<f64> = points.iter().map(|p| p.coordinates[0]).collect();
        xs.sort_by(f64::total_cmp);
        let tree = KdTree::build(points);
        let (axis, value) = tree.root_split().unwrap();
        assert_eq!(axis, 0);
        assert_eq!(value, xs[50]);
    }

    #[test]
    fn test_tree_is_balanced() {
        let n = 4096;
        let tree = KdTree::build(random_points(n, 3));
        // n / leaf_size = 512 leaves → 9 levels of splits + leaf level
        let bound = ((n as f64 / LEAF_SIZE as f64).log2().ceil() as usize) + 1;
        assert!(tree.depth() <= bound, "depth {} > {bound}", tree.depth());
        assert_eq!(tree.len(), n);
    }

    #[test]
    fn test_bounds_contain_every_point() {
        let points = random_points(300, 4);
        let tree = KdTree::build(points.clone());
        let bounds = tree.bounds().unwrap();
        assert!(points.iter().all(|p| bounds.contains(&p.coordinates)));
    }

    #[test]
    fn test_range_query_matches_brute_force() {
        let points = random_points(1000, 5);
        let tree = KdTree::build(points.clone());
        let mut rng = SmallRng::seed_from_u64(99);
        for _ in 0..50 {
            let center: [f64; 4] = std::array::from_fn(|_| rng.random_range(-1.0..=1.0));
            let radius = rng.random_range(0.0..1.2);
            let mut hits = tree.range_query(&center, radius);
            hits.sort();
            assert_eq!(hits, brute_force(&points, &center, radius));
        }
    }

    #[test]
    fn test_range_query_infinite_radius_returns_all() {
        let tree = KdTree::build(random_points(64, 6));
        assert_eq!(tree.range_query(&[0.0; 4], f64::INFINITY).len(), 64);
    }

    #[test]
    fn test_range_query_rejects_bad_radius() {
        let tree = KdTree::build(random_points(64, 7));
        assert!(tree.range_query(&[0.0; 4], -1.0).is_empty());
        assert!(tree.range_query(&[0.0; 4], f64::NAN).is_empty());
    }

    #[test]
    fn test_duplicate_points_are_all_found() {
        let points: Vec<IndexedPoint> = (0..50)
            .map(|i| IndexedPoint {
                id: StarId(i),
                coordinates: [0.5, 0.5, 0.5, 0.5],
            })
            .collect();
        let tree = KdTree::build(points);
        assert_eq!(tree.range_query(&[0.5, 0.5, 0.5, 0.5], 0.0).len(), 50);
    }

    #[test]
    fn test_box_distance() {
        let bbox = BoundingBox {
            min: [0.0; 4],
            max: [1.0; 4],
        };
        assert_eq!(bbox.squared_distance_to(&[0.5; 4]), 0.0);
        assert_eq!(bbox.squared_distance_to(&[2.0, 0.5, 0.5, 0.5]), 1.0);
        assert!(bbox.intersects_ball(&[2.0, 0.5, 0.5, 0.5], 1.0));
        assert!(!bbox.intersects_ball(&[2.0, 0.5, 0.5, 0.5], 0.99));
    }
}
