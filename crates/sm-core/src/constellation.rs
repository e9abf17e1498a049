//! Proximity graphs over a chosen set of stars.
//!
//! Stars closer than the connection distance are joined by an edge. Each
//! connected component becomes a [`Constellation`], classified by shape and
//! labeled with the tone whose reference center lies nearest its
//! gravity-weighted centroid. Nothing here is stored; constellations are
//! recomputed on demand.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ToneCenter;
use crate::index::{IndexedPoint, KdTree};
use crate::star::{Star, StarId, squared_distance};

/// Shape of a connected component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    /// A single star with no neighbors.
    Fragment,
    /// A simple path: `n - 1` edges, no star with more than two.
    Chain,
    Cluster,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Fragment => "fragment",
            Self::Chain => "chain",
            Self::Cluster => "cluster",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Constellation {
    /// Ascending.
    pub members: Vec<StarId>,
    /// Each edge is `(lower, higher)`; the list is sorted.
    pub edges: Vec<(StarId, StarId)>,
    pub pattern: Pattern,
    pub tone: Option<String>,
}

pub struct ConstellationFormer<'a> {
    tones: &'a [ToneCenter],
}

impl<'a> ConstellationFormer<'a> {
    pub fn new(tones: &'a [ToneCenter]) -> Self {
        Self { tones }
    }

    /// Group `stars` into constellations. Output depends only on the set of
    /// stars given (duplicates and input order are ignored). Components are
    /// ordered by their smallest member id. A negative or NaN distance
    /// connects nothing.
    pub fn form(&self, stars: &[Arc<Star>], connection_distance: f64) -> Vec<Constellation> {
        let mut stars: Vec<&Arc<Star>> = stars.iter().collect();
        stars.sort_by_key(|s| s.id);
        stars.dedup_by_key(|s| s.id);
        if stars.is_empty() {
            return Vec::new();
        }

        let edges = proximity_edges(&stars, connection_distance);

        let mut sets = DisjointSet::new(stars.len());
        for &(a, b) in &edges {
            sets.union(a, b);
        }

        // Keyed by root; members arrive in ascending id order.
        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..stars.len() {
            components.entry(sets.find(i)).or_default().push(i);
        }
        let mut component_edges: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
        for &(a, b) in &edges {
            component_edges.entry(sets.find(a)).or_default().push((a, b));
        }

        let mut out: Vec<Constellation> = components
            .into_iter()
            .map(|(root, members)| {
                let local_edges = component_edges.remove(&root).unwrap_or_default();
                self.build(&stars, &members, &local_edges)
            })
            .collect();
        out.sort_by_key(|c| c.members[0]);

        tracing::debug!(
            stars = stars.len(),
            edges = edges.len(),
            constellations = out.len(),
            "formed constellations"
        );
        out
    }

    fn build(
        &self,
        stars: &[&Arc<Star>],
        members: &[usize],
        edges: &[(usize, usize)],
    ) -> Constellation {
        let mut degree: BTreeMap<usize, usize> = BTreeMap::new();
        for &(a, b) in edges {
            *degree.entry(a).or_default() += 1;
            *degree.entry(b).or_default() += 1;
        }
        let max_degree = degree.values().copied().max().unwrap_or(0);

        let pattern = if members.len() == 1 {
            Pattern::Fragment
        } else if edges.len() == members.len() - 1 && max_degree <= 2 {
            Pattern::Chain
        } else {
            Pattern::Cluster
        };

        let mut edge_ids: Vec<(StarId, StarId)> = edges
            .iter()
            .map(|&(a, b)| (stars[a].id, stars[b].id))
            .collect();
        edge_ids.sort();

        let member_stars: Vec<&Star> = members.iter().map(|&i| stars[i].as_ref()).collect();
        Constellation {
            members: member_stars.iter().map(|s| s.id).collect(),
            edges: edge_ids,
            pattern,
            tone: nearest_tone(&centroid(&member_stars), self.tones),
        }
    }
}

/// Index pairs `(i, j)`, `i < j`, whose stars lie within `distance`.
fn proximity_edges(stars: &[&Arc<Star>], distance: f64) -> Vec<(usize, usize)> {
    if distance.is_nan() || distance < 0.0 {
        return Vec::new();
    }
    // Point ids here are positions in `stars`, not star ids.
    let points = stars
        .iter()
        .enumerate()
        .map(|(i, s)| IndexedPoint {
            id: StarId(i as u64),
            coordinates: s.coordinates,
        })
        .collect();
    let tree = KdTree::build(points);

    let mut edges = Vec::new();
    for (i, star) in stars.iter().enumerate() {
        let mut neighbors: Vec<usize> = tree
            .range_query(&star.coordinates, distance)
            .into_iter()
            .map(|id| id.0 as usize)
            .filter(|&j| j > i)
            .collect();
        neighbors.sort_unstable();
        edges.extend(neighbors.into_iter().map(|j| (i, j)));
    }
    edges
}

/// Gravity-weighted mean position; plain mean when no member has gravity.
pub fn centroid(stars: &[&Star]) -> [f64; 4] {
    let total_gravity: f64 = stars.iter().map(|s| s.gravity).sum();
    let mut center = [0.0; 4];
    if stars.is_empty() {
        return center;
    }
    for star in stars {
        let weight = if total_gravity > 0.0 {
            star.gravity / total_gravity
        } else {
            1.0 / stars.len() as f64
        };
        for (c, x) in center.iter_mut().zip(star.coordinates) {
            *c += weight * x;
        }
    }
    center
}

/// Label of the closest tone center. Earlier tones win ties.
pub fn nearest_tone(point: &[f64; 4], tones: &[ToneCenter]) -> Option<String> {
    tones
        .iter()
        .map(|tone| (tone, squared_distance(point, &tone.center)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(tone, _)| tone.label.clone())
}

/// Union-find with path halving and union by size.
struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut a, mut b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        if self.size[a] < self.size[b] {
            std::mem::swap(&mut a, &mut b);
        }
        self.parent[b] = a;
        self.size[a] += self.size[b];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tones;
    use crate::orientation::Orientation;
    use crate::spectrum::{RainbowCode, SpectrumCompressor};
    use crate::wave::WavePattern;
    use std::collections::BTreeSet;

    fn code() -> RainbowCode {
        SpectrumCompressor::compress(&WavePattern::new(Orientation::canonical(), 1.0, 0.5, 0.0))
    }

    fn star(id: u64, coordinates: [f64; 4], gravity: f64) -> Arc<Star> {
        Arc::new(Star {
            id: StarId(id),
            code: code(),
            coordinates,
            brightness: 1.0,
            gravity,
            tags: BTreeSet::new(),
            created_at: id,
        })
    }

    fn tones() -> Vec<ToneCenter> {
        vec![
            ToneCenter::new("low", [-0.5, 0.0, 0.0, 0.0]),
            ToneCenter::new("high", [0.5, 0.0, 0.0, 0.0]),
        ]
    }

    #[test]
    fn test_empty_input() {
        let tones = tones();
        assert!(ConstellationFormer::new(&tones).form(&[], 0.5).is_empty());
    }

    #[test]
    fn test_isolated_star_is_fragment() {
        let tones = tones();
        let stars = [star(3, [0.6, 0.0, 0.0, 0.0], 0.0)];
        let out = ConstellationFormer::new(&tones).form(&stars, 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pattern, Pattern::Fragment);
        assert!(out[0].edges.is_empty());
        assert_eq!(out[0].tone.as_deref(), Some("high"));
    }

    #[test]
    fn test_path_is_chain() {
        let stars = vec![
            star(0, [0.0, 0.0, 0.0, 0.0], 0.0),
            star(1, [0.4, 0.0, 0.0, 0.0], 0.0),
            star(2, [0.8, 0.0, 0.0, 0.0], 0.0),
        ];
        let tones = tones();
        let out = ConstellationFormer::new(&tones).form(&stars, 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pattern, Pattern::Chain);
        assert_eq!(
            out[0].edges,
            vec![(StarId(0), StarId(1)), (StarId(1), StarId(2))]
        );
    }

    #[test]
    fn test_triangle_is_cluster() {
        let stars = vec![
            star(0, [0.0, 0.0, 0.0, 0.0], 0.0),
            star(1, [0.3, 0.0, 0.0, 0.0], 0.0),
            star(2, [0.15, 0.25, 0.0, 0.0], 0.0),
        ];
        let tones = tones();
        let out = ConstellationFormer::new(&tones).form(&stars, 0.5);
        assert_eq!(out[0].pattern, Pattern::Cluster);
        assert_eq!(out[0].edges.len(), 3);
    }

    #[test]
    fn test_star_shape_is_cluster() {
        // Hub with three spokes: a tree, but degree 3
        let stars = vec![
            star(0, [0.0, 0.0, 0.0, 0.0], 0.0),
            star(1, [0.4, 0.0, 0.0, 0.0], 0.0),
            star(2, [0.0, 0.4, 0.0, 0.0], 0.0),
            star(3, [0.0, 0.0, 0.4, 0.0], 0.0),
        ];
        let tones = tones();
        let out = ConstellationFormer::new(&tones).form(&stars, 0.45);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].edges.len(), 3);
        assert_eq!(out[0].pattern, Pattern::Cluster);
    }

    #[test]
    fn test_components_ordered_by_smallest_member() {
        let stars = vec![
            star(5, [0.9, 0.9, 0.9, 0.9], 0.0),
            star(1, [-0.9, -0.9, -0.9, -0.9], 0.0),
            star(2, [0.8, 0.9, 0.9, 0.9], 0.0),
        ];
        let tones = tones();
        let out = ConstellationFormer::new(&tones).form(&stars, 0.5);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].members, vec![StarId(1)]);
        assert_eq!(out[1].members, vec![StarId(2), StarId(5)]);
        assert_eq!(out[1].pattern, Pattern::Chain);
    }

    #[test]
    fn test_input_order_and_duplicates_ignored() {
        let a = star(0, [0.0; 4], 0.2);
        let b = star(1, [0.2, 0.0, 0.0, 0.0], 0.5);
        let c = star(2, [-0.7, 0.1, 0.0, 0.0], 0.9);
        let tones = default_tones();
        let former = ConstellationFormer::new(&tones);
        let first = former.form(&[a.clone(), b.clone(), c.clone()], 0.5);
        let second = former.form(&[c, b.clone(), a, b], 0.5);
        assert_eq!(first, second);
    }

    #[test]
    fn test_tone_uses_gravity_weighting() {
        let stars = vec![
            star(0, [-0.4, 0.0, 0.0, 0.0], 0.0),
            star(1, [0.4, 0.0, 0.0, 0.0], 1.0),
        ];
        let tones = tones();
        let out = ConstellationFormer::new(&tones).form(&stars, 1.0);
        assert_eq!(out[0].tone.as_deref(), Some("high"));
    }

    #[test]
    fn test_no_tones_means_no_label() {
        let out = ConstellationFormer::new(&[]).form(&[star(0, [0.0; 4], 0.0)], 0.5);
        assert_eq!(out[0].tone, None);
    }

    #[test]
    fn test_negative_distance_connects_nothing() {
        let stars = vec![star(0, [0.0; 4], 0.0), star(1, [0.0; 4], 0.0)];
        let tones = tones();
        let out = ConstellationFormer::new(&tones).form(&stars, -1.0);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.pattern == Pattern::Fragment));
    }

    #[test]
    fn test_centroid_falls_back_to_mean() {
        let a = star(0, [0.0, 0.0, 0.0, 0.0], 0.0);
        let b = star(1, [1.0, 1.0, 0.0, 0.0], 0.0);
        assert_eq!(centroid(&[&a, &b]), [0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_pattern_display_matches_serde() {
        assert_eq!(Pattern::Chain.to_string(), "chain");
        assert_eq!(serde_json::to_string(&Pattern::Cluster).unwrap(), "\"cluster\"");
    }
}
