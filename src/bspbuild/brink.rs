//! Brink analysis for the clipping hulls.
//!
//! At an edge where three or more clipnode regions meet, the engine's
//! traceline picks clipping planes in encounter order, and on a convex
//! solid corner between two empty regions it can pick the wrong one and
//! cut through the corner. The repair walks a circle of probes around
//! every such edge ("wedge circle"), finds the solid and empty wedges,
//! and splices an extra partition plane through the edge into the
//! clipnode tree so the trace is forced to resolve the corner
//! consistently. Partitions merge by plane identity with the more
//! important classification winning.

use std::collections::HashMap;

use glam::DVec3;

use bsp::Contents;

use crate::planes::PlaneRegistry;

use super::{portals::PortalGraph, tree::Tree};

/// Importance order, most important last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BrinkLevel {
    Any,
    Wall,
    WallBlocking,
    Floor,
    FloorBlocking,
}

#[derive(Debug, Clone)]
pub struct Partition {
    /// Plane registry index, oriented with the front toward the empty
    /// wedge it repairs.
    pub plane: u16,
    pub level: BrinkLevel,
    /// Contents spliced in behind the partition. Kept Empty so a
    /// repair can never turn a passable trace into a blocked one; the
    /// partition exists to pin the plane evaluation order.
    pub back_contents: Contents,
}

#[derive(Debug, Default)]
pub struct BrinkSummary {
    pub edges_examined: usize,
    pub brinks_found: usize,
    pub partitions_added: usize,
}

fn vertex_key(p: DVec3) -> [i64; 3] {
    [
        (p.x * 100.0).round() as i64,
        (p.y * 100.0).round() as i64,
        (p.z * 100.0).round() as i64,
    ]
}

fn edge_key(a: DVec3, b: DVec3) -> ([i64; 3], [i64; 3]) {
    let (ka, kb) = (vertex_key(a), vertex_key(b));
    if ka <= kb {
        (ka, kb)
    } else {
        (kb, ka)
    }
}

const WEDGE_SAMPLES: usize = 24;
const PROBE_RADIUS: f64 = 0.3;

/// Examines every clipnode-mesh edge of a hull tree and returns the
/// partitions to splice, keyed by the tree leaf they attach to.
pub fn analyze(
    tree: &Tree,
    planes: &mut PlaneRegistry,
    graph: &PortalGraph,
) -> (HashMap<u32, Vec<Partition>>, BrinkSummary) {
    let mut summary = BrinkSummary::default();

    // edges shared by more than one portal have three or more regions
    // around them
    let mut edges: HashMap<([i64; 3], [i64; 3]), (DVec3, DVec3, usize)> = HashMap::new();
    for portal in &graph.portals {
        let n = portal.winding.size();
        for i in 0..n {
            let a = portal.winding.points[i];
            let b = portal.winding.points[(i + 1) % n];
            let entry = edges.entry(edge_key(a, b)).or_insert((a, b, 0));
            entry.2 += 1;
        }
    }

    let mut partitions: HashMap<u32, Vec<Partition>> = HashMap::new();
    // plane -> strongest level seen, for the merge pass
    let mut plane_levels: HashMap<u16, BrinkLevel> = HashMap::new();

    let mut candidates: Vec<(DVec3, DVec3)> = edges
        .into_values()
        .filter(|&(_, _, count)| count >= 2)
        .map(|(a, b, _)| (a, b))
        .collect();
    // deterministic processing order
    candidates.sort_by(|x, y| {
        vertex_key(x.0)
            .cmp(&vertex_key(y.0))
            .then(vertex_key(x.1).cmp(&vertex_key(y.1)))
    });

    for (a, b) in candidates {
        summary.edges_examined += 1;

        let Some(brink) = examine_edge(tree, planes, a, b) else {
            continue;
        };
        summary.brinks_found += 1;

        let plane = planes.intern(brink.partition_normal, brink.partition_dist);

        // merge by plane identity: most important level wins
        let level = plane_levels
            .entry(plane & !1)
            .and_modify(|l| *l = (*l).max(brink.level))
            .or_insert(brink.level);
        let level = *level;

        for leaf in brink.empty_leaves {
            let list = partitions.entry(leaf).or_default();
            // dedup by merge key within the leaf
            if list.iter().any(|p| p.plane & !1 == plane & !1) {
                continue;
            }
            list.push(Partition {
                plane,
                level,
                back_contents: Contents::Empty,
            });
            summary.partitions_added += 1;
        }
    }

    (partitions, summary)
}

struct BrinkEdge {
    partition_normal: DVec3,
    partition_dist: f64,
    level: BrinkLevel,
    empty_leaves: Vec<u32>,
}

/// Walks the wedge circle around one edge. A brink shows up as exactly
/// one solid wedge spanning less than half the circle, with empty
/// space wrapping around the convex corner.
fn examine_edge(
    tree: &Tree,
    planes: &PlaneRegistry,
    a: DVec3,
    b: DVec3,
) -> Option<BrinkEdge> {
    let dir = (b - a).normalize();
    let mid = (a + b) * 0.5;

    // a basis perpendicular to the edge
    let up = if dir.z.abs() < 0.9 { DVec3::Z } else { DVec3::X };
    let u = (up - dir * up.dot(dir)).normalize();
    let v = dir.cross(u);

    let mut solid = [false; WEDGE_SAMPLES];
    let mut leaves = [0u32; WEDGE_SAMPLES];

    for i in 0..WEDGE_SAMPLES {
        let theta = i as f64 / WEDGE_SAMPLES as f64 * std::f64::consts::TAU;
        let radial = u * theta.cos() + v * theta.sin();
        let probe = mid + radial * PROBE_RADIUS;

        let leaf = tree.leaf_at(planes, probe);
        leaves[i] = leaf;
        solid[i] = tree.nodes[leaf as usize].contents() == Some(Contents::Solid);
    }

    // transitions around the circle
    let transitions = (0..WEDGE_SAMPLES)
        .filter(|&i| solid[i] != solid[(i + 1) % WEDGE_SAMPLES])
        .count();
    let solid_count = solid.iter().filter(|&&s| s).count();

    // one solid wedge, narrower than half the circle, and the empty
    // space split over at least two leaves: the convex-corner shape
    if transitions != 2 || solid_count == 0 || solid_count * 2 >= WEDGE_SAMPLES {
        return None;
    }

    let mut empty_leaves: Vec<u32> = leaves
        .iter()
        .zip(solid.iter())
        .filter(|&(_, &s)| !s)
        .map(|(&l, _)| l)
        .collect();
    empty_leaves.sort_unstable();
    empty_leaves.dedup();
    if empty_leaves.len() < 2 {
        return None;
    }

    // bisector of the empty wedge decides both the partition plane and
    // the classification
    let mut bisector = DVec3::ZERO;
    for i in 0..WEDGE_SAMPLES {
        if solid[i] {
            continue;
        }
        let theta = i as f64 / WEDGE_SAMPLES as f64 * std::f64::consts::TAU;
        bisector += u * theta.cos() + v * theta.sin();
    }
    let bisector = bisector.normalize();

    let empty_span = WEDGE_SAMPLES - solid_count;
    let blocking = empty_span * 4 >= WEDGE_SAMPLES * 3;

    let level = if bisector.z > 0.7 {
        if blocking {
            BrinkLevel::FloorBlocking
        } else {
            BrinkLevel::Floor
        }
    } else if bisector.z.abs() < 0.3 {
        if blocking {
            BrinkLevel::WallBlocking
        } else {
            BrinkLevel::Wall
        }
    } else {
        BrinkLevel::Any
    };

    Some(BrinkEdge {
        partition_normal: bisector,
        partition_dist: mid.dot(bisector),
        level,
        empty_leaves,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bspbuild::portals::portalize;
    use crate::bspbuild::solidbsp::{build_tree, PickSplit};
    use crate::bspbuild::stage_faces_for_tests;
    use crate::csg::test_support::{cube_brush_minmax, worldspawn_with};
    use crate::math::BoundingBox;

    /// A step against a floor: top tread and wall meet in a concave
    /// edge with a convex corner at the nose of the tread.
    fn staircase_map() -> map::Map {
        worldspawn_with(vec![
            // floor slab
            cube_brush_minmax(
                DVec3::new(-256.0, -128.0, -32.0),
                DVec3::new(256.0, 128.0, 0.0),
                "stone",
            ),
            // tread
            cube_brush_minmax(
                DVec3::new(0.0, -128.0, 0.0),
                DVec3::new(64.0, 128.0, 16.0),
                "stone",
            ),
        ])
    }

    #[test]
    fn staircase_produces_partitions() {
        let (mut planes, faces) = stage_faces_for_tests(&staircase_map());
        let tree = build_tree(&planes, faces, PickSplit::First);

        let mut bounds = BoundingBox::empty();
        for node in &tree.nodes {
            bounds.union(&node.bounds);
        }
        let graph = portalize(&tree, &planes, &bounds);

        let (partitions, summary) = analyze(&tree, &mut planes, &graph);

        assert!(summary.edges_examined > 0);
        // the tread nose is a convex corner between two empty regions
        assert!(summary.brinks_found > 0);
        assert_eq!(
            summary.partitions_added,
            partitions.values().map(|v| v.len()).sum::<usize>()
        );
    }

    #[test]
    fn repair_is_idempotent() {
        let (mut planes, faces) = stage_faces_for_tests(&staircase_map());
        let tree = build_tree(&planes, faces, PickSplit::First);

        let mut bounds = BoundingBox::empty();
        for node in &tree.nodes {
            bounds.union(&node.bounds);
        }
        let graph = portalize(&tree, &planes, &bounds);

        let (first, s1) = analyze(&tree, &mut planes, &graph);
        let (second, s2) = analyze(&tree, &mut planes, &graph);

        assert_eq!(s1.partitions_added, s2.partitions_added);
        assert_eq!(first.len(), second.len());
        for (leaf, list) in &first {
            let other = &second[leaf];
            assert_eq!(list.len(), other.len());
            for (a, b) in list.iter().zip(other) {
                assert_eq!(a.plane, b.plane);
                assert_eq!(a.level, b.level);
            }
        }
    }

    #[test]
    fn partitions_never_solidify() {
        let (mut planes, faces) = stage_faces_for_tests(&staircase_map());
        let tree = build_tree(&planes, faces, PickSplit::First);

        let mut bounds = BoundingBox::empty();
        for node in &tree.nodes {
            bounds.union(&node.bounds);
        }
        let graph = portalize(&tree, &planes, &bounds);
        let (partitions, _) = analyze(&tree, &mut planes, &graph);

        for list in partitions.values() {
            for partition in list {
                assert_eq!(partition.back_contents, Contents::Empty);
            }
        }
    }
}
