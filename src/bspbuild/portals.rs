//! Portalization.
//!
//! Every internal node contributes a portal: its plane winding clipped
//! to the node's convex region, then split by every descendant plane.
//! What survives links pairs of leaves (or a leaf and the outside),
//! which is what outside-filling and VIS run on.

use glam::DVec3;

use crate::{
    math::{BoundingBox, ON_EPSILON},
    planes::PlaneRegistry,
    winding::{FaceSide, Winding},
};

use super::tree::{Tree, TreeNodeKind};

#[derive(Debug, Clone)]
pub struct Portal {
    pub normal: DVec3,
    pub dist: f64,
    pub winding: Winding,
    /// [front, back] relative to (normal, dist); values are tree node
    /// indices, or the graph's `outside` sentinel.
    pub nodes: [u32; 2],
}

#[derive(Debug)]
pub struct PortalGraph {
    pub portals: Vec<Portal>,
    /// Portal ids touching each leaf, indexed by tree node id.
    pub leaf_portals: Vec<Vec<usize>>,
    /// Sentinel node id for the void outside the world.
    pub outside: u32,
}

impl PortalGraph {
    pub fn other_side(&self, portal: &Portal, node: u32) -> u32 {
        if portal.nodes[0] == node {
            portal.nodes[1]
        } else {
            portal.nodes[0]
        }
    }
}

struct Portalizer<'a> {
    tree: &'a Tree,
    planes: &'a PlaneRegistry,
    portals: Vec<Option<Portal>>,
    node_portals: Vec<Vec<usize>>,
    outside: u32,
}

pub fn portalize(tree: &Tree, planes: &PlaneRegistry, world_bounds: &BoundingBox) -> PortalGraph {
    let outside = tree.nodes.len() as u32;
    let mut p = Portalizer {
        tree,
        planes,
        portals: Vec::new(),
        node_portals: vec![Vec::new(); tree.nodes.len() + 1],
        outside,
    };

    p.make_headnode_portals(world_bounds);
    p.cut_node_portals_r(tree.root);

    // compact the arena; every survivor links leaves
    let mut portals = Vec::new();
    let mut leaf_portals = vec![Vec::new(); tree.nodes.len() + 1];

    for portal in p.portals.into_iter().flatten() {
        let id = portals.len();
        for node in portal.nodes {
            leaf_portals[node as usize].push(id);
        }
        portals.push(portal);
    }

    PortalGraph {
        portals,
        leaf_portals,
        outside,
    }
}

impl Portalizer<'_> {
    fn add_portal(&mut self, portal: Portal) -> usize {
        let id = self.portals.len();
        for node in portal.nodes {
            self.node_portals[node as usize].push(id);
        }
        self.portals.push(Some(portal));
        id
    }

    fn remove_from_node(&mut self, id: usize, node: u32) {
        let list = &mut self.node_portals[node as usize];
        if let Some(at) = list.iter().position(|&p| p == id) {
            list.swap_remove(at);
        }
    }

    /// Swaps `from` for `to` on whichever side of the portal held it.
    fn relink(&mut self, id: usize, from: u32, to: u32) {
        self.remove_from_node(id, from);
        let portal = self.portals[id].as_mut().unwrap();
        if portal.nodes[0] == from {
            portal.nodes[0] = to;
        } else {
            portal.nodes[1] = to;
        }
        self.node_portals[to as usize].push(id);
    }

    /// Six portals over an expanded world box, linking the root to the
    /// outside sentinel.
    fn make_headnode_portals(&mut self, bounds: &BoundingBox) {
        let bounds = bounds.expand(64.0);

        for axis in 0..3 {
            for positive in [false, true] {
                let mut normal = DVec3::ZERO;
                let dist;
                if positive {
                    normal[axis] = 1.0;
                    dist = bounds.maxs[axis];
                } else {
                    normal[axis] = -1.0;
                    dist = -bounds.mins[axis];
                }

                // front of the plane faces the void
                let mut winding = Winding::from_plane(normal, dist);
                // clip to the other five box planes so the portals seal
                for other_axis in 0..3 {
                    if other_axis == axis {
                        continue;
                    }
                    let mut n = DVec3::ZERO;
                    n[other_axis] = -1.0;
                    winding.chop_in_place(n, -bounds.maxs[other_axis], ON_EPSILON);
                    n[other_axis] = 1.0;
                    winding.chop_in_place(n, bounds.mins[other_axis], ON_EPSILON);
                }

                let portal = Portal {
                    normal,
                    dist,
                    winding,
                    nodes: [self.outside, self.tree.root],
                };
                self.add_portal(portal);
            }
        }
    }

    fn cut_node_portals_r(&mut self, node: u32) {
        let (plane_index, children) = match &self.tree.nodes[node as usize].kind {
            TreeNodeKind::Leaf { .. } => return,
            TreeNodeKind::Node { plane, children, .. } => (*plane, *children),
        };

        let plane = self.planes.get(plane_index).clone();

        // the node portal: the split plane clipped to this node's region
        let mut node_winding = Some(Winding::from_plane(plane.normal, plane.dist));
        for &id in &self.node_portals[node as usize].clone() {
            let portal = self.portals[id].as_ref().unwrap();
            let (normal, dist) = if portal.nodes[0] == node {
                // node is on the front: keep the front side
                (portal.normal, portal.dist)
            } else {
                (-portal.normal, -portal.dist)
            };

            if let Some(w) = node_winding.as_mut() {
                if !w.chop_in_place(normal, dist, ON_EPSILON) {
                    node_winding = None;
                    break;
                }
            }
        }

        if let Some(winding) = node_winding {
            if winding.is_valid() {
                self.add_portal(Portal {
                    normal: plane.normal,
                    dist: plane.dist,
                    winding,
                    nodes: [children[0], children[1]],
                });
            }
        }

        // split this node's portals between the children
        for id in self.node_portals[node as usize].clone() {
            let portal = self.portals[id].as_ref().unwrap();
            let winding = portal.winding.clone();
            let nodes = portal.nodes;

            match winding.side_of(plane.normal, plane.dist, ON_EPSILON) {
                FaceSide::Front | FaceSide::On => {
                    self.relink(id, node, children[0]);
                }
                FaceSide::Back => {
                    self.relink(id, node, children[1]);
                }
                FaceSide::Cross => {
                    let (front, back) = winding.clip(plane.normal, plane.dist, ON_EPSILON);

                    let other = if nodes[0] == node { nodes[1] } else { nodes[0] };
                    let keep_front = nodes[0] == node;

                    // retire the old portal entirely
                    self.remove_from_node(id, nodes[0]);
                    self.remove_from_node(id, nodes[1]);
                    let old = self.portals[id].take().unwrap();

                    for (child, piece) in [(children[0], front), (children[1], back)] {
                        let Some(piece) = piece else { continue };
                        let nodes = if keep_front {
                            [child, other]
                        } else {
                            [other, child]
                        };
                        self.add_portal(Portal {
                            normal: old.normal,
                            dist: old.dist,
                            winding: piece,
                            nodes,
                        });
                    }
                }
            }
        }
        self.node_portals[node as usize].clear();

        self.cut_node_portals_r(children[0]);
        self.cut_node_portals_r(children[1]);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bspbuild::solidbsp::{build_tree, PickSplit};
    use crate::bspbuild::solidbsp::test::faces_from_cube;
    use bsp::Contents;

    #[test]
    fn cube_portals_link_leaves() {
        let (planes, faces) = faces_from_cube();
        let tree = build_tree(&planes, faces, PickSplit::First);

        let mut bounds = BoundingBox::empty();
        for node in &tree.nodes {
            bounds.union(&node.bounds);
        }

        let graph = portalize(&tree, &planes, &bounds);
        assert!(!graph.portals.is_empty());

        for portal in &graph.portals {
            assert!(portal.winding.is_valid());
            for node in portal.nodes {
                assert!(
                    node == graph.outside || tree.nodes[node as usize].is_leaf(),
                    "portal must link leaves"
                );
            }
        }
    }

    #[test]
    fn solid_interior_has_no_portal_to_outside() {
        let (planes, faces) = faces_from_cube();
        let tree = build_tree(&planes, faces, PickSplit::First);

        let mut bounds = BoundingBox::empty();
        for node in &tree.nodes {
            bounds.union(&node.bounds);
        }
        let graph = portalize(&tree, &planes, &bounds);

        let inside = tree.leaf_at(&planes, glam::DVec3::ZERO);
        assert_eq!(tree.nodes[inside as usize].contents(), Some(Contents::Solid));

        // no portal joins the solid interior directly to the void
        for portal in &graph.portals {
            let touches_inside = portal.nodes.contains(&inside);
            let touches_outside = portal.nodes.contains(&graph.outside);
            assert!(!(touches_inside && touches_outside));
        }
    }
}
