//! Turning trees back into lumps.
//!
//! Solid leaves all collapse into shared leaf 0; node children encode
//! leaves as `-(leaf_index + 1)`; faces dedup vertices and share edges
//! with their neighbors through negated surfedges; clipnode trees
//! flatten bottom-up with `(plane, child, child)` merging.

use std::collections::HashMap;

use glam::DVec3;

use bsp::{Bsp, Contents};

use crate::{
    math::ON_EPSILON,
    planes::PlaneRegistry,
    winding::{FaceSide, Winding},
};

use super::tree::{Tree, TreeNodeKind};

fn vertex_key(p: DVec3) -> [i64; 3] {
    [
        (p.x * 100.0).round() as i64,
        (p.y * 100.0).round() as i64,
        (p.z * 100.0).round() as i64,
    ]
}

#[derive(Default)]
pub struct LumpWriter {
    vertex_map: HashMap<[i64; 3], u16>,
    edge_map: HashMap<(u16, u16), u16>,
    clipnode_merge: HashMap<(i32, i16, i16), i16>,
}

pub struct ModelLumps {
    pub head_node: i32,
    pub first_face: i32,
    pub face_count: i32,
    pub vis_leaves: i32,
    pub mins: DVec3,
    pub maxs: DVec3,
    /// Tree leaf id -> lump leaf index, for the portal file writer.
    pub leaf_map: HashMap<u32, usize>,
}

impl LumpWriter {
    pub fn new(bsp: &mut Bsp) -> Self {
        // leaf 0 is the shared solid leaf; edge 0 is unused by the engine
        bsp.leaves.clear();
        bsp.leaves.push(bsp::Leaf {
            contents: Contents::Solid,
            vis_offset: -1,
            mins: [0; 3],
            maxs: [0; 3],
            first_mark_surface: 0,
            mark_surface_count: 0,
            ambient_levels: [0; 4],
        });
        bsp.nodes.clear();
        bsp.faces.clear();
        bsp.vertices.clear();
        bsp.edges.clear();
        bsp.edges.push([0, 0]);
        bsp.surf_edges.clear();
        bsp.mark_surfaces.clear();
        bsp.clipnodes.clear();
        bsp.models.clear();

        Self::default()
    }

    fn vertex_index(&mut self, bsp: &mut Bsp, p: DVec3) -> u16 {
        let key = vertex_key(p);
        if let Some(&index) = self.vertex_map.get(&key) {
            return index;
        }
        let index = bsp.vertices.len() as u16;
        bsp.vertices.push(crate::math::to_f32(p));
        self.vertex_map.insert(key, index);
        index
    }

    /// Surfedge for the directed edge a -> b: positive for a fresh
    /// edge, negative when the neighbor already owns it reversed.
    fn surfedge(&mut self, bsp: &mut Bsp, a: u16, b: u16) -> i32 {
        if let Some(&edge) = self.edge_map.get(&(b, a)) {
            return -(edge as i32);
        }
        if let Some(&edge) = self.edge_map.get(&(a, b)) {
            return edge as i32;
        }
        let edge = bsp.edges.len() as u16;
        bsp.edges.push([a, b]);
        self.edge_map.insert((a, b), edge);
        edge as i32
    }

    fn emit_face(&mut self, bsp: &mut Bsp, winding: &Winding, plane: u16, texinfo: u16) -> u16 {
        let first_edge = bsp.surf_edges.len() as i32;

        let indices: Vec<u16> = winding
            .points
            .iter()
            .map(|&p| self.vertex_index(bsp, p))
            .collect();
        for i in 0..indices.len() {
            let a = indices[i];
            let b = indices[(i + 1) % indices.len()];
            let surfedge = self.surfedge(bsp, a, b);
            bsp.surf_edges.push(surfedge);
        }

        let face_index = bsp.faces.len() as u16;
        bsp.faces.push(bsp::Face {
            plane: plane & !1,
            side: (plane & 1) as u16,
            first_edge,
            edge_count: indices.len() as u16,
            texinfo,
            styles: [255; 4],
            lightmap_offset: -1,
        });
        face_index
    }

    /// Writes one model's tree: nodes, leaves, drawn faces and
    /// marksurfaces. Returns the lump spans for the model entry.
    pub fn write_model(&mut self, bsp: &mut Bsp, tree: &Tree, planes: &PlaneRegistry) -> ModelLumps {
        let first_face = bsp.faces.len() as i32;
        let node_base = bsp.nodes.len();

        // pre-order the internal nodes so child indices are stable
        let mut order = Vec::new();
        preorder(tree, tree.root, &mut order);
        let node_index: HashMap<u32, usize> = order
            .iter()
            .enumerate()
            .map(|(i, &n)| (n, node_base + i))
            .collect();

        // empty (and liquid) leaves get fresh lump entries
        let mut leaf_index: HashMap<u32, usize> = HashMap::new();
        for (tree_index, node) in tree.nodes.iter().enumerate() {
            if let TreeNodeKind::Leaf { contents, .. } = &node.kind {
                if *contents != Contents::Solid {
                    let index = bsp.leaves.len();
                    leaf_index.insert(tree_index as u32, index);
                    bsp.leaves.push(bsp::Leaf {
                        contents: *contents,
                        vis_offset: -1,
                        mins: clamp_bounds(node.bounds.mins),
                        maxs: clamp_bounds(node.bounds.maxs),
                        first_mark_surface: 0,
                        mark_surface_count: 0,
                        ambient_levels: [0; 4],
                    });
                }
            }
        }
        let vis_leaves = leaf_index.len() as i32;

        // faces in node pre-order; remember where each fragment lands
        let mut pushdowns: Vec<(u16, Winding)> = Vec::new();

        for &tree_index in &order {
            let node = &tree.nodes[tree_index as usize];
            let TreeNodeKind::Node { plane, faces, .. } = &node.kind else {
                unreachable!();
            };

            let node_first_face = bsp.faces.len() as u16;
            for face in faces {
                if face.texinfo < 0 {
                    continue;
                }
                let index =
                    self.emit_face(bsp, &face.winding, face.plane, face.texinfo as u16);
                pushdowns.push((index, face.winding.clone()));
            }
            let face_count = bsp.faces.len() as u16 - node_first_face;

            let mins = clamp_bounds(node.bounds.mins);
            let maxs = clamp_bounds(node.bounds.maxs);
            bsp.nodes.push(bsp::Node {
                plane: (*plane & !1) as u32,
                children: [0, 0], // patched below
                mins,
                maxs,
                first_face: node_first_face,
                face_count,
            });
        }

        // patch children now that both maps exist
        for &tree_index in &order {
            let TreeNodeKind::Node { children, .. } = &tree.nodes[tree_index as usize].kind
            else {
                unreachable!();
            };

            let encode = |child: u32| -> i16 {
                match &tree.nodes[child as usize].kind {
                    TreeNodeKind::Node { .. } => node_index[&child] as i16,
                    TreeNodeKind::Leaf { contents, .. } => {
                        let lump_leaf = if *contents == Contents::Solid {
                            0
                        } else {
                            leaf_index[&child]
                        };
                        -(lump_leaf as i16 + 1)
                    }
                }
            };

            let encoded = [encode(children[0]), encode(children[1])];
            bsp.nodes[node_index[&tree_index]].children = encoded;
        }

        // marksurfaces: push each drawn face down to the leaves it rims
        let mut marks: HashMap<usize, Vec<u16>> = HashMap::new();
        for (face_index, winding) in pushdowns {
            push_face_down(planes, tree, tree.root, &winding, face_index, &leaf_index, &mut marks);
        }

        // emit marksurfaces in lump-leaf order so output is stable
        let mut ordered: Vec<(u32, usize)> =
            leaf_index.iter().map(|(&tree, &lump)| (tree, lump)).collect();
        ordered.sort_unstable_by_key(|&(_, lump)| lump);

        for (tree_leaf, lump_leaf) in ordered {
            let Some(faces) = marks.get_mut(&(tree_leaf as usize)) else {
                continue;
            };
            faces.sort_unstable();
            faces.dedup();

            bsp.leaves[lump_leaf].first_mark_surface = bsp.mark_surfaces.len() as u16;
            bsp.leaves[lump_leaf].mark_surface_count = faces.len() as u16;
            bsp.mark_surfaces.extend(faces.iter().copied());
        }

        let head_node = if tree.nodes[tree.root as usize].is_leaf() {
            // a model that is a single leaf still needs a node
            -1
        } else {
            node_index[&tree.root] as i32
        };

        let bounds = &tree.nodes[tree.root as usize].bounds;
        ModelLumps {
            head_node,
            first_face,
            face_count: bsp.faces.len() as i32 - first_face,
            vis_leaves,
            mins: bounds.mins,
            maxs: bounds.maxs,
            leaf_map: leaf_index,
        }
    }

    /// Flattens a hull tree into the shared clipnode array, merging
    /// identical `(plane, children)` triples. Returns the head index,
    /// or the negative contents when the whole tree is one leaf.
    pub fn write_clipnodes(
        &mut self,
        bsp: &mut Bsp,
        tree: &Tree,
        partitions: &HashMap<u32, Vec<super::brink::Partition>>,
    ) -> i32 {
        self.flatten_clipnode(bsp, tree, tree.root, partitions)
    }

    fn flatten_clipnode(
        &mut self,
        bsp: &mut Bsp,
        tree: &Tree,
        node: u32,
        partitions: &HashMap<u32, Vec<super::brink::Partition>>,
    ) -> i32 {
        match &tree.nodes[node as usize].kind {
            TreeNodeKind::Leaf { contents, .. } => {
                let mut head = *contents as i32;
                // brink partitions splice in as extra clipnodes above
                // the leaf they repair
                if let Some(list) = partitions.get(&node) {
                    for partition in list {
                        head = self.intern_clipnode(
                            bsp,
                            (partition.plane & !1) as i32,
                            if partition.plane & 1 == 0 {
                                [head as i16, partition.back_contents as i16]
                            } else {
                                [partition.back_contents as i16, head as i16]
                            },
                        );
                    }
                }
                head
            }
            TreeNodeKind::Node { plane, children, .. } => {
                let front = self.flatten_clipnode(bsp, tree, children[0], partitions);
                let back = self.flatten_clipnode(bsp, tree, children[1], partitions);
                self.intern_clipnode(bsp, (*plane & !1) as i32, [front as i16, back as i16])
            }
        }
    }

    fn intern_clipnode(&mut self, bsp: &mut Bsp, plane: i32, children: [i16; 2]) -> i32 {
        let key = (plane, children[0], children[1]);
        if let Some(&index) = self.clipnode_merge.get(&key) {
            return index as i32;
        }
        let index = bsp.clipnodes.len() as i16;
        bsp.clipnodes.push(bsp::ClipNode { plane, children });
        self.clipnode_merge.insert(key, index);
        index as i32
    }
}

/// Filters a face winding down the tree, marking every open leaf a
/// fragment lands in.
fn push_face_down(
    planes: &PlaneRegistry,
    tree: &Tree,
    node: u32,
    winding: &Winding,
    face_index: u16,
    leaf_index: &HashMap<u32, usize>,
    marks: &mut HashMap<usize, Vec<u16>>,
) {
    match &tree.nodes[node as usize].kind {
        TreeNodeKind::Leaf { contents, .. } => {
            if *contents != Contents::Solid && leaf_index.contains_key(&node) {
                marks.entry(node as usize).or_default().push(face_index);
            }
        }
        TreeNodeKind::Node { plane, children, .. } => {
            let p = planes.get(*plane);
            match winding.side_of(p.normal, p.dist, ON_EPSILON) {
                FaceSide::Front => {
                    push_face_down(planes, tree, children[0], winding, face_index, leaf_index, marks)
                }
                FaceSide::Back => {
                    push_face_down(planes, tree, children[1], winding, face_index, leaf_index, marks)
                }
                FaceSide::On => {
                    // the face rims both sides of its own plane
                    for &child in children {
                        push_face_down(planes, tree, child, winding, face_index, leaf_index, marks);
                    }
                }
                FaceSide::Cross => {
                    let (front, back) = winding.clip(p.normal, p.dist, ON_EPSILON);
                    if let Some(front) = front {
                        push_face_down(
                            planes, tree, children[0], &front, face_index, leaf_index, marks,
                        );
                    }
                    if let Some(back) = back {
                        push_face_down(
                            planes, tree, children[1], &back, face_index, leaf_index, marks,
                        );
                    }
                }
            }
        }
    }
}

fn preorder(tree: &Tree, node: u32, order: &mut Vec<u32>) {
    if let TreeNodeKind::Node { children, .. } = &tree.nodes[node as usize].kind {
        order.push(node);
        preorder(tree, children[0], order);
        preorder(tree, children[1], order);
    }
}

fn clamp_bounds(v: DVec3) -> [i16; 3] {
    [
        v.x.clamp(i16::MIN as f64, i16::MAX as f64) as i16,
        v.y.clamp(i16::MIN as f64, i16::MAX as f64) as i16,
        v.z.clamp(i16::MIN as f64, i16::MAX as f64) as i16,
    ]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bspbuild::solidbsp::{build_tree, PickSplit};
    use crate::bspbuild::stage_faces_for_tests;
    use crate::csg::test_support::{cube_brush, worldspawn_with};
    use glam::DVec3 as V;

    /// Walks a flattened clipnode tree to the contents at a point.
    fn clip_contents(bsp: &Bsp, planes: &PlaneRegistry, head: i32, point: V) -> i32 {
        let mut at = head;
        while at >= 0 {
            let node = &bsp.clipnodes[at as usize];
            let plane = planes.get(node.plane as u16);
            let side = if point.dot(plane.normal) - plane.dist >= 0.0 {
                0
            } else {
                1
            };
            at = node.children[side] as i32;
        }
        at
    }

    #[test]
    fn clipnode_merge_is_sound() {
        // two identical cubes far apart: their subtrees merge, but
        // point queries still tell them apart
        let map = worldspawn_with(vec![
            cube_brush(V::ZERO, 32.0, "stone"),
            cube_brush(V::new(512.0, 0.0, 0.0), 32.0, "stone"),
        ]);
        let (planes, faces) = stage_faces_for_tests(&map);
        let tree = build_tree(&planes, faces, PickSplit::First);

        let mut bsp = Bsp::default();
        let mut writer = LumpWriter::new(&mut bsp);
        let head = writer.write_clipnodes(&mut bsp, &tree, &HashMap::new());

        // merging never grows past the unmerged node count
        let unmerged = tree
            .nodes
            .iter()
            .filter(|n| !n.is_leaf())
            .count();
        assert!(bsp.clipnodes.len() <= unmerged);

        // solid inside both cubes, empty between and beyond
        let solid = Contents::Solid as i32;
        let empty = Contents::Empty as i32;
        assert_eq!(clip_contents(&bsp, &planes, head, V::ZERO), solid);
        assert_eq!(
            clip_contents(&bsp, &planes, head, V::new(512.0, 0.0, 0.0)),
            solid
        );
        assert_eq!(
            clip_contents(&bsp, &planes, head, V::new(256.0, 0.0, 0.0)),
            empty
        );
        assert_eq!(
            clip_contents(&bsp, &planes, head, V::new(-200.0, 50.0, 10.0)),
            empty
        );
    }

    #[test]
    fn identical_triples_share_one_clipnode() {
        let mut bsp = Bsp::default();
        let mut writer = LumpWriter::new(&mut bsp);

        let a = writer.intern_clipnode(&mut bsp, 4, [-1, -2]);
        let b = writer.intern_clipnode(&mut bsp, 4, [-1, -2]);
        let c = writer.intern_clipnode(&mut bsp, 4, [-2, -1]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(bsp.clipnodes.len(), 2);
    }
}
