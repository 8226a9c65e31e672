//! Recursive partitioning.
//!
//! Splitter choice follows three rules in order: a face whose plane
//! cuts nothing else wins outright; otherwise minimize produced
//! fragments, breaking ties per the configured policy; faces of a
//! lower detail level are always partitioned before higher ones, which
//! keeps detail geometry from chopping up structural leaves.

use bsp::Contents;

use crate::{
    math::{BoundingBox, ON_EPSILON},
    planes::PlaneRegistry,
    winding::FaceSide,
};

use super::tree::{Tree, TreeFace, TreeNode, TreeNodeKind, NULL_NODE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickSplit {
    /// Equal-fragment ties resolve to the lowest plane index.
    #[default]
    First,
    /// Equal-fragment ties resolve to the most balanced child counts.
    Balanced,
}

/// Solidity ranking for leaf-contents inheritance: when several
/// on-plane faces disagree, the more solid one decides the region.
fn contents_rank(contents: Contents) -> u8 {
    match contents {
        Contents::Solid => 7,
        Contents::Sky => 6,
        Contents::Clip => 5,
        Contents::Lava => 4,
        Contents::Slime => 3,
        Contents::Water | Contents::Current0 | Contents::Current90 | Contents::Current180
        | Contents::Current270 | Contents::CurrentUp | Contents::CurrentDown => 2,
        Contents::Translucent => 1,
        _ => 0,
    }
}

fn dominant_contents(faces: &[&TreeFace]) -> Option<Contents> {
    faces
        .iter()
        .map(|f| f.contents)
        .max_by_key(|&c| contents_rank(c))
}

struct Builder<'a> {
    planes: &'a PlaneRegistry,
    pick: PickSplit,
    nodes: Vec<TreeNode>,
}

pub fn build_tree(
    planes: &PlaneRegistry,
    faces: Vec<TreeFace>,
    pick: PickSplit,
) -> Tree {
    let mut builder = Builder {
        planes,
        pick,
        nodes: Vec::new(),
    };

    let root = builder.build(faces, Contents::Empty, NULL_NODE);
    Tree {
        nodes: builder.nodes,
        root,
    }
}

impl Builder<'_> {
    fn build(&mut self, faces: Vec<TreeFace>, inherited: Contents, parent: u32) -> u32 {
        let mut bounds = BoundingBox::empty();
        for face in &faces {
            for &p in &face.winding.points {
                bounds.add_point(p);
            }
        }

        if faces.is_empty() {
            let index = self.nodes.len() as u32;
            self.nodes.push(TreeNode {
                parent,
                bounds,
                kind: TreeNodeKind::Leaf {
                    contents: inherited,
                    marks: Vec::new(),
                },
            });
            return index;
        }

        let splitter = self.choose_splitter(&faces);
        let canonical = splitter & !1;

        let mut on_plane: Vec<TreeFace> = Vec::new();
        let mut front: Vec<TreeFace> = Vec::new();
        let mut back: Vec<TreeFace> = Vec::new();

        let plane = self.planes.get(canonical).clone();

        for face in faces {
            if face.plane & !1 == canonical {
                on_plane.push(face);
                continue;
            }

            match face
                .winding
                .side_of(plane.normal, plane.dist, ON_EPSILON)
            {
                FaceSide::Front => front.push(face),
                FaceSide::Back => back.push(face),
                FaceSide::On => {
                    // numerically on-plane but a different registry
                    // entry: send it by facing
                    let face_normal = self.planes.get(face.plane).normal;
                    if face_normal.dot(plane.normal) > 0.0 {
                        front.push(face);
                    } else {
                        back.push(face);
                    }
                }
                FaceSide::Cross => {
                    let (f, b) = face.winding.clip(plane.normal, plane.dist, ON_EPSILON);
                    if let Some(w) = f {
                        front.push(TreeFace {
                            winding: w,
                            ..face.clone()
                        });
                    }
                    if let Some(w) = b {
                        back.push(TreeFace {
                            winding: w,
                            ..face
                        });
                    }
                }
            }
        }

        // faces wound with the node plane bound solid behind them;
        // faces wound against it bound solid in front
        let with: Vec<&TreeFace> = on_plane.iter().filter(|f| f.plane == canonical).collect();
        let against: Vec<&TreeFace> = on_plane.iter().filter(|f| f.plane == (canonical | 1)).collect();

        let front_inherited = dominant_contents(&against).unwrap_or(inherited);
        let back_inherited = dominant_contents(&with).unwrap_or(inherited);

        let index = self.nodes.len() as u32;
        self.nodes.push(TreeNode {
            parent,
            bounds,
            kind: TreeNodeKind::Node {
                plane: canonical,
                children: [NULL_NODE, NULL_NODE],
                faces: on_plane,
            },
        });

        let front_child = self.build(front, front_inherited, index);
        let back_child = self.build(back, back_inherited, index);

        match &mut self.nodes[index as usize].kind {
            TreeNodeKind::Node { children, .. } => *children = [front_child, back_child],
            TreeNodeKind::Leaf { .. } => unreachable!(),
        }

        index
    }

    fn choose_splitter(&self, faces: &[TreeFace]) -> u16 {
        // structural faces partition before detail
        let min_detail = faces.iter().map(|f| f.detail_level).min().unwrap();
        let candidates: Vec<&TreeFace> = faces
            .iter()
            .filter(|f| f.detail_level == min_detail)
            .collect();

        let mut best: Option<(u16, usize, usize)> = None; // (plane, splits, imbalance)

        for candidate in &candidates {
            let canonical = candidate.plane & !1;
            let plane = self.planes.get(canonical);

            let mut splits = 0usize;
            let mut fronts = 0usize;
            let mut backs = 0usize;

            for face in faces {
                if face.plane & !1 == canonical {
                    continue;
                }
                match face.winding.side_of(plane.normal, plane.dist, ON_EPSILON) {
                    FaceSide::Cross => splits += 1,
                    FaceSide::Front => fronts += 1,
                    FaceSide::Back => backs += 1,
                    FaceSide::On => {}
                }
            }

            let imbalance = fronts.abs_diff(backs);

            let better = match best {
                None => true,
                Some((best_plane, best_splits, best_imbalance)) => {
                    if splits != best_splits {
                        splits < best_splits
                    } else {
                        match self.pick {
                            PickSplit::First => canonical < best_plane,
                            PickSplit::Balanced => imbalance < best_imbalance,
                        }
                    }
                }
            };

            if better {
                best = Some((canonical, splits, imbalance));
            }

            // a splitter that cuts nothing cannot be beaten
            if splits == 0 && self.pick == PickSplit::First {
                break;
            }
        }

        best.expect("internal error: no splitter candidate (please file an issue)").0
    }
}
