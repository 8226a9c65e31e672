//! The working BSP tree.
//!
//! Nodes live in an arena and reference each other by index;
//! `NULL_NODE` is the sentinel. Leaves carry contents and the face
//! fragments that ended up on their boundary.

use bsp::Contents;

use crate::{
    math::BoundingBox,
    winding::Winding,
};

pub const NULL_NODE: u32 = u32::MAX;

/// A face being pushed through tree construction.
#[derive(Debug, Clone)]
pub struct TreeFace {
    /// Plane registry index in the face's orientation.
    pub plane: u16,
    pub contents: Contents,
    pub texinfo: i32,
    pub detail_level: u16,
    /// Index into the stage's original face table, for marksurfaces.
    pub source: u32,
    pub winding: Winding,
}

#[derive(Debug)]
pub enum TreeNodeKind {
    Node {
        /// Canonical (even) plane registry index.
        plane: u16,
        children: [u32; 2],
        /// Faces lying on the node plane, in either orientation.
        faces: Vec<TreeFace>,
    },
    Leaf {
        contents: Contents,
        /// Source indices of faces touching this leaf.
        marks: Vec<u32>,
    },
}

#[derive(Debug)]
pub struct TreeNode {
    pub parent: u32,
    pub bounds: BoundingBox,
    pub kind: TreeNodeKind,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, TreeNodeKind::Leaf { .. })
    }

    pub fn contents(&self) -> Option<Contents> {
        match &self.kind {
            TreeNodeKind::Leaf { contents, .. } => Some(*contents),
            TreeNodeKind::Node { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
    pub root: u32,
}

impl Tree {
    pub fn leaf_indices(&self) -> Vec<u32> {
        (0..self.nodes.len() as u32)
            .filter(|&i| self.nodes[i as usize].is_leaf())
            .collect()
    }

    /// Leaf index containing a point, walking hull-0 style.
    pub fn leaf_at(&self, planes: &crate::planes::PlaneRegistry, point: glam::DVec3) -> u32 {
        let mut at = self.root;
        loop {
            match &self.nodes[at as usize].kind {
                TreeNodeKind::Leaf { .. } => return at,
                TreeNodeKind::Node { plane, children, .. } => {
                    let p = planes.get(*plane);
                    let side = if point.dot(p.normal) - p.dist >= 0.0 { 0 } else { 1 };
                    at = children[side];
                }
            }
        }
    }
}
