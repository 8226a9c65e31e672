//! Shadow tests against triangle meshes.
//!
//! Opaque non-world geometry casts shadows through a triangle mesh
//! with a binary AABB tree over it. Segments run the tree and test
//! candidate triangles with Möller-Trumbore; a mesh can carry an alpha
//! mask sampled at the hit's barycentric texture coordinate for
//! cut-out shadows.

use glam::{DVec2, DVec3};

use crate::math::{BoundingBox, EQUAL_EPSILON};

#[derive(Debug, Clone)]
pub struct MeshTriangle {
    pub vertices: [DVec3; 3],
    /// Texture coordinates for the alpha test, if any.
    pub uvs: [DVec2; 3],
}

/// Per-texel opacity mask.
#[derive(Debug, Clone)]
pub struct AlphaMask {
    pub width: usize,
    pub height: usize,
    pub opaque: Vec<bool>,
}

impl AlphaMask {
    fn sample(&self, uv: DVec2) -> bool {
        let x = ((uv.x.rem_euclid(1.0)) * self.width as f64) as usize % self.width;
        let y = ((uv.y.rem_euclid(1.0)) * self.height as f64) as usize % self.height;
        self.opaque[y * self.width + x]
    }
}

#[derive(Debug)]
enum MeshNode {
    Branch {
        bounds: BoundingBox,
        children: [usize; 2],
    },
    Fan {
        bounds: BoundingBox,
        triangles: Vec<usize>,
    },
}

#[derive(Debug)]
pub struct ShadowMesh {
    triangles: Vec<MeshTriangle>,
    nodes: Vec<MeshNode>,
    root: usize,
    pub alpha: Option<AlphaMask>,
}

const LEAF_TRIANGLES: usize = 8;

impl ShadowMesh {
    pub fn new(triangles: Vec<MeshTriangle>, alpha: Option<AlphaMask>) -> Self {
        let mut mesh = Self {
            triangles,
            nodes: Vec::new(),
            root: 0,
            alpha,
        };
        let all: Vec<usize> = (0..mesh.triangles.len()).collect();
        mesh.root = mesh.build(all);
        mesh
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    fn triangle_bounds(&self, indices: &[usize]) -> BoundingBox {
        let mut bounds = BoundingBox::empty();
        for &t in indices {
            for &v in &self.triangles[t].vertices {
                bounds.add_point(v);
            }
        }
        bounds
    }

    fn build(&mut self, indices: Vec<usize>) -> usize {
        let bounds = self.triangle_bounds(&indices);

        if indices.len() <= LEAF_TRIANGLES {
            self.nodes.push(MeshNode::Fan {
                bounds,
                triangles: indices,
            });
            return self.nodes.len() - 1;
        }

        // split along the widest axis at the median centroid
        let size = bounds.maxs - bounds.mins;
        let axis = crate::math::major_axis(size);

        let mut sorted = indices;
        sorted.sort_by(|&a, &b| {
            let ca = self.triangles[a].vertices.iter().map(|v| v[axis]).sum::<f64>();
            let cb = self.triangles[b].vertices.iter().map(|v| v[axis]).sum::<f64>();
            ca.total_cmp(&cb)
        });

        let half = sorted.len() / 2;
        let right = sorted.split_off(half);

        let left_child = self.build(sorted);
        let right_child = self.build(right);

        self.nodes.push(MeshNode::Branch {
            bounds,
            children: [left_child, right_child],
        });
        self.nodes.len() - 1
    }

    /// True when the segment hits an opaque triangle.
    pub fn blocks(&self, start: DVec3, stop: DVec3) -> bool {
        self.blocks_node(self.root, start, stop)
    }

    fn blocks_node(&self, node: usize, start: DVec3, stop: DVec3) -> bool {
        match &self.nodes[node] {
            MeshNode::Branch { bounds, children } => {
                segment_hits_bounds(start, stop, bounds)
                    && (self.blocks_node(children[0], start, stop)
                        || self.blocks_node(children[1], start, stop))
            }
            MeshNode::Fan { bounds, triangles } => {
                segment_hits_bounds(start, stop, bounds)
                    && triangles.iter().any(|&t| self.triangle_blocks(t, start, stop))
            }
        }
    }

    fn triangle_blocks(&self, index: usize, start: DVec3, stop: DVec3) -> bool {
        let triangle = &self.triangles[index];
        let Some((t, u, v)) = moller_trumbore(start, stop - start, &triangle.vertices) else {
            return false;
        };
        if !(EQUAL_EPSILON..=1.0 - EQUAL_EPSILON).contains(&t) {
            return false;
        }

        match &self.alpha {
            None => true,
            Some(mask) => {
                let uv = triangle.uvs[0] * (1.0 - u - v) + triangle.uvs[1] * u + triangle.uvs[2] * v;
                mask.sample(uv)
            }
        }
    }
}

/// Ray/triangle intersection; returns (t, u, v) with t the fraction
/// along `dir` and (u, v) the barycentric weights of vertices 1 and 2.
fn moller_trumbore(origin: DVec3, dir: DVec3, vertices: &[DVec3; 3]) -> Option<(f64, f64, f64)> {
    let edge1 = vertices[1] - vertices[0];
    let edge2 = vertices[2] - vertices[0];

    let p = dir.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;

    let s = origin - vertices[0];
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    Some((edge2.dot(q) * inv_det, u, v))
}

/// Slab test for a segment against an AABB.
fn segment_hits_bounds(start: DVec3, stop: DVec3, bounds: &BoundingBox) -> bool {
    let dir = stop - start;
    let mut t_min: f64 = 0.0;
    let mut t_max: f64 = 1.0;

    for axis in 0..3 {
        if dir[axis].abs() < 1e-12 {
            if start[axis] < bounds.mins[axis] || start[axis] > bounds.maxs[axis] {
                return false;
            }
            continue;
        }
        let inv = 1.0 / dir[axis];
        let mut t0 = (bounds.mins[axis] - start[axis]) * inv;
        let mut t1 = (bounds.maxs[axis] - start[axis]) * inv;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        t_min = t_min.max(t0);
        t_max = t_max.min(t1);
        if t_min > t_max {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod test {
    use super::*;

    fn quad_mesh(z: f64, half: f64) -> Vec<MeshTriangle> {
        let corners = [
            DVec3::new(-half, -half, z),
            DVec3::new(half, -half, z),
            DVec3::new(half, half, z),
            DVec3::new(-half, half, z),
        ];
        let uvs = [
            DVec2::new(0.0, 0.0),
            DVec2::new(1.0, 0.0),
            DVec2::new(1.0, 1.0),
            DVec2::new(0.0, 1.0),
        ];
        vec![
            MeshTriangle {
                vertices: [corners[0], corners[1], corners[2]],
                uvs: [uvs[0], uvs[1], uvs[2]],
            },
            MeshTriangle {
                vertices: [corners[0], corners[2], corners[3]],
                uvs: [uvs[0], uvs[2], uvs[3]],
            },
        ]
    }

    #[test]
    fn quad_blocks_crossing_segment() {
        let mesh = ShadowMesh::new(quad_mesh(0.0, 64.0), None);
        assert!(mesh.blocks(DVec3::new(0.0, 0.0, 32.0), DVec3::new(0.0, 0.0, -32.0)));
        assert!(mesh.blocks(DVec3::new(50.0, -50.0, 16.0), DVec3::new(50.0, -50.0, -1.0)));
    }

    #[test]
    fn misses_pass_through() {
        let mesh = ShadowMesh::new(quad_mesh(0.0, 64.0), None);
        // parallel above the quad
        assert!(!mesh.blocks(DVec3::new(0.0, 0.0, 32.0), DVec3::new(100.0, 0.0, 32.0)));
        // beyond the quad's extent
        assert!(!mesh.blocks(DVec3::new(100.0, 0.0, 32.0), DVec3::new(100.0, 0.0, -32.0)));
        // segment ends before the plane
        assert!(!mesh.blocks(DVec3::new(0.0, 0.0, 32.0), DVec3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn alpha_mask_lets_light_through_holes() {
        // left half transparent, right half opaque
        let mask = AlphaMask {
            width: 2,
            height: 1,
            opaque: vec![false, true],
        };
        let mesh = ShadowMesh::new(quad_mesh(0.0, 64.0), Some(mask));

        // u < 0.5 on the transparent half: x in -64..0
        assert!(!mesh.blocks(DVec3::new(-32.0, 0.0, 32.0), DVec3::new(-32.0, 0.0, -32.0)));
        assert!(mesh.blocks(DVec3::new(32.0, 0.0, 32.0), DVec3::new(32.0, 0.0, -32.0)));
    }

    #[test]
    fn big_mesh_builds_a_deep_tree() {
        // a grid of small quads
        let mut triangles = Vec::new();
        for gx in 0..16 {
            for gy in 0..16 {
                let offset = DVec3::new(gx as f64 * 16.0, gy as f64 * 16.0, 0.0);
                for mut t in quad_mesh(0.0, 8.0) {
                    for v in t.vertices.iter_mut() {
                        *v += offset;
                    }
                    triangles.push(t);
                }
            }
        }

        let mesh = ShadowMesh::new(triangles, None);
        assert_eq!(mesh.triangle_count(), 512);
        assert!(mesh.blocks(
            DVec3::new(120.0, 120.0, 10.0),
            DVec3::new(120.0, 120.0, -10.0)
        ));
        assert!(!mesh.blocks(
            DVec3::new(-50.0, -50.0, 10.0),
            DVec3::new(-50.0, -50.0, -10.0)
        ));
    }
}
