use glam::Vec3;
use wad::types::MipTex;

use nom::IResult as _IResult;

use crate::constants::{MAX_MAP_HULLS, NUM_AMBIENTS};

pub type IResult<'a, T> = _IResult<&'a [u8], T>;

#[derive(Debug, Clone, Copy)]
pub struct LumpHeader {
    pub offset: i32,
    pub length: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PlaneType {
    X = 0,
    Y = 1,
    Z = 2,
    AnyX = 3,
    AnyY = 4,
    AnyZ = 5,
}

impl PlaneType {
    /// Axial when the normal is a coordinate axis; otherwise by the
    /// largest-magnitude normal component.
    pub fn from_normal(normal: Vec3) -> Self {
        const EPSILON: f32 = 1e-5;

        if (normal.x.abs() - 1.0).abs() < EPSILON {
            return Self::X;
        }
        if (normal.y.abs() - 1.0).abs() < EPSILON {
            return Self::Y;
        }
        if (normal.z.abs() - 1.0).abs() < EPSILON {
            return Self::Z;
        }

        let (ax, ay, az) = (normal.x.abs(), normal.y.abs(), normal.z.abs());
        if ax >= ay && ax >= az {
            Self::AnyX
        } else if ay >= az {
            Self::AnyY
        } else {
            Self::AnyZ
        }
    }

    pub fn is_axial(&self) -> bool {
        matches!(self, Self::X | Self::Y | Self::Z)
    }
}

impl TryFrom<i32> for PlaneType {
    type Error = &'static str;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::X,
            1 => Self::Y,
            2 => Self::Z,
            3 => Self::AnyX,
            4 => Self::AnyY,
            5 => Self::AnyZ,
            _ => return Err("Not a valid plane type"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
    pub type_: PlaneType,
}

impl Plane {
    pub fn flip(&self) -> Self {
        Self {
            normal: -self.normal,
            distance: -self.distance,
            type_: self.type_,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Contents {
    Empty = -1,
    Solid = -2,
    Water = -3,
    Slime = -4,
    Lava = -5,
    Sky = -6,
    Origin = -7,
    Clip = -8,
    Current0 = -9,
    Current90 = -10,
    Current180 = -11,
    Current270 = -12,
    CurrentUp = -13,
    CurrentDown = -14,
    Translucent = -15,
}

impl Contents {
    pub fn is_current(&self) -> bool {
        (Self::CurrentDown as i32..=Self::Current0 as i32).contains(&(*self as i32))
    }

    /// Anything a point inside it is swimming in.
    pub fn is_liquid(&self) -> bool {
        matches!(self, Self::Water | Self::Slime | Self::Lava) || self.is_current()
    }
}

impl TryFrom<i32> for Contents {
    type Error = &'static str;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            -1 => Self::Empty,
            -2 => Self::Solid,
            -3 => Self::Water,
            -4 => Self::Slime,
            -5 => Self::Lava,
            -6 => Self::Sky,
            -7 => Self::Origin,
            -8 => Self::Clip,
            -9 => Self::Current0,
            -10 => Self::Current90,
            -11 => Self::Current180,
            -12 => Self::Current270,
            -13 => Self::CurrentUp,
            -14 => Self::CurrentDown,
            -15 => Self::Translucent,
            _ => return Err("Not a valid contents value"),
        })
    }
}

pub type Texture = MipTex;
pub type Vertex = Vec3;

#[derive(Debug, Clone)]
pub struct Node {
    pub plane: u32,
    /// Non-negative: node index. Negative: `-(leaf_index + 1)`.
    pub children: [i16; 2],
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub first_face: u16,
    pub face_count: u16,
}

#[derive(Debug, Clone)]
pub struct TexInfo {
    pub u: Vec3,
    pub u_offset: f32,
    pub v: Vec3,
    pub v_offset: f32,
    pub texture_index: u32,
    pub flags: u32,
}

/// Faces with this texinfo flag take no lightmap (sky, liquids).
pub const TEX_SPECIAL: u32 = 1;

#[derive(Debug, Clone)]
pub struct Face {
    pub plane: u16,
    pub side: u16,
    pub first_edge: i32,
    pub edge_count: u16,
    pub texinfo: u16,
    pub styles: [u8; 4],
    pub lightmap_offset: i32,
}

pub type LightMap = Vec<[u8; 3]>;

#[derive(Debug, Clone)]
pub struct ClipNode {
    pub plane: i32,
    /// Non-negative: clipnode index. Negative: a `Contents` value.
    pub children: [i16; 2],
}

#[derive(Debug, Clone)]
pub struct Leaf {
    pub contents: Contents,
    /// Offset into the compressed visibility lump, -1 for none
    pub vis_offset: i32,
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub first_mark_surface: u16,
    pub mark_surface_count: u16,
    pub ambient_levels: [u8; NUM_AMBIENTS],
}

pub type MarkSurface = u16;
pub type Edge = [u16; 2];
pub type SurfEdge = i32;

#[derive(Debug, Clone)]
pub struct Model {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
    pub head_nodes: [i32; MAX_MAP_HULLS],
    pub vis_leaves_count: i32,
    pub first_face: i32,
    pub face_count: i32,
}

#[derive(Debug, Default)]
pub struct Bsp {
    pub entities: String,
    pub planes: Vec<Plane>,
    pub textures: Vec<Texture>,
    pub vertices: Vec<Vertex>,
    pub visibility: Vec<u8>,
    pub nodes: Vec<Node>,
    pub texinfo: Vec<TexInfo>,
    pub faces: Vec<Face>,
    pub lightmap: LightMap,
    pub clipnodes: Vec<ClipNode>,
    pub leaves: Vec<Leaf>,
    pub mark_surfaces: Vec<MarkSurface>,
    pub edges: Vec<Edge>,
    pub surf_edges: Vec<SurfEdge>,
    pub models: Vec<Model>,
}

impl Bsp {
    /// World-space vertex positions of a face, in winding order.
    pub fn face_vertices(&self, face: &Face) -> Vec<Vec3> {
        (0..face.edge_count as usize)
            .map(|i| {
                let surf_edge = self.surf_edges[face.first_edge as usize + i];
                let v = if surf_edge < 0 {
                    self.edges[(-surf_edge) as usize][1]
                } else {
                    self.edges[surf_edge as usize][0]
                };
                self.vertices[v as usize]
            })
            .collect()
    }

    /// The leaf containing `point` in the hull-0 tree of model 0.
    pub fn leaf_at(&self, point: Vec3) -> usize {
        let mut node_index = self.models[0].head_nodes[0];

        loop {
            if node_index < 0 {
                return (-node_index - 1) as usize;
            }
            let node = &self.nodes[node_index as usize];
            let plane = &self.planes[node.plane as usize];
            let side = if point.dot(plane.normal) - plane.distance >= 0.0 {
                0
            } else {
                1
            };
            node_index = node.children[side] as i32;
        }
    }
}
