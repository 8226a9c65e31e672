//! The plane registry.
//!
//! Every plane the pipeline touches is interned exactly once and
//! referenced by index from then on. Planes live in front/back pairs:
//! the even index holds the canonical orientation (axis-positive for
//! axial planes, major-axis-positive otherwise), the odd index its
//! flipped twin, so `back()` is a bit flip and a face records its
//! sidedness as `index & 1`.

use std::collections::HashMap;

use glam::DVec3;

use bsp::PlaneType;

use crate::math::{major_axis, snap_dist, snap_normal, NORMAL_EPSILON, ON_EPSILON};

#[derive(Debug, Clone)]
pub struct MapPlane {
    pub normal: DVec3,
    pub dist: f64,
    pub type_: PlaneType,
}

impl MapPlane {
    fn plane_type(normal: DVec3) -> PlaneType {
        if normal.x == 1.0 || normal.x == -1.0 {
            PlaneType::X
        } else if normal.y == 1.0 || normal.y == -1.0 {
            PlaneType::Y
        } else if normal.z == 1.0 || normal.z == -1.0 {
            PlaneType::Z
        } else {
            match major_axis(normal) {
                0 => PlaneType::AnyX,
                1 => PlaneType::AnyY,
                _ => PlaneType::AnyZ,
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PlaneRegistry {
    planes: Vec<MapPlane>,
    // |dist| bucketed to an integer; equal planes land within one bin
    // of each other, so lookups probe bin-1 ..= bin+1
    hash: HashMap<i64, Vec<usize>>,
}

impl PlaneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn get(&self, index: u16) -> &MapPlane {
        &self.planes[index as usize]
    }

    /// The registered flipped twin.
    pub fn back(&self, index: u16) -> u16 {
        index ^ 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapPlane> {
        self.planes.iter()
    }

    fn bin(dist: f64) -> i64 {
        dist.abs().floor() as i64
    }

    fn matches(plane: &MapPlane, normal: DVec3, dist: f64) -> bool {
        (plane.dist - dist).abs() < ON_EPSILON
            && (plane.normal - normal).abs().max_element() < NORMAL_EPSILON
    }

    /// Interns the plane (in its exact orientation) and returns its
    /// index. The flipped twin is registered alongside it.
    pub fn intern(&mut self, normal: DVec3, dist: f64) -> u16 {
        let normal = snap_normal(normal);
        let dist = snap_dist(dist);

        let bin = Self::bin(dist);
        for probe in [bin - 1, bin, bin + 1] {
            let Some(bucket) = self.hash.get(&probe) else {
                continue;
            };
            for &index in bucket {
                let plane = &self.planes[index];
                if Self::matches(plane, normal, dist) {
                    return index as u16;
                }
                if Self::matches(plane, -normal, -dist) {
                    return (index ^ 1) as u16;
                }
            }
        }

        // canonical orientation first: axis- or major-axis-positive
        let canonical = normal[major_axis(normal)] > 0.0;
        let (front_normal, front_dist) = if canonical {
            (normal, dist)
        } else {
            (-normal, -dist)
        };

        let type_ = MapPlane::plane_type(front_normal);
        let front_index = self.planes.len();

        self.planes.push(MapPlane {
            normal: front_normal,
            dist: front_dist,
            type_,
        });
        self.planes.push(MapPlane {
            normal: -front_normal,
            dist: -front_dist,
            type_,
        });

        // only the canonical entry goes in the hash; lookups check both
        // orientations against it
        self.hash
            .entry(Self::bin(front_dist))
            .or_default()
            .push(front_index);

        if canonical {
            front_index as u16
        } else {
            (front_index + 1) as u16
        }
    }

    /// Plane from three points, as written in a .map brush side.
    pub fn intern_from_points(&mut self, p1: DVec3, p2: DVec3, p3: DVec3) -> Option<u16> {
        let normal = (p1 - p2).cross(p3 - p2);
        if normal.length_squared() < NORMAL_EPSILON {
            return None;
        }
        let normal = normal.normalize();
        let dist = p1.dot(normal);
        Some(self.intern(normal, dist))
    }

    /// Exports to the on-disk representation.
    pub fn to_bsp_planes(&self) -> Vec<bsp::Plane> {
        self.planes
            .iter()
            .map(|p| bsp::Plane {
                normal: crate::math::to_f32(p.normal),
                distance: p.dist as f32,
                type_: p.type_,
            })
            .collect()
    }
}
