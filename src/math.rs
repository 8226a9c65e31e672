//! Shared numeric policy and small geometric helpers.
//!
//! All geometry runs in f64; values drop to f32 only at the BSP
//! container boundary.

use glam::{DVec3, Vec3};

/// Point-on-plane tolerance used everywhere a winding meets a plane.
pub const ON_EPSILON: f64 = 0.04;

/// Tolerance for comparing unit normals component-wise.
pub const NORMAL_EPSILON: f64 = 1e-5;

/// Tolerance for comparing world positions.
pub const EQUAL_EPSILON: f64 = 0.004;

/// Half-extent of the quad a plane is seeded with. Everything the
/// compilers touch must stay inside this range; the engine itself only
/// promises 32768, which the winding tests exercise as well.
pub const BOGUS_RANGE: f64 = 80000.0;

/// Largest coordinate a map vertex may have.
pub const MAX_COORD: f64 = 32768.0;

pub fn to_f32(v: DVec3) -> Vec3 {
    Vec3::new(v.x as f32, v.y as f32, v.z as f32)
}

pub fn to_f64(v: Vec3) -> DVec3 {
    DVec3::new(v.x as f64, v.y as f64, v.z as f64)
}

/// Index of the largest-magnitude component.
pub fn major_axis(v: DVec3) -> usize {
    let a = v.abs();
    if a.x >= a.y && a.x >= a.z {
        0
    } else if a.y >= a.z {
        1
    } else {
        2
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub mins: DVec3,
    pub maxs: DVec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    pub fn empty() -> Self {
        Self {
            mins: DVec3::splat(BOGUS_RANGE),
            maxs: DVec3::splat(-BOGUS_RANGE),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mins.x > self.maxs.x
    }

    pub fn add_point(&mut self, p: DVec3) {
        self.mins = self.mins.min(p);
        self.maxs = self.maxs.max(p);
    }

    pub fn union(&mut self, other: &BoundingBox) {
        self.mins = self.mins.min(other.mins);
        self.maxs = self.maxs.max(other.maxs);
    }

    pub fn expand(&self, by: f64) -> Self {
        Self {
            mins: self.mins - DVec3::splat(by),
            maxs: self.maxs + DVec3::splat(by),
        }
    }

    pub fn center(&self) -> DVec3 {
        (self.mins + self.maxs) * 0.5
    }

    pub fn contains(&self, p: DVec3) -> bool {
        (0..3).all(|a| p[a] >= self.mins[a] - ON_EPSILON && p[a] <= self.maxs[a] + ON_EPSILON)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        (0..3).all(|a| self.mins[a] <= other.maxs[a] && self.maxs[a] >= other.mins[a])
    }
}

/// Snaps components sitting within [`NORMAL_EPSILON`] of -1, 0 or 1 and
/// renormalizes. Keeps near-axial planes exactly axial so they dedup.
pub fn snap_normal(normal: DVec3) -> DVec3 {
    let mut snapped = normal;

    for a in 0..3 {
        if (snapped[a] - 1.0).abs() < NORMAL_EPSILON {
            snapped = DVec3::ZERO;
            snapped[a] = 1.0;
            return snapped;
        }
        if (snapped[a] + 1.0).abs() < NORMAL_EPSILON {
            snapped = DVec3::ZERO;
            snapped[a] = -1.0;
            return snapped;
        }
        if snapped[a].abs() < NORMAL_EPSILON {
            snapped[a] = 0.0;
        }
    }

    snapped.normalize()
}

/// Snaps a plane distance to the nearest integer when it is within
/// [`EQUAL_EPSILON`], stopping slow drift across repeated clips.
pub fn snap_dist(dist: f64) -> f64 {
    let rounded = dist.round();
    if (dist - rounded).abs() < EQUAL_EPSILON {
        rounded
    } else {
        dist
    }
}

pub fn points_equal(a: DVec3, b: DVec3, epsilon: f64) -> bool {
    (a - b).abs().max_element() < epsilon
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn snap_normal_axial() {
        let n = snap_normal(DVec3::new(0.9999999, 1e-7, -1e-7));
        assert_eq!(n, DVec3::X);
    }

    #[test]
    fn snap_normal_keeps_oblique() {
        let n = DVec3::new(1.0, 2.0, 3.0).normalize();
        assert!((snap_normal(n) - n).length() < 1e-12);
    }

    #[test]
    fn bounds_accumulate() {
        let mut b = BoundingBox::empty();
        assert!(b.is_empty());
        b.add_point(DVec3::new(1.0, -2.0, 3.0));
        b.add_point(DVec3::new(-1.0, 2.0, 0.0));
        assert_eq!(b.mins, DVec3::new(-1.0, -2.0, 0.0));
        assert_eq!(b.maxs, DVec3::new(1.0, 2.0, 3.0));
        assert!(b.contains(DVec3::ZERO));
        assert!(!b.contains(DVec3::new(5.0, 0.0, 0.0)));
    }
}
