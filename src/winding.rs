//! Convex polygon algebra.
//!
//! Every stage cuts world geometry with planes through this type, so
//! its numeric behavior decides whether the stages agree with each
//! other: ties within epsilon land on both sides of a clip, midpoints
//! against axial planes snap exactly to the plane distance, and any
//! three near-collinear points collapse to two.

use glam::DVec3;

use crate::math::{major_axis, BoundingBox, BOGUS_RANGE, ON_EPSILON};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceSide {
    Front,
    Back,
    On,
    Cross,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Winding {
    pub points: Vec<DVec3>,
}

impl Winding {
    pub fn new(points: impl Into<Vec<DVec3>>) -> Self {
        Self {
            points: points.into(),
        }
    }

    /// A huge quad on the plane. Half-extent is [`BOGUS_RANGE`] so that
    /// clipping against any in-range geometry produces finite vertices.
    pub fn from_plane(normal: DVec3, dist: f64) -> Self {
        Self::from_plane_sized(normal, dist, BOGUS_RANGE)
    }

    pub fn from_plane_sized(normal: DVec3, dist: f64, half_extent: f64) -> Self {
        let axis = major_axis(normal);

        let mut up = DVec3::ZERO;
        match axis {
            0 | 1 => up.z = 1.0,
            _ => up.x = 1.0,
        }

        up = (up - normal * up.dot(normal)).normalize();
        let org = normal * dist;
        let right = up.cross(normal);

        let up = up * half_extent;
        let right = right * half_extent;

        Self {
            points: vec![
                org - right + up,
                org + right + up,
                org + right - up,
                org - right - up,
            ],
        }
    }

    pub fn size(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.size() >= 3
    }

    /// Normal and distance from the first three points, counter
    /// clockwise orientation.
    pub fn plane(&self) -> (DVec3, f64) {
        if self.size() < 3 {
            return (DVec3::ZERO, 0.0);
        }

        let normal = (self.points[0] - self.points[1])
            .cross(self.points[2] - self.points[1])
            .normalize();
        (normal, self.points[0].dot(normal))
    }

    pub fn area(&self) -> f64 {
        if self.size() < 3 {
            return 0.0;
        }

        let mut total = 0.0;
        for i in 2..self.size() {
            let cross = (self.points[i - 1] - self.points[0])
                .cross(self.points[i] - self.points[0]);
            total += 0.5 * cross.length();
        }
        total
    }

    pub fn bounds(&self) -> BoundingBox {
        let mut bounds = BoundingBox::empty();
        for &p in &self.points {
            bounds.add_point(p);
        }
        bounds
    }

    pub fn center(&self) -> DVec3 {
        let mut center = DVec3::ZERO;
        for &p in &self.points {
            center += p;
        }
        center / self.size().max(1) as f64
    }

    pub fn flip(&mut self) {
        self.points.reverse();
    }

    /// Removes the middle of any three points forming a triangle
    /// thinner than epsilon.
    pub fn remove_collinear(&mut self, epsilon: f64) {
        let mut i = 0usize;
        while i < self.size() && self.size() >= 3 {
            let n = self.size();
            let p1 = self.points[(i + n - 1) % n];
            let p2 = self.points[i];
            let p3 = self.points[(i + 1) % n];
            let v1 = p2 - p1;
            let v2 = p3 - p2;

            // v2 == k * v1 + v3 with |v3| < epsilon
            let d = v1.dot(v2);
            if d * d
                >= v1.dot(v1) * v2.dot(v2)
                    - epsilon * epsilon * (v1.dot(v1) + v2.dot(v2) + epsilon * epsilon)
            {
                self.points.remove(i);
                i = i.saturating_sub(1);
            } else {
                i += 1;
            }
        }
    }

    pub fn side_of(&self, normal: DVec3, dist: f64, epsilon: f64) -> FaceSide {
        let mut front = false;
        let mut back = false;

        for &p in &self.points {
            let d = p.dot(normal) - dist;
            if d < -epsilon {
                if front {
                    return FaceSide::Cross;
                }
                back = true;
            } else if d > epsilon {
                if back {
                    return FaceSide::Cross;
                }
                front = true;
            }
        }

        if back {
            FaceSide::Back
        } else if front {
            FaceSide::Front
        } else {
            FaceSide::On
        }
    }

    /// Partitions exactly: points within epsilon of the plane land on
    /// both sides. `None` marks a vanished side.
    pub fn clip(&self, normal: DVec3, dist: f64, epsilon: f64) -> (Option<Winding>, Option<Winding>) {
        let n = self.size();
        let mut dists = Vec::with_capacity(n + 1);
        let mut sides = Vec::with_capacity(n + 1);
        let mut counts = [0usize; 3];

        for &p in &self.points {
            let d = p.dot(normal) - dist;
            let side = if d > epsilon {
                0 // front
            } else if d < -epsilon {
                1 // back
            } else {
                2 // on
            };
            dists.push(d);
            sides.push(side);
            counts[side] += 1;
        }
        dists.push(dists[0]);
        sides.push(sides[0]);

        if counts[0] == 0 {
            return (None, Some(self.clone()));
        }
        if counts[1] == 0 {
            return (Some(self.clone()), None);
        }

        let mut front = Winding::default();
        let mut back = Winding::default();
        front.points.reserve(n + 4);
        back.points.reserve(n + 4);

        for i in 0..n {
            let p1 = self.points[i];

            if sides[i] == 2 {
                front.points.push(p1);
                back.points.push(p1);
                continue;
            }
            if sides[i] == 0 {
                front.points.push(p1);
            } else {
                back.points.push(p1);
            }

            if sides[i + 1] == 2 || sides[i + 1] == sides[i] {
                continue;
            }

            // generate a split point
            let p2 = self.points[(i + 1) % n];
            let dot = dists[i] / (dists[i] - dists[i + 1]);

            let mut mid = DVec3::ZERO;
            for j in 0..3 {
                // avoid round off error when possible
                if normal[j] == 1.0 {
                    mid[j] = dist;
                } else if normal[j] == -1.0 {
                    mid[j] = -dist;
                } else {
                    mid[j] = p1[j] + dot * (p2[j] - p1[j]);
                }
            }

            front.points.push(mid);
            back.points.push(mid);
        }

        front.remove_collinear(epsilon);
        back.remove_collinear(epsilon);

        (
            front.is_valid().then_some(front),
            back.is_valid().then_some(back),
        )
    }

    /// Keeps the front side in place; false when nothing is left.
    pub fn chop_in_place(&mut self, normal: DVec3, dist: f64, epsilon: f64) -> bool {
        let (front, _) = self.clip(normal, dist, epsilon);
        match front {
            Some(front) => {
                *self = front;
                true
            }
            None => {
                self.points.clear();
                false
            }
        }
    }

    /// Internal consistency: coplanar within epsilon, inside
    /// [`BOGUS_RANGE`], convex, no degenerate edges. Violations are
    /// compiler bugs, not map problems.
    pub fn check(&self, epsilon: f64) {
        assert!(
            self.size() >= 3,
            "internal error: winding with {} points (please file an issue)",
            self.size()
        );

        let area = self.area();
        assert!(
            area >= 1.0,
            "internal error: winding with area {area} (please file an issue)"
        );

        let (normal, dist) = self.plane();

        for i in 0..self.size() {
            let p1 = self.points[i];

            for e in [p1.x, p1.y, p1.z] {
                assert!(
                    (-BOGUS_RANGE..=BOGUS_RANGE).contains(&e),
                    "internal error: winding point at {e} outside world range (please file an issue)"
                );
            }

            let d = p1.dot(normal) - dist;
            assert!(
                (-epsilon..=epsilon).contains(&d),
                "internal error: winding point off its plane by {d} (please file an issue)"
            );

            // the edge must not be degenerate and all other points must
            // stay behind its inward normal
            let p2 = self.points[(i + 1) % self.size()];
            let dir = p2 - p1;
            assert!(
                dir.length() >= epsilon,
                "internal error: degenerate winding edge (please file an issue)"
            );

            let edge_normal = normal.cross(dir).normalize();
            let edge_dist = p1.dot(edge_normal) + epsilon;

            for (j, &p) in self.points.iter().enumerate() {
                if j == i {
                    continue;
                }
                assert!(
                    p.dot(edge_normal) <= edge_dist,
                    "internal error: non-convex winding (please file an issue)"
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn square(half: f64) -> Winding {
        Winding::new(vec![
            DVec3::new(-half, -half, 0.0),
            DVec3::new(-half, half, 0.0),
            DVec3::new(half, half, 0.0),
            DVec3::new(half, -half, 0.0),
        ])
    }

    #[test]
    fn plane_of_square() {
        let w = square(16.0);
        let (normal, dist) = w.plane();
        assert!((normal - DVec3::Z).length() < 1e-9);
        assert!(dist.abs() < 1e-9);
    }

    #[test]
    fn from_plane_lies_on_plane() {
        for (normal, dist) in [
            (DVec3::Z, 5.0),
            (DVec3::X, -12.0),
            (DVec3::new(1.0, 2.0, 3.0).normalize(), 77.0),
        ] {
            let w = Winding::from_plane(normal, dist);
            assert_eq!(w.size(), 4);
            for &p in &w.points {
                assert!((p.dot(normal) - dist).abs() < 1e-6);
            }
            let (n2, d2) = w.plane();
            assert!((n2 - normal).length() < 1e-6);
            assert!((d2 - dist).abs() < 1e-5);
        }
    }

    #[test]
    fn clip_partitions_area() {
        let w = square(16.0);
        let (front, back) = w.clip(DVec3::X, 0.0, ON_EPSILON);
        let front = front.unwrap();
        let back = back.unwrap();

        assert!((front.area() + back.area() - w.area()).abs() < 1e-6);
        assert!((front.area() - back.area()).abs() < 1e-6);
    }

    #[test]
    fn clip_all_front() {
        let w = square(16.0);
        let (front, back) = w.clip(DVec3::X, -32.0, ON_EPSILON);
        assert!(back.is_none());
        assert_eq!(front.unwrap(), w);
    }

    #[test]
    fn chop_matches_clip_front() {
        let w = square(16.0);
        let (front, _) = w.clip(DVec3::new(1.0, 1.0, 0.0).normalize(), 4.0, ON_EPSILON);

        let mut chopped = w.clone();
        assert!(chopped.chop_in_place(DVec3::new(1.0, 1.0, 0.0).normalize(), 4.0, ON_EPSILON));
        assert_eq!(Some(chopped), front);
    }

    #[test]
    fn chop_to_nothing() {
        let mut w = square(16.0);
        assert!(!w.chop_in_place(DVec3::X, 32.0, ON_EPSILON));
        assert!(w.is_empty());
    }

    #[test]
    fn axial_midpoints_snap() {
        let w = square(16.0);
        let (front, _) = w.clip(DVec3::X, 7.0, ON_EPSILON);
        // every generated midpoint lies exactly on x = 7
        for p in front.unwrap().points {
            if p.x.abs() != 16.0 {
                assert_eq!(p.x, 7.0);
            }
        }
    }

    #[test]
    fn side_of_reports_cross() {
        let w = square(16.0);
        assert_eq!(w.side_of(DVec3::X, 0.0, ON_EPSILON), FaceSide::Cross);
        assert_eq!(w.side_of(DVec3::X, -32.0, ON_EPSILON), FaceSide::Front);
        assert_eq!(w.side_of(DVec3::X, 32.0, ON_EPSILON), FaceSide::Back);
        assert_eq!(w.side_of(DVec3::Z, 0.0, ON_EPSILON), FaceSide::On);
    }

    #[test]
    fn collinear_point_removed() {
        let mut w = square(16.0);
        w.points.insert(1, DVec3::new(-16.0, 0.0, 0.0));
        assert_eq!(w.size(), 5);
        w.remove_collinear(ON_EPSILON);
        assert_eq!(w.size(), 4);
    }

    #[test]
    fn check_passes_for_sane_winding() {
        square(16.0).check(ON_EPSILON);
        Winding::from_plane(DVec3::new(3.0, -2.0, 0.5).normalize(), 123.0).check(ON_EPSILON);
    }

    #[test]
    #[should_panic]
    fn check_rejects_non_convex() {
        let w = Winding::new(vec![
            DVec3::new(-16.0, -16.0, 0.0),
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(-16.0, 16.0, 0.0),
            DVec3::new(16.0, 16.0, 0.0),
            DVec3::new(16.0, -16.0, 0.0),
        ]);
        w.check(ON_EPSILON);
    }

    #[test]
    fn from_plane_small_bound() {
        // the engine-safe bound must behave the same as the large one
        let w = Winding::from_plane_sized(DVec3::Z, 8.0, 32768.0);
        w.check(ON_EPSILON);
        let (n, d) = w.plane();
        assert!((n - DVec3::Z).length() < 1e-9);
        assert!((d - 8.0).abs() < 1e-6);
    }
}
