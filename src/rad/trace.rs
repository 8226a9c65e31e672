//! Line-of-sight tests against the hull-0 tree.

use glam::DVec3;

use bsp::{Bsp, Contents};

use crate::math::ON_EPSILON;

/// What a traced segment ran into first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceResult {
    Open(Contents),
    Blocked,
}

/// Walks the segment through the world tree. A solid leaf blocks it; a
/// sky leaf ends it successfully (the sun lives there); liquids pass
/// through and are reported as the most interesting contents crossed.
pub fn test_line(bsp: &Bsp, start: DVec3, stop: DVec3) -> TraceResult {
    let mut best = Contents::Empty;
    match test_line_r(bsp, bsp.models[0].head_nodes[0], start, stop, &mut best) {
        TraceStep::Blocked => TraceResult::Blocked,
        TraceStep::HitSky => TraceResult::Open(Contents::Sky),
        TraceStep::Continue => TraceResult::Open(best),
    }
}

/// True when the segment stays out of solid.
pub fn is_visible(bsp: &Bsp, start: DVec3, stop: DVec3) -> bool {
    matches!(test_line(bsp, start, stop), TraceResult::Open(_))
}

/// Strict light-path test: only pure empty space carries light;
/// liquids and sky occlude like solid does.
pub fn is_unobstructed(bsp: &Bsp, start: DVec3, stop: DVec3) -> bool {
    matches!(test_line(bsp, start, stop), TraceResult::Open(Contents::Empty))
}

fn rank(contents: Contents) -> u8 {
    match contents {
        Contents::Water | Contents::Slime | Contents::Lava => 2,
        Contents::Translucent => 1,
        _ => 0,
    }
}

enum TraceStep {
    Continue,
    HitSky,
    Blocked,
}

fn test_line_r(bsp: &Bsp, node: i32, start: DVec3, stop: DVec3, best: &mut Contents) -> TraceStep {
    if node < 0 {
        let leaf = &bsp.leaves[(-node - 1) as usize];
        return match leaf.contents {
            Contents::Solid => TraceStep::Blocked,
            Contents::Sky => TraceStep::HitSky,
            contents => {
                if rank(contents) > rank(*best) {
                    *best = contents;
                }
                TraceStep::Continue
            }
        };
    }

    let node_data = &bsp.nodes[node as usize];
    let plane = &bsp.planes[node_data.plane as usize];
    let normal = crate::math::to_f64(plane.normal);
    let dist = plane.distance as f64;

    let d1 = start.dot(normal) - dist;
    let d2 = stop.dot(normal) - dist;

    if d1 >= -ON_EPSILON && d2 >= -ON_EPSILON {
        return test_line_r(bsp, node_data.children[0] as i32, start, stop, best);
    }
    if d1 <= ON_EPSILON && d2 <= ON_EPSILON {
        return test_line_r(bsp, node_data.children[1] as i32, start, stop, best);
    }

    // straddles: split at the plane and test both halves in travel order
    let frac = d1 / (d1 - d2);
    let mid = start + (stop - start) * frac;
    let near_side = if d1 < 0.0 { 1 } else { 0 };

    match test_line_r(bsp, node_data.children[near_side] as i32, start, mid, best) {
        TraceStep::Continue => test_line_r(
            bsp,
            node_data.children[1 - near_side] as i32,
            mid,
            stop,
            best,
        ),
        terminal => terminal,
    }
}

/// Nudges a point off any wall it sits on, toward `inward`, until it
/// lands in open space. Returns None when no nearby open spot exists.
pub fn snap_to_open(bsp: &Bsp, point: DVec3, inward: DVec3, max_steps: usize) -> Option<DVec3> {
    let mut at = point;
    for _ in 0..=max_steps {
        let leaf = bsp.leaf_at(crate::math::to_f32(at));
        if bsp.leaves[leaf].contents != Contents::Solid {
            return Some(at);
        }
        at += inward;
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bspbuild::{compile, BspOptions};
    use crate::csg::test_support::{hollow_box, point_entity, worldspawn_with};
    use crate::csg::{compile_map, CsgOptions};

    fn room_with_pillar() -> Bsp {
        let mut map = worldspawn_with(hollow_box(
            DVec3::splat(-256.0),
            DVec3::splat(256.0),
            16.0,
            "stone",
        ));
        // a pillar in the middle
        map.entities[0]
            .brushes
            .as_mut()
            .unwrap()
            .push(crate::csg::test_support::cube_brush(DVec3::ZERO, 32.0, "stone"));
        map.entities
            .push(point_entity("info_player_start", DVec3::new(-200.0, 0.0, 0.0), &[]));

        let out = compile_map(&map, &CsgOptions::default()).unwrap();
        let mut bsp = out.bsp;
        compile(&mut bsp, &out.hull_faces, &BspOptions::default(), None).unwrap();
        bsp
    }

    #[test]
    fn open_line_is_open() {
        let bsp = room_with_pillar();
        assert!(is_visible(
            &bsp,
            DVec3::new(-200.0, 0.0, 0.0),
            DVec3::new(-200.0, 0.0, 100.0)
        ));
    }

    #[test]
    fn pillar_blocks_line() {
        let bsp = room_with_pillar();
        assert!(!is_visible(
            &bsp,
            DVec3::new(-200.0, 0.0, 0.0),
            DVec3::new(200.0, 0.0, 0.0)
        ));
    }

    #[test]
    fn line_around_pillar_is_open() {
        let bsp = room_with_pillar();
        assert!(is_visible(
            &bsp,
            DVec3::new(-200.0, 0.0, 0.0),
            DVec3::new(-200.0, 200.0, 0.0)
        ));
    }

    #[test]
    fn snap_escapes_solid() {
        let bsp = room_with_pillar();
        // a point just inside the pillar surface escapes outward
        let snapped = snap_to_open(&bsp, DVec3::new(-31.0, 0.0, 0.0), -DVec3::X, 8).unwrap();
        let leaf = bsp.leaf_at(crate::math::to_f32(snapped));
        assert_ne!(bsp.leaves[leaf].contents, Contents::Solid);
    }
}
