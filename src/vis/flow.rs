//! Recursive portal flow.
//!
//! The flow carries a source winding (the portal light enters through)
//! and a pass winding (the portal currently being crossed). For every
//! source/pass edge pair a separating plane is generated, oriented to
//! keep the source behind it and the pass in front; clipping the next
//! pass winding by the stack of separators shrinks it monotonically,
//! which is what makes the recursion terminate and the result tight.

use glam::DVec3;

use crate::{math::ON_EPSILON, winding::Winding};

use super::{VisLeaf, VisPortal};

pub struct FlowParams {
    /// Also clip with the separators of the reversed pair (the
    /// RVIS level-2 pass).
    pub full: bool,
}

struct StackFrame {
    mightsee: Vec<u8>,
    source: Winding,
    pass: Option<Winding>,
    portal_normal: DVec3,
    portal_dist: f64,
}

pub struct FlowContext<'a> {
    pub portals: &'a [VisPortal],
    pub leaves: &'a [VisLeaf],
    pub bit_bytes: usize,
    pub params: FlowParams,
}

/// Computes the final visbits row for one portal from the base-vis
/// rows of all portals.
pub fn portal_flow(ctx: &FlowContext, portal_index: usize) -> Vec<u8> {
    let portal = &ctx.portals[portal_index];
    let mut visbits = vec![0u8; ctx.bit_bytes];

    let first = StackFrame {
        mightsee: portal.mightsee.clone(),
        source: portal.winding.clone(),
        pass: None,
        portal_normal: portal.normal,
        portal_dist: portal.dist,
    };

    recursive_leaf_flow(ctx, portal.to_leaf, &first, &mut visbits);
    visbits
}

fn set_bit(bits: &mut [u8], index: usize) -> bool {
    let mask = 1u8 << (index & 7);
    let fresh = bits[index >> 3] & mask == 0;
    bits[index >> 3] |= mask;
    fresh
}

fn get_bit(bits: &[u8], index: usize) -> bool {
    bits[index >> 3] & (1 << (index & 7)) != 0
}

fn recursive_leaf_flow(
    ctx: &FlowContext,
    leaf_index: usize,
    prev: &StackFrame,
    visbits: &mut Vec<u8>,
) {
    set_bit(visbits, leaf_index);

    // separators of this frame are shared by every portal we try from
    // here; they are computed lazily then reused (pushed for the
    // duration of the frame, popped by returning)
    let mut separators: Option<Vec<(DVec3, f64)>> = None;
    let mut reverse_separators: Option<Vec<(DVec3, f64)>> = None;

    for &portal_id in &ctx.leaves[leaf_index].portals {
        let portal = &ctx.portals[portal_id];

        if !get_bit(&prev.mightsee, portal.to_leaf) {
            continue;
        }

        // tighten: what this path might see from here on
        let mut mightsee = vec![0u8; ctx.bit_bytes];
        let mut more = false;
        for i in 0..ctx.bit_bytes {
            mightsee[i] = prev.mightsee[i] & portal.mightsee[i];
            more |= mightsee[i] & !visbits[i] != 0;
        }
        if !more {
            // can't see anything new through here
            continue;
        }

        // cannot exit back through the plane we came in on
        if (prev.portal_normal + portal.normal).length() < 1e-6 {
            continue;
        }

        // the pass winding starts as the portal clipped to the front
        // of the previous portal plane
        let (pass, _) =
            portal
                .winding
                .clip(prev.portal_normal, prev.portal_dist, ON_EPSILON);
        let Some(mut pass) = pass else { continue };

        // the source shrinks to the part behind the new portal plane
        let (_, source_back) = prev.source.clip(portal.normal, portal.dist, ON_EPSILON);
        let Some(source) = source_back else { continue };

        let frame = |pass: Winding, mightsee: Vec<u8>| StackFrame {
            mightsee,
            source: source.clone(),
            pass: Some(pass),
            portal_normal: portal.normal,
            portal_dist: portal.dist,
        };

        let Some(prev_pass) = &prev.pass else {
            // directly adjacent leaf; no separators yet
            recursive_leaf_flow(ctx, portal.to_leaf, &frame(pass, mightsee), visbits);
            continue;
        };

        // clip by separators between the original source and the
        // previous pass
        let seps = separators
            .get_or_insert_with(|| find_separators(&prev.source, prev_pass, false));
        match clip_to_separators(pass, seps) {
            Some(w) => pass = w,
            None => continue,
        }

        if ctx.params.full {
            let seps = reverse_separators
                .get_or_insert_with(|| find_separators(prev_pass, &prev.source, true));
            match clip_to_separators(pass, seps) {
                Some(w) => pass = w,
                None => continue,
            }
        }

        recursive_leaf_flow(ctx, portal.to_leaf, &frame(pass, mightsee), visbits);
    }
}

/// Separating planes between two windings: for every (source edge,
/// pass vertex) combination that yields a plane with the whole source
/// on the back and the whole pass on the front.
fn find_separators(source: &Winding, pass: &Winding, flip: bool) -> Vec<(DVec3, f64)> {
    let mut separators = Vec::new();
    let n = source.size();

    for i in 0..n {
        let s1 = source.points[i];
        let s2 = source.points[(i + 1) % n];
        let edge = s2 - s1;

        for &p in &pass.points {
            let normal = edge.cross(p - s1);
            let length = normal.length();
            if length < ON_EPSILON {
                continue;
            }
            let mut normal = normal / length;
            let mut dist = p.dot(normal);

            // orient: source on the back, pass on the front
            let mut source_ok = true;
            for &s in &source.points {
                if s.dot(normal) - dist > ON_EPSILON {
                    source_ok = false;
                    break;
                }
            }
            if !source_ok {
                normal = -normal;
                dist = -dist;
                if source
                    .points
                    .iter()
                    .any(|&s| s.dot(normal) - dist > ON_EPSILON)
                {
                    continue;
                }
            }

            let pass_ok = pass
                .points
                .iter()
                .all(|&q| q.dot(normal) - dist > -ON_EPSILON);
            if !pass_ok {
                continue;
            }

            if flip {
                separators.push((-normal, -dist));
            } else {
                separators.push((normal, dist));
            }
        }
    }

    separators
}

fn clip_to_separators(mut winding: Winding, separators: &[(DVec3, f64)]) -> Option<Winding> {
    for &(normal, dist) in separators {
        if !winding.chop_in_place(normal, dist, ON_EPSILON) {
            return None;
        }
    }
    Some(winding)
}

#[cfg(test)]
mod test {
    use super::*;

    fn square(center: DVec3, half: f64, axis: usize) -> Winding {
        let (u, v) = match axis {
            0 => (DVec3::Y, DVec3::Z),
            1 => (DVec3::X, DVec3::Z),
            _ => (DVec3::X, DVec3::Y),
        };
        Winding::new(vec![
            center - u * half - v * half,
            center - u * half + v * half,
            center + u * half + v * half,
            center + u * half - v * half,
        ])
    }

    #[test]
    fn separators_between_offset_windows() {
        // two windows on parallel walls, offset sideways
        let source = square(DVec3::new(0.0, 0.0, 32.0), 16.0, 0);
        let pass = square(DVec3::new(64.0, 48.0, 32.0), 16.0, 0);

        let separators = find_separators(&source, &pass, false);
        assert!(!separators.is_empty());

        for &(normal, dist) in &separators {
            for &s in &source.points {
                assert!(s.dot(normal) - dist <= ON_EPSILON);
            }
            for &p in &pass.points {
                assert!(p.dot(normal) - dist >= -ON_EPSILON);
            }
        }
    }

    #[test]
    fn separators_prune_occluded_target() {
        // a target fully outside the cone spanned by source and pass
        let source = square(DVec3::new(0.0, 0.0, 32.0), 16.0, 0);
        let pass = square(DVec3::new(64.0, 0.0, 32.0), 16.0, 0);
        let separators = find_separators(&source, &pass, false);

        // far above the straight corridor: everything clipped away
        let target = square(DVec3::new(128.0, 0.0, 500.0), 8.0, 0);
        assert!(clip_to_separators(target, &separators).is_none());

        // dead ahead: survives
        let target = square(DVec3::new(128.0, 0.0, 32.0), 8.0, 0);
        assert!(clip_to_separators(target, &separators).is_some());
    }
}
