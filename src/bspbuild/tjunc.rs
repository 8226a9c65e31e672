//! T-junction fixup.
//!
//! A vertex of one face sitting on the interior of a neighbor's edge
//! leaves a hairline crack when the renderer rasterizes the two faces
//! separately. The fix inserts that vertex into the neighbor's winding.
//! Candidate vertices are found through an edge hash (direction +
//! origin), and insertions happen in sorted parameter order so the
//! output is deterministic and lightmap seams stay put.

use std::collections::HashMap;

use glam::DVec3;

use crate::{math::EQUAL_EPSILON, winding::Winding};

/// Quantized vertex key for welding.
fn vertex_key(p: DVec3) -> [i64; 3] {
    [
        (p.x * 100.0).round() as i64,
        (p.y * 100.0).round() as i64,
        (p.z * 100.0).round() as i64,
    ]
}

/// Canonical key for the infinite line through an edge: a direction
/// (flipped to a canonical sign) plus the line's origin projected to
/// the point closest to world origin, both quantized.
fn line_key(start: DVec3, dir: DVec3) -> ([i64; 3], [i64; 3]) {
    let mut dir = dir.normalize();

    // canonical sign: first nonzero component positive
    for a in 0..3 {
        if dir[a].abs() > EQUAL_EPSILON {
            if dir[a] < 0.0 {
                dir = -dir;
            }
            break;
        }
    }

    let origin = start - dir * start.dot(dir);

    (
        [
            (dir.x * 10000.0).round() as i64,
            (dir.y * 10000.0).round() as i64,
            (dir.z * 10000.0).round() as i64,
        ],
        vertex_key(origin),
    )
}

/// Inserts the vertices of neighboring faces into `faces`' edges where
/// they split an edge interior. Returns how many points were added.
pub fn fix_tjunctions(windings: &mut [Winding]) -> usize {
    // collect all vertices, bucketed by the edge lines they lie on;
    // near-duplicates collapse inside each bucket
    let mut lines: HashMap<([i64; 3], [i64; 3]), Vec<DVec3>> = HashMap::new();

    for winding in windings.iter() {
        let n = winding.size();
        for i in 0..n {
            let p = winding.points[i];

            // register the vertex on the lines of both incident edges
            for other in [winding.points[(i + 1) % n], winding.points[(i + n - 1) % n]] {
                let dir = other - p;
                if dir.length() < EQUAL_EPSILON {
                    continue;
                }
                let bucket = lines.entry(line_key(p, dir)).or_default();
                if !bucket.iter().any(|&q| vertex_key(q) == vertex_key(p)) {
                    bucket.push(p);
                }
            }
        }
    }

    let mut added = 0usize;

    for winding in windings.iter_mut() {
        let mut i = 0;
        while i < winding.size() {
            let n = winding.size();
            let v1 = winding.points[i];
            let v2 = winding.points[(i + 1) % n];
            let edge = v2 - v1;
            let len = edge.length();
            if len < EQUAL_EPSILON {
                i += 1;
                continue;
            }
            let dir = edge / len;

            let Some(candidates) = lines.get(&line_key(v1, dir)) else {
                i += 1;
                continue;
            };

            // interior candidates sorted along the edge
            let mut interior: Vec<(f64, DVec3)> = candidates
                .iter()
                .filter_map(|&p| {
                    let t = (p - v1).dot(dir);
                    if t <= EQUAL_EPSILON || t >= len - EQUAL_EPSILON {
                        return None;
                    }
                    // must lie on the edge, not just the line
                    let off = (p - v1) - dir * t;
                    if off.length() > EQUAL_EPSILON {
                        return None;
                    }
                    Some((t, p))
                })
                .collect();
            interior.sort_by(|a, b| a.0.total_cmp(&b.0));
            interior.dedup_by(|a, b| (a.0 - b.0).abs() < EQUAL_EPSILON);

            for (offset, (_, p)) in interior.into_iter().enumerate() {
                winding.points.insert(i + 1 + offset, p);
                added += 1;
            }

            i += 1;
        }
    }

    added
}
