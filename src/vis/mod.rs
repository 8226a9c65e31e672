//! VIS stage: portal file in, compressed PVS out.
//!
//! Base vis floods each portal's might-see set through front-facing
//! portals; the full flow then tightens it with separator-plane
//! clipping. Leaf rows assemble from portal rows, get the overview and
//! room extensions OR'd in, are forced symmetric, and compress into
//! the visdata lump.

use std::{collections::HashMap, path::Path};

use glam::DVec3;

use bsp::Bsp;

use crate::{
    math::ON_EPSILON,
    threads::run_threads_on,
    winding::Winding,
};

pub mod flow;
pub mod sparse;

use sparse::SparseMatrix;

#[derive(Debug, Clone)]
pub struct VisOptions {
    pub threads: usize,
    /// Extra reverse separator pass (slower, tightest PVS).
    pub full: bool,
    /// Base vis only.
    pub fast: bool,
    /// Cull visibility beyond this distance; 0 disables.
    pub max_distance: f64,
    pub no_fixprt: bool,
    pub estimate: bool,
}

impl Default for VisOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            full: false,
            fast: false,
            max_distance: 0.0,
            no_fixprt: false,
            estimate: false,
        }
    }
}

/// One directed portal.
pub struct VisPortal {
    pub winding: Winding,
    /// Points into the leaf the portal leads to.
    pub normal: DVec3,
    pub dist: f64,
    pub from_leaf: usize,
    pub to_leaf: usize,
    pub mightsee: Vec<u8>,
}

#[derive(Default)]
pub struct VisLeaf {
    pub portals: Vec<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum VisError {
    #[error("Cannot read portal file `{path}`; run hlbsp first (a leaked map writes none)")]
    MissingPortalFile { path: std::path::PathBuf },
    #[error("Malformed portal file at line {line}")]
    BadPortalFile { line: usize },
    #[error("Portal count overflows the engine limit: {count} > {max}")]
    TooManyPortals { count: usize, max: usize },
}

pub const MAX_PORTALS: usize = 32768;

/// Parses a PRT1 portal file into directed portals and per-leaf portal
/// lists.
pub fn parse_portal_file(
    text: &str,
) -> Result<(usize, Vec<VisPortal>, Vec<VisLeaf>), VisError> {
    let mut lines = text.lines().enumerate();
    let bad = |line: usize| VisError::BadPortalFile { line };

    let (_, magic) = lines.next().ok_or(bad(0))?;
    if magic.trim() != "PRT1" {
        return Err(bad(1));
    }

    let parse_count = |entry: Option<(usize, &str)>| -> Result<usize, VisError> {
        let (line, text) = entry.ok_or(bad(0))?;
        text.trim().parse::<usize>().map_err(|_| bad(line + 1))
    };

    let leaf_count = parse_count(lines.next())?;
    let portal_count = parse_count(lines.next())?;

    if portal_count > MAX_PORTALS {
        return Err(VisError::TooManyPortals {
            count: portal_count,
            max: MAX_PORTALS,
        });
    }

    let mut portals: Vec<VisPortal> = Vec::with_capacity(portal_count * 2);
    let mut leaves: Vec<VisLeaf> = (0..leaf_count).map(|_| VisLeaf::default()).collect();

    for _ in 0..portal_count {
        let (line_number, line) = lines.next().ok_or(bad(0))?;
        let bad = || VisError::BadPortalFile {
            line: line_number + 1,
        };

        // "numpoints l1 l2 (x y z) (x y z) ..."
        let (head, points_text) = match line.find('(') {
            Some(at) => (&line[..at], &line[at..]),
            None => return Err(bad()),
        };

        let head: Vec<usize> = head
            .split_whitespace()
            .map(|f| f.parse::<usize>())
            .collect::<Result<_, _>>()
            .map_err(|_| bad())?;
        if head.len() != 3 {
            return Err(bad());
        }
        let (num_points, l1, l2) = (head[0], head[1], head[2]);
        if l1 >= leaf_count || l2 >= leaf_count {
            return Err(bad());
        }

        let coords: Vec<f64> = points_text
            .split(|c| c == '(' || c == ')' || c == ' ')
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| bad())?;
        if coords.len() != num_points * 3 {
            return Err(bad());
        }

        let points: Vec<DVec3> = coords
            .chunks_exact(3)
            .map(|c| DVec3::new(c[0], c[1], c[2]))
            .collect();
        let winding = Winding::new(points);
        let (normal, dist) = winding.plane();

        // the stored winding's plane points into l1
        let into_l1 = portals.len();
        portals.push(VisPortal {
            winding: winding.clone(),
            normal,
            dist,
            from_leaf: l2,
            to_leaf: l1,
            mightsee: Vec::new(),
        });
        leaves[l2].portals.push(into_l1);

        let mut reversed = winding;
        reversed.flip();
        let into_l2 = portals.len();
        portals.push(VisPortal {
            winding: reversed,
            normal: -normal,
            dist: -dist,
            from_leaf: l1,
            to_leaf: l2,
            mightsee: Vec::new(),
        });
        leaves[l1].portals.push(into_l2);
    }

    Ok((leaf_count, portals, leaves))
}

/// Base vis for one portal: flood through portals that sit in front of
/// it, collecting the leaves that might be visible.
fn base_portal_vis(
    portals: &[VisPortal],
    leaves: &[VisLeaf],
    bit_bytes: usize,
    portal_index: usize,
) -> Vec<u8> {
    let portal = &portals[portal_index];

    // which portals the source can possibly shine through
    let mut portal_front = vec![false; portals.len()];
    for (other_index, other) in portals.iter().enumerate() {
        if other_index == portal_index {
            continue;
        }

        // the other portal needs a point in front of the source plane
        let front_of_source = other
            .winding
            .points
            .iter()
            .any(|&p| p.dot(portal.normal) - portal.dist > ON_EPSILON);
        if !front_of_source {
            continue;
        }
        // and the source a point behind the other's plane
        let behind_other = portal
            .winding
            .points
            .iter()
            .any(|&p| p.dot(other.normal) - other.dist < -ON_EPSILON);
        if !behind_other {
            continue;
        }

        portal_front[other_index] = true;
    }

    // flood leaves through the front set
    let mut mightsee = vec![0u8; bit_bytes];
    let mut stack = vec![portal.to_leaf];

    while let Some(leaf) = stack.pop() {
        let mask = 1u8 << (leaf & 7);
        if mightsee[leaf >> 3] & mask != 0 {
            continue;
        }
        mightsee[leaf >> 3] |= mask;

        for &next in &leaves[leaf].portals {
            if portal_front[next] {
                stack.push(portals[next].to_leaf);
            }
        }
    }

    mightsee
}

/// The whole solve: base vis, then portal flow unless `fast`, then
/// per-leaf rows.
pub fn compute_visibility(
    mut portals: Vec<VisPortal>,
    leaves: Vec<VisLeaf>,
    leaf_count: usize,
    options: &VisOptions,
) -> SparseMatrix {
    let bit_bytes = (leaf_count + 7) / 8;

    let base: Vec<Vec<u8>> = run_threads_on(
        options.threads,
        portals.len(),
        options.estimate,
        |i| base_portal_vis(&portals, &leaves, bit_bytes, i),
    );
    for (portal, mightsee) in portals.iter_mut().zip(base) {
        portal.mightsee = mightsee;
    }

    let rows: Vec<Vec<u8>> = if options.fast {
        portals.iter().map(|p| p.mightsee.clone()).collect()
    } else {
        let ctx = flow::FlowContext {
            portals: &portals,
            leaves: &leaves,
            bit_bytes,
            params: flow::FlowParams { full: options.full },
        };
        run_threads_on(options.threads, portals.len(), options.estimate, |i| {
            flow::portal_flow(&ctx, i)
        })
    };

    // a leaf sees itself plus everything its portals see
    let mut matrix = SparseMatrix::new(leaf_count);
    for leaf in 0..leaf_count {
        let mut dense = vec![0u8; bit_bytes];
        dense[leaf >> 3] |= 1 << (leaf & 7);

        for &portal_id in &leaves[leaf].portals {
            for (byte, &row_byte) in dense.iter_mut().zip(&rows[portal_id]) {
                *byte |= row_byte;
            }
        }

        matrix.rows[leaf] = sparse::SparseRow::from_dense(&dense);
    }

    matrix
}

/// Distance cull: drops mutual visibility between leaves whose bounds
/// centers sit further apart than the limit.
fn apply_max_distance(matrix: &mut SparseMatrix, centers: &[DVec3], limit: f64) {
    let limit_squared = limit * limit;
    for from in 0..matrix.rows.len() {
        let visible: Vec<usize> = matrix.rows[from].iter_bits().collect();
        let mut dense = matrix.rows[from].to_dense((matrix.rows.len() + 7) / 8);

        for to in visible {
            if to == from || to >= centers.len() {
                continue;
            }
            if (centers[from] - centers[to]).length_squared() > limit_squared {
                dense[to >> 3] &= !(1 << (to & 7));
            }
        }
        matrix.rows[from] = sparse::SparseRow::from_dense(&dense);
    }
}

/// `info_overview_point` and room entities OR extra leaves into rows
/// after the flow.
fn apply_entity_extensions(
    matrix: &mut SparseMatrix,
    bsp: &Bsp,
    leaves: &[VisLeaf],
    portals: &[VisPortal],
) -> eyre::Result<()> {
    let entities = bsp::entities::parse_entities(&bsp.entities)?;
    let leaf_count = matrix.rows.len();

    let parse_origin = |e: &bsp::entities::EntityKeyValues| -> Option<DVec3> {
        let coords: Vec<f64> = e
            .get("origin")?
            .split_whitespace()
            .filter_map(|c| c.parse().ok())
            .collect();
        (coords.len() == 3).then(|| DVec3::new(coords[0], coords[1], coords[2]))
    };

    // bsp leaf index -> visleaf
    let visleaf_of = |origin: DVec3| -> Option<usize> {
        let leaf = bsp.leaf_at(crate::math::to_f32(origin));
        (leaf >= 1 && leaf - 1 < leaf_count).then(|| leaf - 1)
    };

    let by_targetname: HashMap<&str, DVec3> = entities
        .iter()
        .filter_map(|e| Some((e.get("targetname")?, parse_origin(e)?)))
        .collect();

    for entity in &entities {
        match entity.classname() {
            "info_overview_point" => {
                let Some(origin) = parse_origin(entity) else { continue };
                let Some(overview_leaf) = visleaf_of(origin) else {
                    log::warn!("info_overview_point is not inside the world");
                    continue;
                };

                let reverse = entity.get("reverse").is_some_and(|v| v != "0");
                if reverse {
                    // the overview camera sees everything
                    for to in 0..leaf_count {
                        matrix.set(overview_leaf, to);
                    }
                } else {
                    // everything keeps the camera's leaf visible
                    for from in 0..leaf_count {
                        matrix.set(from, overview_leaf);
                    }
                }
            }
            "info_room" => {
                let Some(origin) = parse_origin(entity) else { continue };
                let Some(room_leaf) = visleaf_of(origin) else { continue };
                let Some(target) = entity.get("target") else { continue };
                let Some(&target_origin) = by_targetname.get(target) else {
                    log::warn!("info_room target `{}` not found", target);
                    continue;
                };
                let Some(target_leaf) = visleaf_of(target_origin) else { continue };

                let hops: usize = entity
                    .get("neighbor")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);

                // the room's neighborhood and the target see each other
                let mut neighborhood = vec![room_leaf];
                let mut frontier = vec![room_leaf];
                for _ in 0..hops {
                    let mut next = Vec::new();
                    for &leaf in &frontier {
                        for &portal_id in &leaves[leaf].portals {
                            let to = portals[portal_id].to_leaf;
                            if !neighborhood.contains(&to) {
                                neighborhood.push(to);
                                next.push(to);
                            }
                        }
                    }
                    frontier = next;
                }

                for &leaf in &neighborhood {
                    matrix.set(leaf, target_leaf);
                    matrix.set(target_leaf, leaf);
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Per-leaf ambient sound levels from nearby liquid and sky surfaces.
fn calc_ambient_sounds(bsp: &mut Bsp) {
    const AMBIENT_WATER: usize = 0;
    const AMBIENT_SKY: usize = 1;

    let face_kinds: Vec<Option<usize>> = bsp
        .faces
        .iter()
        .map(|face| {
            let texinfo = &bsp.texinfo[face.texinfo as usize];
            let name = &bsp.textures.get(texinfo.texture_index as usize)?.texture_name;
            if name.is_water() {
                Some(AMBIENT_WATER)
            } else if name.is_any_sky() {
                Some(AMBIENT_SKY)
            } else {
                None
            }
        })
        .collect();

    let face_centers: Vec<glam::Vec3> = bsp
        .faces
        .iter()
        .map(|face| {
            let vertices = bsp.face_vertices(face);
            vertices.iter().sum::<glam::Vec3>() / vertices.len().max(1) as f32
        })
        .collect();

    for leaf in bsp.leaves.iter_mut().skip(1) {
        let center = glam::Vec3::new(
            (leaf.mins[0] as f32 + leaf.maxs[0] as f32) * 0.5,
            (leaf.mins[1] as f32 + leaf.maxs[1] as f32) * 0.5,
            (leaf.mins[2] as f32 + leaf.maxs[2] as f32) * 0.5,
        );

        let mut levels = [0u8; 4];
        for (kind, face_center) in face_kinds.iter().zip(&face_centers) {
            let Some(channel) = kind else { continue };
            let dist = (center - *face_center).length();
            let volume = (255.0 * (1.0 - dist / 1024.0)).clamp(0.0, 255.0) as u8;
            levels[*channel] = levels[*channel].max(volume);
        }
        leaf.ambient_levels = levels;
    }
}

/// Compresses the matrix into the visdata lump and patches leaf
/// offsets. Visleaf i is lump leaf i + 1.
fn write_visdata(bsp: &mut Bsp, matrix: &SparseMatrix) {
    let leaf_count = matrix.rows.len();
    let bit_bytes = (leaf_count + 7) / 8;

    let mut visdata = Vec::new();
    for (visleaf, row) in matrix.rows.iter().enumerate() {
        let offset = visdata.len() as i32;
        visdata.extend(bsp::utils::compress_vis(&row.to_dense(bit_bytes)));

        if let Some(leaf) = bsp.leaves.get_mut(visleaf + 1) {
            leaf.vis_offset = offset;
        }
    }

    bsp.visibility = visdata;
}

/// Rewrites the portal file with normalized formatting so tools that
/// read it back agree with the numbering VIS used.
fn rewrite_portal_file(path: &Path, text: &str) -> eyre::Result<()> {
    let (leaf_count, portals, _) = parse_portal_file(text)?;

    let mut lines = Vec::with_capacity(portals.len() / 2);
    for pair in portals.chunks(2) {
        let portal = &pair[0];
        let mut line = format!(
            "{} {} {}",
            portal.winding.size(),
            portal.to_leaf,
            portal.from_leaf
        );
        for p in &portal.winding.points {
            line += &format!(" ({} {} {})", p.x, p.y, p.z);
        }
        lines.push(line);
    }

    let text = format!(
        "PRT1\n{}\n{}\n{}\n",
        leaf_count,
        lines.len(),
        lines.join("\n")
    );
    std::fs::write(path, text)?;
    Ok(())
}

pub fn run(map_path: &Path, options: &VisOptions) -> eyre::Result<()> {
    let bsp_path = map_path.with_extension("bsp");
    let mut bsp = Bsp::from_file(&bsp_path)?;

    let prt_path = map_path.with_extension("prt");
    let text = std::fs::read_to_string(&prt_path).map_err(|_| VisError::MissingPortalFile {
        path: prt_path.clone(),
    })?;

    let (leaf_count, portals, leaves) = parse_portal_file(&text)?;
    eyre::ensure!(
        leaf_count as i32 == bsp.models[0].vis_leaves_count,
        "portal file leaf count {} does not match the bsp ({})",
        leaf_count,
        bsp.models[0].vis_leaves_count
    );

    log::info!("{} portalleafs, {} portals", leaf_count, portals.len() / 2);

    let mut matrix = compute_visibility(portals, leaves, leaf_count, options);

    if options.max_distance > 0.0 {
        let centers: Vec<DVec3> = (0..leaf_count)
            .map(|visleaf| {
                let leaf = &bsp.leaves[visleaf + 1];
                DVec3::new(
                    (leaf.mins[0] as f64 + leaf.maxs[0] as f64) * 0.5,
                    (leaf.mins[1] as f64 + leaf.maxs[1] as f64) * 0.5,
                    (leaf.mins[2] as f64 + leaf.maxs[2] as f64) * 0.5,
                )
            })
            .collect();
        apply_max_distance(&mut matrix, &centers, options.max_distance);
    }

    {
        // re-parse the leaves/portals for the extensions (ownership
        // moved into compute)
        let (_, portals, leaves) = parse_portal_file(&text)?;
        apply_entity_extensions(&mut matrix, &bsp, &leaves, &portals)?;
    }

    matrix.make_symmetric();

    if !options.no_fixprt {
        rewrite_portal_file(&prt_path, &text)?;
    }

    let average = matrix
        .rows
        .iter()
        .map(|r| r.count_ones())
        .sum::<usize>()
        .checked_div(leaf_count)
        .unwrap_or(0);
    log::info!("average leafs visible: {}", average);

    write_visdata(&mut bsp, &matrix);
    calc_ambient_sounds(&mut bsp);

    bsp.check_limits()?;
    bsp.write_to_file(&bsp_path)?;

    Ok(())
}
