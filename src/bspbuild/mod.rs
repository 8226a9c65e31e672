//! BSP stage: hull face streams in, a playable tree out.
//!
//! The world model gets the full treatment: subdivision, tree build,
//! portalization, outside fill with leak tracing, t-junction fixup and
//! a portal file for VIS. Brush entity models get their own small
//! trees. Hulls 1-3 become clipnode trees with brink repair.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
};

use glam::DVec3;

use bsp::{Bsp, Contents};

use crate::{
    csg::{hull_file_path, read_hull_file, HullFace, NUM_HULLS},
    math::{BoundingBox, ON_EPSILON},
    planes::PlaneRegistry,
    winding::Winding,
};

pub mod brink;
pub mod outside;
pub mod portals;
pub mod solidbsp;
pub mod tjunc;
pub mod tree;
pub mod writebsp;

pub use solidbsp::PickSplit;

use tree::{Tree, TreeFace, TreeNodeKind};

#[derive(Debug, Clone)]
pub struct BspOptions {
    pub threads: usize,
    /// Keep unreferenced planes/texinfo in the output.
    pub no_opt: bool,
    pub no_tjunc: bool,
    pub no_brink: bool,
    /// Stop after the leak check.
    pub leak_only: bool,
    /// Maximum face extent in texels before subdivision.
    pub subdivide: f64,
    pub pick_split: PickSplit,
}

impl Default for BspOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            no_opt: false,
            no_tjunc: false,
            no_brink: false,
            leak_only: false,
            subdivide: 240.0,
            pick_split: PickSplit::First,
        }
    }
}

#[derive(Debug, Default)]
pub struct BuildSummary {
    pub leaked: bool,
    pub filled_leaves: usize,
    pub models: usize,
    pub brinks_found: usize,
    pub partitions_added: usize,
    pub tjunctions_fixed: usize,
}

/// Rebuilds the f64 registry from the plane lump CSG wrote. The lump
/// holds front/back pairs in registry order already.
pub fn registry_from_lump(lump: &[bsp::Plane]) -> PlaneRegistry {
    let mut planes = PlaneRegistry::new();
    for pair in lump.chunks(2) {
        planes.intern(crate::math::to_f64(pair[0].normal), pair[0].distance as f64);
    }
    planes
}

fn to_tree_faces(faces: &[HullFace], source_base: u32) -> Vec<TreeFace> {
    faces
        .iter()
        .enumerate()
        .map(|(i, f)| TreeFace {
            plane: f.plane,
            contents: f.contents,
            texinfo: f.texinfo,
            detail_level: f.detail_level,
            source: source_base + i as u32,
            winding: f.winding.clone(),
        })
        .collect()
}

/// Splits faces whose texel extent exceeds the subdivide limit, along
/// the texture axes, so lightmaps stay within their sample budget.
fn subdivide_faces(faces: Vec<TreeFace>, texinfo: &[bsp::TexInfo], subdivide: f64) -> Vec<TreeFace> {
    let mut queue: Vec<TreeFace> = faces;
    let mut done = Vec::with_capacity(queue.len());

    'queue: while let Some(face) = queue.pop() {
        if face.texinfo >= 0 {
            let ti = &texinfo[face.texinfo as usize];

            for axis_vec in [ti.u, ti.v] {
                let axis = crate::math::to_f64(axis_vec);
                let scale = axis.length();
                if scale < 1e-6 {
                    continue;
                }

                let texels: Vec<f64> =
                    face.winding.points.iter().map(|&p| p.dot(axis)).collect();
                let min = texels.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = texels.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

                if max - min <= subdivide {
                    continue;
                }

                // cut a subdivide-sized slab off the low end
                let cut = min + subdivide - 16.0;
                let normal = axis / scale;
                let (front, back) = face.winding.clip(normal, cut / scale, ON_EPSILON);

                match (front, back) {
                    (Some(front), Some(back)) => {
                        queue.push(TreeFace {
                            winding: front,
                            ..face.clone()
                        });
                        queue.push(TreeFace {
                            winding: back,
                            ..face
                        });
                        continue 'queue;
                    }
                    // numerically unsplittable; leave it alone
                    _ => break,
                }
            }
        }

        done.push(face);
    }

    // queue processing reverses order; keep the stream stable
    done.sort_by_key(|f| f.source);
    done
}

fn tree_bounds(tree: &Tree) -> BoundingBox {
    let mut bounds = BoundingBox::empty();
    for node in &tree.nodes {
        bounds.union(&node.bounds);
    }
    bounds
}

/// Point entities that must end up inside the world, for leak checks.
fn entity_spots(
    entities: &[bsp::entities::EntityKeyValues],
    brush_entities: &HashSet<u16>,
) -> Vec<(String, DVec3)> {
    entities
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(i, _)| !brush_entities.contains(&(*i as u16)))
        .filter_map(|(_, e)| {
            let origin = e.get("origin")?;
            let coords: Vec<f64> = origin
                .split_whitespace()
                .filter_map(|c| c.parse().ok())
                .collect();
            if coords.len() != 3 {
                return None;
            }
            Some((
                e.classname().to_string(),
                DVec3::new(coords[0], coords[1], coords[2]),
            ))
        })
        .collect()
}

/// The full stage over in-memory data. `map_path` is where leak and
/// portal files land; None suppresses them (tests).
pub fn compile(
    bsp: &mut Bsp,
    hull_faces: &[Vec<HullFace>; NUM_HULLS],
    options: &BspOptions,
    map_path: Option<&Path>,
) -> eyre::Result<BuildSummary> {
    let mut planes = registry_from_lump(&bsp.planes);
    let mut entities = bsp::entities::parse_entities(&bsp.entities)?;

    let mut summary = BuildSummary::default();

    // group the visible faces by owning entity; each group is a model
    let mut by_entity: BTreeMap<u16, Vec<HullFace>> = BTreeMap::new();
    for face in &hull_faces[0] {
        by_entity.entry(face.entity).or_default().push(face.clone());
    }

    if !by_entity.contains_key(&0) {
        eyre::bail!("Map has no world brushes");
    }

    let brush_entities: HashSet<u16> = (0..NUM_HULLS)
        .flat_map(|h| hull_faces[h].iter().map(|f| f.entity))
        .collect();

    // world model first
    let world_faces = subdivide_faces(
        to_tree_faces(&by_entity[&0], 0),
        &bsp.texinfo,
        options.subdivide,
    );
    let mut world_tree = solidbsp::build_tree(&planes, world_faces, options.pick_split);
    let world_bounds = tree_bounds(&world_tree);
    let world_graph = portals::portalize(&world_tree, &planes, &world_bounds);

    let spots = entity_spots(&entities, &brush_entities);
    let fill = outside::fill_outside(&mut world_tree, &world_graph, &planes, &spots);
    summary.leaked = fill.leaked;
    summary.filled_leaves = fill.filled_leaves;

    if fill.leaked {
        if let Some(map_path) = map_path {
            outside::write_pointfiles(map_path, &fill.leak_path)?;
            log::error!(
                "Leak pointfile written to {}",
                map_path.with_extension("pts").display()
            );
        }
        if options.leak_only {
            return Ok(summary);
        }
    }

    if !options.no_tjunc {
        summary.tjunctions_fixed = fix_world_tjunctions(&mut world_tree);
    }

    // lump emission
    let mut writer = writebsp::LumpWriter::new(bsp);
    let mut model_entries: Vec<bsp::Model> = Vec::new();

    let world_lumps = writer.write_model(bsp, &world_tree, &planes);

    // portal file for VIS, in final leaf numbering
    if !fill.leaked {
        if let Some(map_path) = map_path {
            write_portal_file(map_path, &world_graph, &world_tree, &world_lumps)?;
        }
    }

    // clipping hulls and the model table
    let entity_order: Vec<u16> = by_entity.keys().copied().collect();

    for &entity in &entity_order {
        let submodel_lumps;
        let lumps = if entity == 0 {
            &world_lumps
        } else {
            let faces = subdivide_faces(
                to_tree_faces(&by_entity[&entity], 0),
                &bsp.texinfo,
                options.subdivide,
            );
            let tree = solidbsp::build_tree(&planes, faces, options.pick_split);
            submodel_lumps = writer.write_model(bsp, &tree, &planes);
            &submodel_lumps
        };

        let mut head_nodes = [lumps.head_node, -1, -1, -1];

        for hull in 1..NUM_HULLS {
            let faces: Vec<TreeFace> = to_tree_faces(
                &hull_faces[hull]
                    .iter()
                    .filter(|f| f.entity == entity)
                    .cloned()
                    .collect::<Vec<_>>(),
                0,
            );

            if faces.is_empty() {
                head_nodes[hull] = Contents::Empty as i32;
                continue;
            }

            let hull_tree = solidbsp::build_tree(&planes, faces, options.pick_split);

            let partitions = if options.no_brink {
                HashMap::new()
            } else {
                let bounds = tree_bounds(&hull_tree);
                let graph = portals::portalize(&hull_tree, &planes, &bounds);
                let (partitions, brink_summary) = brink::analyze(&hull_tree, &mut planes, &graph);
                summary.brinks_found += brink_summary.brinks_found;
                summary.partitions_added += brink_summary.partitions_added;
                partitions
            };

            head_nodes[hull] = writer.write_clipnodes(bsp, &hull_tree, &partitions);
        }

        // brush entities other than the world point at their model
        let model_index = model_entries.len();
        if entity != 0 {
            entities[entity as usize].set("model", &format!("*{}", model_index));
        }

        let origin = entities[entity as usize]
            .get("origin")
            .map(|o| {
                let c: Vec<f64> = o
                    .split_whitespace()
                    .filter_map(|v| v.parse().ok())
                    .collect();
                if c.len() == 3 {
                    DVec3::new(c[0], c[1], c[2])
                } else {
                    DVec3::ZERO
                }
            })
            .unwrap_or(DVec3::ZERO);

        model_entries.push(bsp::Model {
            mins: crate::math::to_f32(lumps.mins),
            maxs: crate::math::to_f32(lumps.maxs),
            origin: crate::math::to_f32(origin),
            head_nodes,
            vis_leaves_count: lumps.vis_leaves,
            first_face: lumps.first_face,
            face_count: lumps.face_count,
        });
    }

    summary.models = model_entries.len();
    bsp.models = model_entries;
    bsp.planes = planes.to_bsp_planes();
    bsp.entities = bsp::entities::format_entities(&entities);

    if !options.no_opt {
        bsp.strip_unreferenced();
    }
    bsp.check_limits()?;

    Ok(summary)
}

/// Re-welds t-junctions across the drawn faces of the world tree.
fn fix_world_tjunctions(tree: &mut Tree) -> usize {
    // pull the windings out in deterministic node order, fix, put back
    let mut slots: Vec<(usize, usize)> = Vec::new();
    let mut windings: Vec<Winding> = Vec::new();

    for (node_index, node) in tree.nodes.iter().enumerate() {
        if let TreeNodeKind::Node { faces, .. } = &node.kind {
            for (face_index, face) in faces.iter().enumerate() {
                if face.texinfo >= 0 {
                    slots.push((node_index, face_index));
                    windings.push(face.winding.clone());
                }
            }
        }
    }

    let added = tjunc::fix_tjunctions(&mut windings);

    for ((node_index, face_index), winding) in slots.into_iter().zip(windings) {
        if let TreeNodeKind::Node { faces, .. } = &mut tree.nodes[node_index].kind {
            faces[face_index].winding = winding;
        }
    }

    added
}

/// `PRT1` portal file: visleaf count, portal count, then one line per
/// portal with its winding. Visleaf numbers are lump leaf index - 1.
fn write_portal_file(
    map_path: &Path,
    graph: &portals::PortalGraph,
    tree: &Tree,
    lumps: &writebsp::ModelLumps,
) -> std::io::Result<()> {
    let mut lines: Vec<String> = Vec::new();
    let mut count = 0usize;

    for portal in &graph.portals {
        let [front, back] = portal.nodes;
        if front == graph.outside || back == graph.outside {
            continue;
        }
        // both sides must still be open leaves after filling
        let open = |node: u32| {
            tree.nodes[node as usize]
                .contents()
                .map(|c| c != Contents::Solid)
                .unwrap_or(false)
        };
        if !open(front) || !open(back) {
            continue;
        }

        let (Some(&front_leaf), Some(&back_leaf)) =
            (lumps.leaf_map.get(&front), lumps.leaf_map.get(&back))
        else {
            continue;
        };

        let mut line = format!(
            "{} {} {}",
            portal.winding.size(),
            front_leaf - 1,
            back_leaf - 1
        );
        for p in &portal.winding.points {
            line += &format!(" ({} {} {})", p.x, p.y, p.z);
        }
        lines.push(line);
        count += 1;
    }

    let text = format!(
        "PRT1\n{}\n{}\n{}\n",
        lumps.vis_leaves,
        count,
        lines.join("\n")
    );
    std::fs::write(map_path.with_extension("prt"), text)
}

/// Full stage with file I/O: `<map>.bsp` + hull files in, `<map>.bsp`
/// rewritten.
pub fn run(map_path: &Path, options: &BspOptions) -> eyre::Result<BuildSummary> {
    let bsp_path = map_path.with_extension("bsp");
    let mut bsp = Bsp::from_file(&bsp_path)?;

    let mut hull_faces: [Vec<HullFace>; NUM_HULLS] = Default::default();
    for (hull, slot) in hull_faces.iter_mut().enumerate() {
        let path: PathBuf = hull_file_path(map_path, hull);
        if path.exists() {
            let (file_hull, faces) = read_hull_file(&path)?;
            eyre::ensure!(file_hull == hull, "hull file {} mislabeled", path.display());
            *slot = faces;
        }
    }

    let summary = compile(&mut bsp, &hull_faces, options, Some(map_path))?;

    bsp.write_to_file(&bsp_path)?;

    log::info!(
        "hlbsp: {} models, {} nodes, {} leaves, {} clipnodes{}",
        bsp.models.len(),
        bsp.nodes.len(),
        bsp.leaves.len(),
        bsp.clipnodes.len(),
        if summary.leaked { " (LEAKED)" } else { "" }
    );

    Ok(summary)
}

#[cfg(test)]
pub(crate) fn stage_faces_for_tests(
    parsed: &map::Map,
) -> (PlaneRegistry, Vec<TreeFace>) {
    let out = crate::csg::compile_map(parsed, &crate::csg::CsgOptions::default()).unwrap();
    let planes = registry_from_lump(&out.bsp.planes);
    let faces = to_tree_faces(&out.hull_faces[0], 0);
    (planes, faces)
}
