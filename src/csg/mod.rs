//! CSG stage: brushes in, face streams and a seed BSP container out.
//!
//! Each brush side becomes a winding chopped by its sibling planes;
//! textures decide contents; ORIGIN and BOUNDINGBOX brushes fold into
//! entity keys; everything solid is re-expanded per collision hull.
//! The stage writes `<map>.bsp` holding entities, planes, texinfo and
//! textures, plus the four hull face streams the BSP stage consumes.

use std::path::{Path, PathBuf};

use bsp::{Bsp, Contents};
use wad::{TextureNameError, Wad};

use crate::{
    math::NORMAL_EPSILON,
    planes::PlaneRegistry,
    texinfo::{TexInfoRegistry, TextureAxes, TextureTable},
};

pub mod brush;
pub mod hullfile;

pub use brush::{BrushContents, CsgBrush, NUM_HULLS};
pub use hullfile::{hull_file_path, read_hull_file, write_hull_file, HullFace};

#[derive(Debug, thiserror::Error)]
pub enum CsgError {
    #[error(transparent)]
    Map(#[from] map::MapError),
    #[error("Entity {entity}, brush {brush}: {source}")]
    BadTextureName {
        entity: usize,
        brush: usize,
        #[source]
        source: TextureNameError,
    },
    #[error("Entity {entity}, brush {brush}, side {side}: the three points do not define a plane")]
    DegenerateSide {
        entity: usize,
        brush: usize,
        side: usize,
    },
    #[error("Entity {entity}, brush {brush}: only {sides} sides survive, a brush needs at least 4")]
    DegenerateBrush {
        entity: usize,
        brush: usize,
        sides: usize,
    },
    #[error("Entity {entity}, brush {brush}: mixed face contents ({first} with `{second}`)")]
    MixedContents {
        entity: usize,
        brush: usize,
        first: String,
        second: String,
    },
    #[error("Entity {entity}: an entity needs more than an ORIGIN brush")]
    OnlyOriginBrush { entity: usize },
    #[error("Entity {entity}, brush {brush}: texture axes perpendicular to face `{texture}`")]
    TextureAxisPerpendicular {
        entity: usize,
        brush: usize,
        texture: String,
    },
    #[error("MAX_MAP_PLANES exceeds the engine limit: {value} > {max}. Simplify off-axis brushwork; unaligned brushes burn planes.")]
    PlaneLimit { value: usize, max: usize },
    #[error("Bad hull file `{path}`")]
    BadHullFile { path: PathBuf },
    #[error("Cannot access `{path}`: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct CsgOptions {
    pub threads: usize,
    /// Keep NULL faces in the visible stream.
    pub no_null_tex: bool,
    /// Skip the expansion hulls entirely.
    pub no_clip: bool,
    /// Skip hull 2 (the large-monster hull).
    pub no_hull2: bool,
    /// WADs to resolve textures from, besides the worldspawn list.
    pub wad_paths: Vec<PathBuf>,
}

impl Default for CsgOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            no_null_tex: false,
            no_clip: false,
            no_hull2: false,
            wad_paths: vec![],
        }
    }
}

#[derive(Debug)]
pub struct CsgOutput {
    pub bsp: Bsp,
    pub hull_faces: [Vec<HullFace>; NUM_HULLS],
}

/// Runs CSG over a parsed map. Pure up to WAD reads, so tests can feed
/// in-memory maps.
pub fn compile_map(parsed: &map::Map, options: &CsgOptions) -> Result<CsgOutput, CsgError> {
    let wads = load_wads(parsed, &options.wad_paths);

    let mut planes = PlaneRegistry::new();
    let mut entities: Vec<bsp::entities::EntityKeyValues> = Vec::new();
    let mut prepared: Vec<CsgBrush> = Vec::new();

    for (entity_index, entity) in parsed.entities.iter().enumerate() {
        let mut kvs = bsp::entities::EntityKeyValues::default();
        for (key, value) in entity.key_values.iter() {
            kvs.set(key, value);
        }

        let Some(brushes) = &entity.brushes else {
            entities.push(kvs);
            continue;
        };

        let mut origin_bounds = crate::math::BoundingBox::empty();
        let mut bounding_box = crate::math::BoundingBox::empty();
        let mut real_brushes = 0usize;

        for (brush_index, brush) in brushes.iter().enumerate() {
            let prep = brush::prepare_brush(entity_index, brush_index, brush, &mut planes)?;

            match prep.contents {
                BrushContents::Origin => origin_bounds.union(&prep.bounds),
                BrushContents::BoundingBox => bounding_box.union(&prep.bounds),
                _ => {
                    real_brushes += 1;
                    prepared.push(prep);
                }
            }
        }

        // ORIGIN folds into a key; an entity made only of it is a defect
        if !origin_bounds.is_empty() {
            if real_brushes == 0 && entity_index != 0 {
                return Err(CsgError::OnlyOriginBrush {
                    entity: entity_index,
                });
            }
            let center = origin_bounds.center();
            kvs.set(
                "origin",
                &format!("{} {} {}", center.x, center.y, center.z),
            );
        }
        if !bounding_box.is_empty() {
            kvs.set(
                "zhlt_minsmaxs",
                &format!(
                    "{} {} {} {} {} {}",
                    bounding_box.mins.x,
                    bounding_box.mins.y,
                    bounding_box.mins.z,
                    bounding_box.maxs.x,
                    bounding_box.maxs.y,
                    bounding_box.maxs.z
                ),
            );
        }

        entities.push(kvs);
    }

    let mut texinfo = TexInfoRegistry::new();
    let mut textures = TextureTable::new();
    let mut hull_faces: [Vec<HullFace>; NUM_HULLS] = Default::default();

    // hull 0, stable brush/side order
    for brush in &prepared {
        let entity = &parsed.entities[brush.entity];
        let detail_level = entity
            .key_values
            .get("zhlt_detaillevel")
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(0);

        if !brush.contents.in_hull(0) {
            continue;
        }

        let map_brush = &entity.brushes.as_ref().unwrap()[brush.brush];

        for side in &brush.sides {
            if side.bevel {
                continue;
            }

            let name = &side.texture;
            let clip_in_hull0 =
                matches!(brush.contents, BrushContents::Clip { hull_mask } if hull_mask & 1 != 0);

            // skip never reaches the tree; hints and nulls do, undrawn
            if name.is_skip() {
                continue;
            }

            let undrawn = clip_in_hull0
                || name.is_any_hint() && !name.is_solid_hint()
                || (!options.no_null_tex && name.is_any_null());

            let texinfo_index = if undrawn {
                -1
            } else {
                let map_side = &map_brush.sides[side.axes_source];
                let axes = TextureAxes::from_side(map_side);

                let plane_normal = crate::math::to_f32(planes.get(side.plane).normal);
                if axes.u.cross(axes.v).dot(plane_normal).abs() < NORMAL_EPSILON as f32 {
                    return Err(CsgError::TextureAxisPerpendicular {
                        entity: brush.entity,
                        brush: brush.brush,
                        texture: name.to_string(),
                    });
                }

                let texture_index = textures.find_or_insert(*name, &wads);
                let flags = if name.is_any_sky() || name.is_any_liquid() {
                    bsp::TEX_SPECIAL
                } else {
                    0
                };

                texinfo.find_or_insert(bsp::TexInfo {
                    u: axes.u,
                    u_offset: axes.u_offset,
                    v: axes.v,
                    v_offset: axes.v_offset,
                    texture_index,
                    flags,
                }) as i32
            };

            let contents = if name.is_ordinary_hint() {
                Contents::Empty
            } else {
                brush.contents.to_leaf_contents()
            };

            // drop whatever sibling brushes bury
            let fragments =
                brush::cull_side_against_neighbors(side, brush, &prepared, &planes);

            for winding in fragments {
                hull_faces[0].push(HullFace {
                    entity: brush.entity as u16,
                    brush: brush.brush as u16,
                    contents,
                    plane: side.plane,
                    texinfo: texinfo_index,
                    detail_level,
                    winding,
                });
            }
        }
    }

    // expansion hulls
    if !options.no_clip {
        for hull in 1..NUM_HULLS {
            if hull == 2 && options.no_hull2 {
                continue;
            }

            for brush in &prepared {
                if !brush.contents.in_hull(hull) {
                    continue;
                }

                let expanded = brush::expand_brush_for_hull(brush, hull, &mut planes)?;
                for (plane, winding) in expanded {
                    hull_faces[hull].push(HullFace {
                        entity: brush.entity as u16,
                        brush: brush.brush as u16,
                        contents: brush.contents.to_leaf_contents(),
                        plane,
                        texinfo: -1,
                        detail_level: 0,
                        winding,
                    });
                }
            }
        }
    }

    let bsp = Bsp {
        entities: bsp::entities::format_entities(&entities),
        planes: planes.to_bsp_planes(),
        texinfo: texinfo.into_entries(),
        textures: textures.into_textures(),
        ..Default::default()
    };

    // the tree stages have not run yet, but the plane budget is
    // already decided here
    if bsp.planes.len() > bsp::constants::MAX_MAP_PLANES {
        return Err(CsgError::PlaneLimit {
            value: bsp.planes.len(),
            max: bsp::constants::MAX_MAP_PLANES,
        });
    }

    Ok(CsgOutput { bsp, hull_faces })
}

/// Full stage: parse the map, compile, write `<map>.bsp` + hull files.
pub fn run(map_path: &Path, options: &CsgOptions) -> eyre::Result<CsgOutput> {
    let parsed = map::Map::from_file(map_path)?;

    let output = compile_map(&parsed, options)?;

    let bsp_path = map_path.with_extension("bsp");
    output.bsp.write_to_file(&bsp_path)?;

    for (hull, faces) in output.hull_faces.iter().enumerate() {
        let path = hull_file_path(map_path, hull);
        write_hull_file(&path, hull, faces).map_err(|source| CsgError::Io {
            source,
            path: path.clone(),
        })?;
    }

    log::info!(
        "hlcsg: {} brush faces, {} planes, {} texinfo",
        output.hull_faces[0].len(),
        output.bsp.planes.len(),
        output.bsp.texinfo.len()
    );

    Ok(output)
}

fn load_wads(parsed: &map::Map, extra: &[PathBuf]) -> Vec<Wad> {
    let mut wads = Vec::new();

    let listed = parsed
        .entities
        .first()
        .and_then(|world| world.key_values.get("wad"))
        .unwrap_or("");

    for path in listed.split(';').filter(|p| !p.is_empty()) {
        match Wad::from_file(path) {
            Ok(wad) => wads.push(wad),
            Err(e) => log::warn!("Cannot load wad `{}`: {}", path, e),
        }
    }

    for path in extra {
        match Wad::from_file(path) {
            Ok(wad) => wads.push(wad),
            Err(e) => log::warn!("Cannot load wad `{}`: {}", path.display(), e),
        }
    }

    wads
}

#[cfg(test)]
pub(crate) mod test_support {
    use glam::{DVec3, DVec4};

    /// An axis-aligned cube brush in Valve-220 form, every side the
    /// same texture.
    pub fn cube_brush_minmax(mins: DVec3, maxs: DVec3, texture: &str) -> map::Brush {
        // (corner, e1, e2) per face such that (p1-p2) x (p3-p2) points out
        let faces: [(DVec3, DVec3, DVec3); 6] = [
            (
                DVec3::new(maxs.x, mins.y, mins.z),
                DVec3::Y,
                DVec3::Z,
            ),
            (mins, DVec3::Z, DVec3::Y),
            (
                DVec3::new(mins.x, maxs.y, mins.z),
                DVec3::Z,
                DVec3::X,
            ),
            (mins, DVec3::X, DVec3::Z),
            (
                DVec3::new(mins.x, mins.y, maxs.z),
                DVec3::X,
                DVec3::Y,
            ),
            (mins, DVec3::Y, DVec3::X),
        ];

        let sides = faces
            .iter()
            .map(|&(corner, e1, e2)| map::BrushSide {
                p1: corner + e1,
                p2: corner,
                p3: corner + e2,
                texture_name: texture.to_string(),
                u: DVec4::new(e1.x, e1.y, e1.z, 0.0),
                v: DVec4::new(e2.x, e2.y, e2.z, 0.0),
                rotation: 0.0,
                u_scale: 1.0,
                v_scale: 1.0,
            })
            .collect();

        map::Brush { sides }
    }

    pub fn cube_brush(center: DVec3, half: f64, texture: &str) -> map::Brush {
        cube_brush_minmax(center - DVec3::splat(half), center + DVec3::splat(half), texture)
    }

    pub fn worldspawn_with(brushes: Vec<map::Brush>) -> map::Map {
        let mut kvs = map::KeyValues::new();
        kvs.set("classname", "worldspawn");
        kvs.set("mapversion", "220");

        map::Map {
            tb_header: None,
            entities: vec![map::Entity {
                key_values: kvs,
                brushes: Some(brushes),
            }],
        }
    }

    pub fn point_entity(classname: &str, origin: DVec3, extra: &[(&str, &str)]) -> map::Entity {
        let mut kvs = map::KeyValues::new();
        kvs.set("classname", classname);
        kvs.set("origin", &format!("{} {} {}", origin.x, origin.y, origin.z));
        for (k, v) in extra {
            kvs.set(k, v);
        }
        map::Entity {
            key_values: kvs,
            brushes: None,
        }
    }

    /// A hollow box: six wall slabs around the given interior.
    pub fn hollow_box(mins: DVec3, maxs: DVec3, thickness: f64, texture: &str) -> Vec<map::Brush> {
        let t = thickness;
        let mut brushes = Vec::with_capacity(6);

        // floor and ceiling
        brushes.push(cube_brush_minmax(
            DVec3::new(mins.x - t, mins.y - t, mins.z - t),
            DVec3::new(maxs.x + t, maxs.y + t, mins.z),
            texture,
        ));
        brushes.push(cube_brush_minmax(
            DVec3::new(mins.x - t, mins.y - t, maxs.z),
            DVec3::new(maxs.x + t, maxs.y + t, maxs.z + t),
            texture,
        ));
        // four walls
        brushes.push(cube_brush_minmax(
            DVec3::new(mins.x - t, mins.y - t, mins.z),
            DVec3::new(mins.x, maxs.y + t, maxs.z),
            texture,
        ));
        brushes.push(cube_brush_minmax(
            DVec3::new(maxs.x, mins.y - t, mins.z),
            DVec3::new(maxs.x + t, maxs.y + t, maxs.z),
            texture,
        ));
        brushes.push(cube_brush_minmax(
            DVec3::new(mins.x, mins.y - t, mins.z),
            DVec3::new(maxs.x + t, mins.y, maxs.z),
            texture,
        ));
        brushes.push(cube_brush_minmax(
            DVec3::new(mins.x, maxs.y, mins.z),
            DVec3::new(maxs.x + t, maxs.y + t, maxs.z),
            texture,
        ));

        brushes
    }
}

#[cfg(test)]
mod test {
    use super::test_support::*;
    use super::*;
    use glam::DVec3;

    #[test]
    fn single_cube_emits_six_faces() {
        let map = worldspawn_with(vec![cube_brush(DVec3::ZERO, 64.0, "stone")]);
        let out = compile_map(&map, &CsgOptions::default()).unwrap();

        assert_eq!(out.hull_faces[0].len(), 6);
        for face in &out.hull_faces[0] {
            assert_eq!(face.contents, Contents::Solid);
            assert!(face.texinfo >= 0);
            assert_eq!(face.winding.size(), 4);
        }

        // six side planes, each interned with its back twin
        assert_eq!(out.bsp.planes.len(), 12);
        assert_eq!(out.bsp.textures.len(), 1);
    }

    #[test]
    fn clip_cube_is_invisible_but_collides() {
        let map = worldspawn_with(vec![cube_brush(DVec3::ZERO, 32.0, "CLIP")]);
        let out = compile_map(&map, &CsgOptions::default()).unwrap();

        assert!(out.hull_faces[0].is_empty());
        assert!(!out.hull_faces[1].is_empty());
        assert!(!out.hull_faces[2].is_empty());
        assert!(!out.hull_faces[3].is_empty());
        for face in &out.hull_faces[1] {
            assert_eq!(face.contents, Contents::Solid);
            assert_eq!(face.texinfo, -1);
        }
    }

    #[test]
    fn noclip_suppresses_expansion_hulls() {
        let map = worldspawn_with(vec![cube_brush(DVec3::ZERO, 32.0, "stone")]);
        let out = compile_map(
            &map,
            &CsgOptions {
                no_clip: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(out.hull_faces[1].is_empty());
        assert!(out.hull_faces[2].is_empty());
    }

    #[test]
    fn nohull2_skips_only_hull2() {
        let map = worldspawn_with(vec![cube_brush(DVec3::ZERO, 32.0, "stone")]);
        let out = compile_map(
            &map,
            &CsgOptions {
                no_hull2: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!out.hull_faces[1].is_empty());
        assert!(out.hull_faces[2].is_empty());
        assert!(!out.hull_faces[3].is_empty());
    }

    #[test]
    fn null_faces_kept_for_sealing_without_texinfo() {
        let mut map = worldspawn_with(vec![cube_brush(DVec3::ZERO, 64.0, "stone")]);
        map.entities[0].brushes.as_mut().unwrap()[0].sides[0].texture_name = "NULL".to_string();
        let out = compile_map(&map, &CsgOptions::default()).unwrap();

        assert_eq!(out.hull_faces[0].len(), 6);
        let nulls: Vec<_> = out.hull_faces[0]
            .iter()
            .filter(|f| f.texinfo == -1)
            .collect();
        assert_eq!(nulls.len(), 1);
    }

    #[test]
    fn origin_brush_becomes_key() {
        let mut map = worldspawn_with(vec![cube_brush(DVec3::ZERO, 64.0, "stone")]);
        let mut kvs = map::KeyValues::new();
        kvs.set("classname", "func_door");
        map.entities.push(map::Entity {
            key_values: kvs,
            brushes: Some(vec![
                cube_brush(DVec3::new(64.0, 0.0, 0.0), 16.0, "metal"),
                cube_brush(DVec3::new(96.0, 32.0, 8.0), 4.0, "ORIGIN"),
            ]),
        });

        let out = compile_map(&map, &CsgOptions::default()).unwrap();
        let entities = bsp::entities::parse_entities(&out.bsp.entities).unwrap();
        assert_eq!(entities[1].get("origin"), Some("96 32 8"));

        // the origin brush itself emits no faces
        assert_eq!(out.hull_faces[0].len(), 12);
    }

    #[test]
    fn entity_with_only_origin_brush_is_a_defect() {
        let mut map = worldspawn_with(vec![cube_brush(DVec3::ZERO, 64.0, "stone")]);
        let mut kvs = map::KeyValues::new();
        kvs.set("classname", "func_rotating");
        map.entities.push(map::Entity {
            key_values: kvs,
            brushes: Some(vec![cube_brush(DVec3::ZERO, 4.0, "origin")]),
        });

        let err = compile_map(&map, &CsgOptions::default()).unwrap_err();
        assert!(matches!(err, CsgError::OnlyOriginBrush { entity: 1 }));
    }

    #[test]
    fn touching_cubes_lose_their_contact_faces() {
        let map = worldspawn_with(vec![
            cube_brush_minmax(DVec3::new(-64.0, -32.0, -32.0), DVec3::new(0.0, 32.0, 32.0), "a"),
            cube_brush_minmax(DVec3::new(0.0, -32.0, -32.0), DVec3::new(64.0, 32.0, 32.0), "b"),
        ]);
        let out = compile_map(&map, &CsgOptions::default()).unwrap();

        // the two flush faces at x = 0 are interior and die
        assert_eq!(out.hull_faces[0].len(), 10);
        let total_area: f64 = out.hull_faces[0].iter().map(|f| f.winding.area()).sum();
        // 2 cubes x 6 faces x 64x64, minus the two hidden contact faces
        assert!((total_area - 10.0 * 64.0 * 64.0).abs() < 1e-6);
    }

    #[test]
    fn overlapping_cubes_cull_buried_parts() {
        let map = worldspawn_with(vec![
            cube_brush(DVec3::ZERO, 64.0, "a"),
            cube_brush(DVec3::new(64.0, 0.0, 0.0), 64.0, "b"),
        ]);
        let out = compile_map(&map, &CsgOptions::default()).unwrap();

        // no face sticks into the other cube's interior
        for face in &out.hull_faces[0] {
            let center = face.winding.center();
            let inside_a = center.x.abs() < 64.0 - 1.0
                && center.y.abs() < 64.0 - 1.0
                && center.z.abs() < 64.0 - 1.0;
            let inside_b = (center.x - 64.0).abs() < 63.0
                && center.y.abs() < 63.0
                && center.z.abs() < 63.0;
            assert!(!inside_a && !inside_b, "buried face at {:?}", center);
        }
    }

    #[test]
    fn face_order_is_stable() {
        let map = worldspawn_with(vec![
            cube_brush(DVec3::ZERO, 64.0, "a"),
            cube_brush(DVec3::new(200.0, 0.0, 0.0), 64.0, "b"),
        ]);
        let a = compile_map(&map, &CsgOptions::default()).unwrap();
        let b = compile_map(&map, &CsgOptions::default()).unwrap();

        let order_a: Vec<(u16, u16, u16)> = a
            .hull_faces[0]
            .iter()
            .map(|f| (f.entity, f.brush, f.plane))
            .collect();
        let order_b: Vec<(u16, u16, u16)> = b
            .hull_faces[0]
            .iter()
            .map(|f| (f.entity, f.brush, f.plane))
            .collect();
        assert_eq!(order_a, order_b);
    }
}
