//! RAD stage: a compiled, vis'd map in, lightmaps out.
//!
//! Faces subdivide into patches, direct light seeds them, form-factor
//! transfers push light around for the configured bounces, and the
//! lightmap pass samples the result on the 16-unit grid. Opaque brush
//! entities become triangle shadow meshes.

use std::path::Path;

use glam::{DVec2, DVec3};

use bsp::Bsp;

use crate::math::to_f64;

pub mod compress;
pub mod lightmap;
pub mod lights;
pub mod meshtrace;
pub mod patch;
pub mod trace;
pub mod transfers;
pub mod vismatrix;

use compress::{FloatFormat, VectorFormat};
use transfers::TransferFormat;

#[derive(Debug, Clone)]
pub struct RadOptions {
    pub threads: usize,
    pub estimate: bool,
    pub bounces: usize,
    pub chop: f64,
    pub texchop: f64,
    /// Smoothing threshold in degrees.
    pub smooth: f64,
    pub gamma: f64,
    pub scale: f64,
    pub ambient: DVec3,
    pub minlight: u8,
    pub soft_sky: bool,
    pub blur: f64,
    pub fade: f64,
    pub extra: bool,
    pub rgb_transfers: bool,
    pub transfer_compress: FloatFormat,
    pub rgb_transfer_compress: VectorFormat,
    /// Shadow meshes keep affecting bounced light, not just direct.
    pub custom_shadow_with_bounce: bool,
    /// Reuse `<map>.inc` between runs.
    pub incremental: bool,
}

impl Default for RadOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            estimate: false,
            bounces: 8,
            chop: patch::DEFAULT_CHOP,
            texchop: patch::DEFAULT_TEXCHOP,
            smooth: 50.0,
            gamma: 1.0,
            scale: 1.0,
            ambient: DVec3::ZERO,
            minlight: 0,
            soft_sky: false,
            blur: 0.0,
            fade: 1.0,
            extra: false,
            rgb_transfers: false,
            transfer_compress: FloatFormat::Float16,
            rgb_transfer_compress: VectorFormat::Vector32,
            custom_shadow_with_bounce: false,
            incremental: false,
        }
    }
}

impl RadOptions {
    pub fn transfer_format(&self) -> TransferFormat {
        if self.rgb_transfers {
            TransferFormat::Rgb(self.rgb_transfer_compress)
        } else {
            TransferFormat::Scalar(self.transfer_compress)
        }
    }
}

/// Builds shadow meshes from brush entities flagged opaque
/// (`zhlt_lightflags` bit 2), fan-triangulating their model faces.
pub fn opaque_entity_meshes(bsp: &Bsp) -> eyre::Result<Vec<meshtrace::ShadowMesh>> {
    let entities = bsp::entities::parse_entities(&bsp.entities)?;
    let mut meshes = Vec::new();

    for entity in &entities {
        let opaque = entity
            .get("zhlt_lightflags")
            .and_then(|f| f.parse::<u32>().ok())
            .is_some_and(|f| f & 2 != 0);
        if !opaque {
            continue;
        }

        let Some(model_index) = entity
            .get("model")
            .and_then(|m| m.strip_prefix('*'))
            .and_then(|m| m.parse::<usize>().ok())
        else {
            continue;
        };
        let Some(model) = bsp.models.get(model_index) else {
            continue;
        };

        let mut triangles = Vec::new();
        for face_index in
            model.first_face as usize..(model.first_face + model.face_count) as usize
        {
            let face = &bsp.faces[face_index];
            let texinfo = &bsp.texinfo[face.texinfo as usize];
            let vertices = bsp.face_vertices(face);

            let uv = |v: glam::Vec3| {
                DVec2::new(
                    (v.dot(texinfo.u) + texinfo.u_offset) as f64,
                    (v.dot(texinfo.v) + texinfo.v_offset) as f64,
                )
            };

            for i in 1..vertices.len().saturating_sub(1) {
                triangles.push(meshtrace::MeshTriangle {
                    vertices: [
                        to_f64(vertices[0]),
                        to_f64(vertices[i]),
                        to_f64(vertices[i + 1]),
                    ],
                    uvs: [uv(vertices[0]), uv(vertices[i]), uv(vertices[i + 1])],
                });
            }
        }

        if triangles.is_empty() {
            continue;
        }

        // transparent textures carry a per-texel cutout mask: palette
        // index 255 is the hole
        let alpha = bsp
            .textures
            .iter()
            .find(|t| {
                t.texture_name.is_transparent_or_decal() && !t.is_external()
            })
            .map(|t| meshtrace::AlphaMask {
                width: t.width as usize,
                height: t.height as usize,
                opaque: t.mip_images[0].0.iter().map(|&p| p != 255).collect(),
            });

        meshes.push(meshtrace::ShadowMesh::new(triangles, alpha));
    }

    Ok(meshes)
}

pub struct RadSummary {
    pub patches: usize,
    pub transfer_entries: usize,
    pub lightmap_samples: usize,
    pub extents: Vec<bsp::ext::FaceExtents>,
}

/// The whole solve over an in-memory map. `cache_path` enables the
/// incremental transfer cache.
pub fn compile(
    bsp: &mut Bsp,
    options: &RadOptions,
    cache_path: Option<&Path>,
) -> eyre::Result<RadSummary> {
    let entities = bsp::entities::parse_entities(&bsp.entities)?;

    let lights = lights::parse_lights(&entities);
    let texlights = patch::texlight_table(&entities);
    if lights.is_empty() && texlights.is_empty() {
        log::warn!("No lights in this map; output will be minlight only");
    }

    let meshes = opaque_entity_meshes(bsp)?;

    let mut arena = patch::make_patches(bsp, &entities, options.chop, options.texchop);
    log::info!("{} patches", arena.patches.len());

    let format = options.transfer_format();

    let cached = match (options.incremental, cache_path) {
        (true, Some(path)) => transfers::read_transfer_cache(path, arena.patches.len())
            .filter(|t| t.format == format),
        _ => None,
    };

    let transfer_list = match cached {
        Some(t) => {
            log::info!("Reusing incremental transfer cache");
            t
        }
        None => {
            // bounce shadow tests only see the meshes when asked to
            let bounce_meshes: &[meshtrace::ShadowMesh] = if options.custom_shadow_with_bounce {
                &meshes
            } else {
                &[]
            };
            let matrix = vismatrix::build(
                bsp,
                &arena,
                bounce_meshes,
                options.threads,
                options.estimate,
            );
            log::info!(
                "visibility matrix: {:.1} megs",
                matrix.memory_bytes() as f64 / (1024.0 * 1024.0)
            );
            transfers::make_transfers(&arena, &matrix, format, options.threads, options.estimate)
        }
    };
    log::info!("{} transfers", transfer_list.total_entries());

    match (options.incremental, cache_path) {
        (true, Some(path)) => transfers::write_transfer_cache(path, &transfer_list)?,
        (false, Some(path)) => transfers::remove_transfer_cache(path),
        _ => {}
    }

    lights::direct_lighting(
        &mut arena,
        &lights,
        bsp,
        &meshes,
        options.fade,
        options.soft_sky,
    );

    transfers::bounce_light(
        &mut arena,
        &transfer_list,
        options.bounces,
        options.threads,
        options.estimate,
    );

    let params = lightmap::RadParams {
        threads: options.threads,
        estimate: options.estimate,
        fade: options.fade,
        smooth_cos: options.smooth.to_radians().cos(),
        chop: options.chop,
        gamma: options.gamma,
        scale: options.scale,
        ambient: options.ambient,
        minlight: options.minlight,
        soft_sky: options.soft_sky,
        blur: options.blur,
        extra: options.extra,
    };

    let extents = lightmap::light_all_faces(bsp, &arena, &lights, &meshes, &params);

    bsp.check_limits()?;

    Ok(RadSummary {
        patches: arena.patches.len(),
        transfer_entries: transfer_list.total_entries(),
        lightmap_samples: bsp.lightmap.len(),
        extents,
    })
}

pub fn run(map_path: &Path, options: &RadOptions) -> eyre::Result<RadSummary> {
    let bsp_path = map_path.with_extension("bsp");
    let mut bsp = Bsp::from_file(&bsp_path)?;

    let cache_path = map_path.with_extension("inc");
    let summary = compile(&mut bsp, options, Some(&cache_path))?;

    bsp::ext::write_extent_file(map_path.with_extension("ext"), &summary.extents)?;
    bsp.write_to_file(&bsp_path)?;

    log::info!(
        "hlrad: {} patches, {} transfers, {} lightmap samples",
        summary.patches,
        summary.transfer_entries,
        summary.lightmap_samples
    );

    Ok(summary)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bspbuild::{compile as bsp_compile, BspOptions};
    use crate::csg::test_support::{hollow_box, point_entity, worldspawn_with};
    use crate::csg::{compile_map, CsgOptions};
    use crate::rad::patch::StyleLights;

    fn lit_room(light_value: &str) -> Bsp {
        let mut map = worldspawn_with(hollow_box(
            DVec3::splat(-128.0),
            DVec3::splat(128.0),
            16.0,
            "stone",
        ));
        map.entities.push(point_entity(
            "light",
            DVec3::new(0.0, 0.0, 0.0),
            &[("_light", light_value)],
        ));
        map.entities
            .push(point_entity("info_player_start", DVec3::new(0.0, 0.0, -100.0), &[]));

        let out = compile_map(&map, &CsgOptions::default()).unwrap();
        let mut bsp = out.bsp;
        bsp_compile(&mut bsp, &out.hull_faces, &BspOptions::default(), None).unwrap();
        bsp
    }

    #[test]
    fn lit_room_produces_lightmaps() {
        let mut bsp = lit_room("255 255 255 2000000");
        let summary = compile(&mut bsp, &RadOptions::default(), None).unwrap();

        assert!(summary.patches > 0);
        assert!(summary.lightmap_samples > 0);
        assert_eq!(bsp.lightmap.len(), summary.lightmap_samples);

        // something actually got lit
        let max = bsp
            .lightmap
            .iter()
            .map(|rgb| rgb[0].max(rgb[1]).max(rgb[2]))
            .max()
            .unwrap();
        assert!(max > 0);

        // styles on lit faces start with the base style
        let lit_face = bsp.faces.iter().find(|f| f.lightmap_offset >= 0).unwrap();
        assert_eq!(lit_face.styles[0], 0);
    }

    #[test]
    fn zero_bounces_is_direct_only() {
        let mut direct_bsp = lit_room("255 255 255 2000000");
        compile(
            &mut direct_bsp,
            &RadOptions {
                bounces: 0,
                ..Default::default()
            },
            None,
        )
        .unwrap();

        let mut bounced_bsp = lit_room("255 255 255 2000000");
        compile(
            &mut bounced_bsp,
            &RadOptions {
                bounces: 4,
                ..Default::default()
            },
            None,
        )
        .unwrap();

        // bounced light can only add energy
        let sum = |bsp: &Bsp| -> u64 {
            bsp.lightmap
                .iter()
                .map(|rgb| rgb[0] as u64 + rgb[1] as u64 + rgb[2] as u64)
                .sum()
        };
        assert!(sum(&bounced_bsp) >= sum(&direct_bsp));
    }

    #[test]
    fn bounce_energy_is_bounded_by_reflectivity() {
        // direct energy E, reflectivity r: total bounced <= E * r/(1-r)
        let mut bsp = lit_room("255 255 255 2000000");
        let entities = bsp::entities::parse_entities(&bsp.entities).unwrap();

        let mut arena = patch::make_patches(&bsp, &entities, 64.0, 32.0);
        let lights = lights::parse_lights(&entities);
        lights::direct_lighting(&mut arena, &lights, &bsp, &[], 1.0, false);

        let matrix = vismatrix::build(&bsp, &arena, &[], 1, false);
        let transfer_list = transfers::make_transfers(
            &arena,
            &matrix,
            TransferFormat::Scalar(FloatFormat::Float32),
            1,
            false,
        );
        transfers::bounce_light(&mut arena, &transfer_list, 8, 1, false);

        let energy = |get: &dyn Fn(&patch::Patch) -> StyleLights| -> f64 {
            arena
                .patches
                .iter()
                .map(|p| {
                    let l = get(p).total();
                    (l.x + l.y + l.z) * p.area
                })
                .sum()
        };

        let direct = energy(&|p| p.direct.clone());
        let bounced = energy(&|p| p.total.clone());

        assert!(direct > 0.0);
        // reflectivity 0.5: the geometric series converges well under
        // the direct energy even with form-factor slack
        assert!(bounced > 0.0);
        assert!(bounced < direct * 1.5);
    }

    #[test]
    fn inverse_square_attenuation() {
        let mut bsp = lit_room("255 255 255 2000000");
        compile(
            &mut bsp,
            &RadOptions {
                bounces: 0,
                ..Default::default()
            },
            None,
        )
        .unwrap();

        // the floor is flat and evenly textured; a sample under the
        // light is brighter than one off to the side by the
        // inverse-square ratio of their distances to the light
        let entities = bsp::entities::parse_entities(&bsp.entities).unwrap();
        let mut arena = patch::make_patches(&bsp, &entities, 64.0, 32.0);
        let lights = lights::parse_lights(&entities);
        lights::direct_lighting(&mut arena, &lights, &bsp, &[], 1.0, false);

        let floor_patches: Vec<&patch::Patch> = arena
            .patches
            .iter()
            .filter(|p| p.normal.z > 0.9 && p.origin.z < -120.0)
            .collect();
        assert!(floor_patches.len() >= 2);

        let light_origin = DVec3::ZERO;
        for patch in floor_patches {
            let direct = patch.direct.get(0);
            if direct == DVec3::ZERO {
                continue;
            }
            let delta = light_origin - patch.origin;
            let expected =
                2_000_000.0 * delta.normalize().dot(patch.normal) / delta.length_squared();
            let ratio = direct.x / expected;
            assert!(
                (ratio - 1.0).abs() < 0.01,
                "patch at {:?}: {} vs {}",
                patch.origin,
                direct.x,
                expected
            );
        }
    }

    #[test]
    fn incremental_cache_round_trips() {
        let dir = std::env::temp_dir().join("hlt_rad_inc");
        std::fs::create_dir_all(&dir).unwrap();
        let cache = dir.join("room.inc");
        let _ = std::fs::remove_file(&cache);

        let options = RadOptions {
            incremental: true,
            bounces: 1,
            ..Default::default()
        };

        let mut first = lit_room("255 255 255 2000000");
        compile(&mut first, &options, Some(&cache)).unwrap();
        assert!(cache.exists());

        let mut second = lit_room("255 255 255 2000000");
        compile(&mut second, &options, Some(&cache)).unwrap();

        assert_eq!(first.write_to_bytes(), second.write_to_bytes());
    }
}
