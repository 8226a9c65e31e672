//! Lightmap sampling and storage.
//!
//! Each face samples on a 16-unit grid sized by its texel extents.
//! Samples take direct light at full resolution and gather bounced
//! light from nearby patches, blending across smoothing-group
//! neighbors so ridges and curved surfaces shade continuously. Samples
//! that land in solid nudge out along the face; ones that cannot
//! escape inherit their neighbor. Styles pack up to four maps per
//! face.

use glam::{DMat3, DVec3};

use bsp::{Bsp, Contents, TEX_SPECIAL};

use crate::{math::to_f64, threads::run_threads_on, winding::Winding};

use super::{
    lights::{self, DirectLight},
    meshtrace::ShadowMesh,
    patch::{PatchArena, TEXTURE_STEP},
    trace,
};

pub const MAX_SURFACE_EXTENT: i32 = 16;
pub const MAX_LIGHTMAP_DIM: usize = MAX_SURFACE_EXTENT as usize + 1;

#[derive(Debug, Clone)]
pub struct FaceExtents {
    pub texture_mins: [i32; 2],
    pub extents: [i32; 2],
}

impl FaceExtents {
    pub fn samples(&self) -> (usize, usize) {
        (
            (self.extents[0] / TEXTURE_STEP as i32 + 1) as usize,
            (self.extents[1] / TEXTURE_STEP as i32 + 1) as usize,
        )
    }
}

/// Texel bounds of a face from its vertices and texinfo.
pub fn face_extents(bsp: &Bsp, face_index: usize) -> FaceExtents {
    let face = &bsp.faces[face_index];
    let texinfo = &bsp.texinfo[face.texinfo as usize];
    let vertices = bsp.face_vertices(face);

    let mut mins = [f64::INFINITY; 2];
    let mut maxs = [f64::NEG_INFINITY; 2];

    for v in vertices {
        let v = to_f64(v);
        let s = v.dot(to_f64(texinfo.u)) + texinfo.u_offset as f64;
        let t = v.dot(to_f64(texinfo.v)) + texinfo.v_offset as f64;
        mins[0] = mins[0].min(s);
        mins[1] = mins[1].min(t);
        maxs[0] = maxs[0].max(s);
        maxs[1] = maxs[1].max(t);
    }

    let mut texture_mins = [0i32; 2];
    let mut extents = [0i32; 2];
    for axis in 0..2 {
        let low = (mins[axis] / TEXTURE_STEP).floor() as i32 * TEXTURE_STEP as i32;
        let high = (maxs[axis] / TEXTURE_STEP).ceil() as i32 * TEXTURE_STEP as i32;
        texture_mins[axis] = low;
        extents[axis] = high - low;
    }

    FaceExtents {
        texture_mins,
        extents,
    }
}

/// Inverse texture projection: the world point for a given (s, t) on
/// the face plane.
struct TexelToWorld {
    matrix: DMat3,
    offsets: DVec3,
}

impl TexelToWorld {
    fn new(bsp: &Bsp, face_index: usize) -> Self {
        let face = &bsp.faces[face_index];
        let texinfo = &bsp.texinfo[face.texinfo as usize];
        let plane = &bsp.planes[face.plane as usize];

        let mut normal = to_f64(plane.normal);
        let mut dist = plane.distance as f64;
        if face.side != 0 {
            normal = -normal;
            dist = -dist;
        }

        // rows: dot(P, u) = s - u_offset; dot(P, v) = t - v_offset;
        // dot(P, n) = dist
        let rows = DMat3::from_cols(to_f64(texinfo.u), to_f64(texinfo.v), normal).transpose();

        Self {
            matrix: rows.inverse(),
            offsets: DVec3::new(texinfo.u_offset as f64, texinfo.v_offset as f64, -dist),
        }
    }

    fn world_at(&self, s: f64, t: f64) -> DVec3 {
        self.matrix * (DVec3::new(s, t, 0.0) - self.offsets)
    }
}

pub struct RadParams {
    pub threads: usize,
    pub estimate: bool,
    pub fade: f64,
    pub smooth_cos: f64,
    pub chop: f64,
    pub gamma: f64,
    pub scale: f64,
    pub ambient: DVec3,
    pub minlight: u8,
    pub soft_sky: bool,
    pub blur: f64,
    /// 2x2 supersampling.
    pub extra: bool,
}

/// One face's sampled lightmaps, one sample array per style.
struct FaceLight {
    styles: Vec<u8>,
    /// styles.len() * width * height RGB samples.
    samples: Vec<DVec3>,
    width: usize,
    height: usize,
}

fn face_normal(bsp: &Bsp, face_index: usize) -> DVec3 {
    let face = &bsp.faces[face_index];
    let plane = &bsp.planes[face.plane as usize];
    let normal = to_f64(plane.normal);
    if face.side != 0 {
        -normal
    } else {
        normal
    }
}

fn sample_one_face(
    bsp: &Bsp,
    arena: &PatchArena,
    lights: &[DirectLight],
    meshes: &[ShadowMesh],
    params: &RadParams,
    face_index: usize,
) -> Option<FaceLight> {
    let face = &bsp.faces[face_index];
    let texinfo = &bsp.texinfo[face.texinfo as usize];
    if texinfo.flags & TEX_SPECIAL != 0 {
        return None;
    }

    let extents = face_extents(bsp, face_index);
    let (width, height) = extents.samples();
    if width > MAX_LIGHTMAP_DIM || height > MAX_LIGHTMAP_DIM {
        log::warn!(
            "Face {} has oversized lightmap ({}x{}); check texture scales",
            face_index,
            width,
            height
        );
        return None;
    }

    let to_world = TexelToWorld::new(bsp, face_index);
    let normal = face_normal(bsp, face_index);

    let face_winding = Winding::new(
        bsp.face_vertices(face)
            .into_iter()
            .map(to_f64)
            .collect::<Vec<DVec3>>(),
    );
    let face_center = face_winding.center();

    // patches to gather bounced light from: this face's, plus those of
    // smoothing-group neighbors
    let gather_range = params.chop * 2.5;
    let gather_patches: Vec<usize> = arena
        .patches
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            p.normal.dot(normal) >= params.smooth_cos
                && (p.origin - face_center).length() < gather_range + 256.0
        })
        .map(|(i, _)| i)
        .collect();

    // sub-sample offsets for -extra
    let offsets: &[(f64, f64)] = if params.extra {
        &[(-0.25, -0.25), (0.25, -0.25), (-0.25, 0.25), (0.25, 0.25)]
    } else {
        &[(0.0, 0.0)]
    };

    let mut positions: Vec<Option<DVec3>> = Vec::with_capacity(width * height);
    for ty in 0..height {
        for tx in 0..width {
            let s = (extents.texture_mins[0] + tx as i32 * TEXTURE_STEP as i32) as f64;
            let t = (extents.texture_mins[1] + ty as i32 * TEXTURE_STEP as i32) as f64;
            let p = to_world.world_at(s, t) + normal * 1.0;

            // nudge buried samples toward the face center
            let inward = (face_center + normal * 1.0 - p).normalize_or_zero();
            positions.push(trace::snap_to_open(bsp, p, inward * 2.0, 8));
        }
    }

    // styled accumulation
    let mut styles: Vec<u8> = vec![0];
    let mut samples: Vec<DVec3> = vec![DVec3::ZERO; width * height];

    let mut style_slot = |styles: &mut Vec<u8>, samples: &mut Vec<DVec3>, style: u8| -> Option<usize> {
        if let Some(slot) = styles.iter().position(|&s| s == style) {
            return Some(slot);
        }
        if styles.len() >= 4 {
            return None;
        }
        styles.push(style);
        samples.extend(std::iter::repeat(DVec3::ZERO).take(width * height));
        Some(styles.len() - 1)
    };

    for index in 0..width * height {
        let Some(base_position) = positions[index] else {
            continue;
        };

        for &(ds, dt) in offsets {
            let position = base_position
                + to_world.matrix * DVec3::new(ds * TEXTURE_STEP, dt * TEXTURE_STEP, 0.0);
            let weight = 1.0 / offsets.len() as f64;

            // phong: blend the sample normal from nearby patch normals
            let mut blended_normal = normal;
            {
                let mut accum = normal * 0.5;
                for &pi in &gather_patches {
                    let patch = &arena.patches[pi];
                    let d = (patch.origin - position).length();
                    if d < gather_range {
                        accum += patch.normal / (d * d + TEXTURE_STEP);
                    }
                }
                if accum.length() > 1e-9 {
                    blended_normal = accum.normalize();
                }
            }

            // direct light per style
            for light in lights {
                let contribution = match (&light.kind, params.soft_sky) {
                    (lights::LightKind::Sky { direction }, true) => {
                        let directions = lights::soft_sky_directions(*direction, 5.0);
                        let scale = 1.0 / directions.len() as f64;
                        directions
                            .into_iter()
                            .map(|dir| {
                                let soft = DirectLight {
                                    kind: lights::LightKind::Sky { direction: dir },
                                    ..light.clone()
                                };
                                lights::light_at(
                                    &soft,
                                    bsp,
                                    meshes,
                                    position,
                                    blended_normal,
                                    params.fade,
                                ) * scale
                            })
                            .sum()
                    }
                    _ => lights::light_at(light, bsp, meshes, position, blended_normal, params.fade),
                };
                if contribution == DVec3::ZERO {
                    continue;
                }
                if let Some(slot) = style_slot(&mut styles, &mut samples, light.style) {
                    samples[slot * width * height + index] += contribution * weight;
                }
            }

            // bounced light gathered from patches
            let mut gathered: Vec<(u8, DVec3)> = Vec::new();
            let mut total_weight = 0.0;
            for &pi in &gather_patches {
                let patch = &arena.patches[pi];
                let d = (patch.origin - position).length();
                if d >= gather_range {
                    continue;
                }
                let w = 1.0 / (d * d + TEXTURE_STEP);
                total_weight += w;
                for (style, light) in patch.total.iter() {
                    match gathered.iter_mut().find(|(s, _)| *s == style) {
                        Some((_, sum)) => *sum += light * w,
                        None => gathered.push((style, light * w)),
                    }
                }
            }
            if total_weight > 0.0 {
                for (style, sum) in gathered {
                    if let Some(slot) = style_slot(&mut styles, &mut samples, style) {
                        samples[slot * width * height + index] +=
                            sum / total_weight * weight;
                    }
                }
            }
        }
    }

    // buried samples inherit their nearest sampled neighbor
    for slot in 0..styles.len() {
        let base = slot * width * height;
        for index in 0..width * height {
            if positions[index].is_some() {
                continue;
            }
            let (x, y) = (index % width, index / width);
            let neighbor = [(1i64, 0i64), (-1, 0), (0, 1), (0, -1)]
                .iter()
                .filter_map(|&(dx, dy)| {
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        return None;
                    }
                    let n = ny as usize * width + nx as usize;
                    positions[n].is_some().then_some(n)
                })
                .next();
            if let Some(n) = neighbor {
                samples[base + index] = samples[base + n];
            }
        }
    }

    Some(FaceLight {
        styles,
        samples,
        width,
        height,
    })
}

/// Box blur over one style's sample grid.
fn blur_samples(samples: &mut [DVec3], width: usize, height: usize, radius: f64) {
    if radius <= 0.0 {
        return;
    }
    let r = radius.round() as i64;
    let source = samples.to_vec();

    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut sum = DVec3::ZERO;
            let mut count = 0.0;
            for dy in -r..=r {
                for dx in -r..=r {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    sum += source[ny as usize * width as usize + nx as usize];
                    count += 1.0;
                }
            }
            samples[y as usize * width + x as usize] = sum / count;
        }
    }
}

/// Samples every world face and writes the lighting lump. Returns the
/// extents table for the `.ext` side channel.
pub fn light_all_faces(
    bsp: &mut Bsp,
    arena: &PatchArena,
    lights: &[DirectLight],
    meshes: &[ShadowMesh],
    params: &RadParams,
) -> Vec<bsp::ext::FaceExtents> {
    let face_count = bsp.faces.len();

    let lit: Vec<Option<FaceLight>> = {
        let bsp_ref: &Bsp = bsp;
        run_threads_on(params.threads, face_count, params.estimate, |face_index| {
            sample_one_face(bsp_ref, arena, lights, meshes, params, face_index)
        })
    };

    let mut extents_table = Vec::with_capacity(face_count);
    bsp.lightmap.clear();

    for (face_index, face_light) in lit.into_iter().enumerate() {
        let extents = face_extents(bsp, face_index);
        extents_table.push(bsp::ext::FaceExtents {
            texture_mins: extents.texture_mins,
            extents: extents.extents,
        });

        // `%NN` texture names raise the floor for their own face
        let texture_minlight = {
            let texinfo = &bsp.texinfo[bsp.faces[face_index].texinfo as usize];
            bsp.textures
                .get(texinfo.texture_index as usize)
                .and_then(|t| t.texture_name.minlight())
                .unwrap_or(0)
        };
        let minlight = params.minlight.max(texture_minlight) as f64;

        let face = &mut bsp.faces[face_index];

        let Some(mut face_light) = face_light else {
            face.styles = [255; 4];
            face.lightmap_offset = -1;
            continue;
        };

        face.lightmap_offset = (bsp.lightmap.len() * 3) as i32;
        face.styles = [255; 4];

        for (slot, &style) in face_light.styles.iter().enumerate() {
            face.styles[slot] = style;

            let base = slot * face_light.width * face_light.height;
            let count = face_light.width * face_light.height;
            blur_samples(
                &mut face_light.samples[base..base + count],
                face_light.width,
                face_light.height,
                params.blur,
            );

            for sample in &face_light.samples[base..base + count] {
                // ambient floor, scale, gamma, then the 255 clamp
                let mut value = (*sample + params.ambient) * params.scale;
                if params.gamma > 0.0 && (params.gamma - 1.0).abs() > 1e-9 {
                    value = DVec3::new(
                        (value.x / 255.0).powf(1.0 / params.gamma) * 255.0,
                        (value.y / 255.0).powf(1.0 / params.gamma) * 255.0,
                        (value.z / 255.0).powf(1.0 / params.gamma) * 255.0,
                    );
                }
                bsp.lightmap.push([
                    value.x.max(minlight).clamp(0.0, 255.0) as u8,
                    value.y.max(minlight).clamp(0.0, 255.0) as u8,
                    value.z.max(minlight).clamp(0.0, 255.0) as u8,
                ]);
            }
        }
    }

    extents_table
}

/// True when a leaf-sized probe can see any sky face; used by the
/// tests to sanity-check sky lighting.
pub fn sees_sky(bsp: &Bsp, point: DVec3, direction: DVec3) -> bool {
    matches!(
        trace::test_line(bsp, point, point - direction * 8192.0),
        trace::TraceResult::Open(Contents::Sky)
    )
}
