//! Radiosity patches.
//!
//! Every lit face subdivides into a grid of patches along its texture
//! axes. A patch is the unit of light transport: it has an area, a
//! centroid pulled off the walls, a reflectivity from its texture, and
//! per-style light accumulators. Patches live in one arena; faces
//! chain into it by index range.

use glam::DVec3;

use bsp::{Bsp, TEX_SPECIAL};

use crate::{math::ON_EPSILON, winding::Winding};

/// Lightmap sample pitch in world units.
pub const TEXTURE_STEP: f64 = 16.0;

/// How far a patch centroid hunts inward from the walls.
pub const PATCH_HUNT_OFFSET: f64 = 0.5;

pub const DEFAULT_CHOP: f64 = 64.0;
pub const DEFAULT_TEXCHOP: f64 = 32.0;

/// Per-style accumulated light, kept as a small sorted list because
/// nearly every patch only ever sees style 0.
#[derive(Debug, Clone, Default)]
pub struct StyleLights(Vec<(u8, DVec3)>);

impl StyleLights {
    pub fn add(&mut self, style: u8, light: DVec3) {
        match self.0.iter_mut().find(|(s, _)| *s == style) {
            Some((_, total)) => *total += light,
            None => {
                self.0.push((style, light));
                self.0.sort_by_key(|(s, _)| *s);
            }
        }
    }

    pub fn get(&self, style: u8) -> DVec3 {
        self.0
            .iter()
            .find(|(s, _)| *s == style)
            .map(|(_, l)| *l)
            .unwrap_or(DVec3::ZERO)
    }

    pub fn styles(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().map(|(s, _)| *s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, DVec3)> + '_ {
        self.0.iter().copied()
    }

    pub fn scale(&self, by: f64) -> StyleLights {
        StyleLights(self.0.iter().map(|&(s, l)| (s, l * by)).collect())
    }

    pub fn total(&self) -> DVec3 {
        self.0.iter().map(|(_, l)| *l).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Patch {
    pub face: usize,
    pub winding: Winding,
    pub area: f64,
    pub origin: DVec3,
    pub normal: DVec3,
    /// BSP leaf holding the origin; 0 means buried in solid.
    pub leaf: usize,
    pub reflectivity: DVec3,
    /// Texlight emission per unit area, with its style.
    pub base_light: DVec3,
    pub emit_style: u8,
    pub emitter_range: f64,
    pub direct: StyleLights,
    pub total: StyleLights,
}

/// The arena plus each face's patch range (a chain head + count).
#[derive(Debug, Default)]
pub struct PatchArena {
    pub patches: Vec<Patch>,
    pub face_first: Vec<u32>,
    pub face_count: Vec<u32>,
}

impl PatchArena {
    pub fn face_patches(&self, face: usize) -> &[Patch] {
        let first = self.face_first[face] as usize;
        let count = self.face_count[face] as usize;
        &self.patches[first..first + count]
    }

    pub fn face_patch_range(&self, face: usize) -> std::ops::Range<usize> {
        let first = self.face_first[face] as usize;
        first..first + self.face_count[face] as usize
    }
}

/// A texlight definition: texture name -> emission color * intensity.
pub fn texlight_table(entities: &[bsp::entities::EntityKeyValues]) -> Vec<(String, DVec3)> {
    let mut table = Vec::new();

    for entity in entities {
        if entity.classname() != "info_texlights" {
            continue;
        }
        for (key, value) in &entity.pairs {
            if key == "classname" || key == "origin" {
                continue;
            }
            let parts: Vec<f64> = value
                .split_whitespace()
                .filter_map(|v| v.parse().ok())
                .collect();
            let color = match parts.len() {
                3 => DVec3::new(parts[0], parts[1], parts[2]) / 255.0,
                4 => DVec3::new(parts[0], parts[1], parts[2]) / 255.0 * parts[3],
                _ => continue,
            };
            table.push((key.to_ascii_lowercase(), color));
        }
    }

    table
}

/// Average texture color as the bounce reflectivity, from the palette
/// when the texture is embedded; a neutral gray otherwise.
fn face_reflectivity(bsp: &Bsp, face: &bsp::Face) -> DVec3 {
    let texinfo = &bsp.texinfo[face.texinfo as usize];
    let Some(texture) = bsp.textures.get(texinfo.texture_index as usize) else {
        return DVec3::splat(0.5);
    };
    if texture.is_external() {
        return DVec3::splat(0.5);
    }

    let mut sum = DVec3::ZERO;
    let palette = &texture.palette.0;
    let pixels = &texture.mip_images[0].0;
    for &p in pixels {
        let [r, g, b] = palette[p as usize];
        sum += DVec3::new(r as f64, g as f64, b as f64) / 255.0;
    }
    sum / pixels.len().max(1) as f64
}

/// Grid subdivision of one winding along world axes in `chop` steps.
fn chop_winding(winding: Winding, chop: f64) -> Vec<Winding> {
    let mut queue = vec![winding];
    let mut done = Vec::new();

    while let Some(w) = queue.pop() {
        let bounds = w.bounds();
        let size = bounds.maxs - bounds.mins;

        let axis = crate::math::major_axis(size);
        if size[axis] <= chop + ON_EPSILON {
            done.push(w);
            continue;
        }

        // split on a chop-aligned coordinate near the middle
        let middle = (bounds.mins[axis] + bounds.maxs[axis]) * 0.5;
        let cut = (middle / chop).round() * chop;
        let cut = if cut <= bounds.mins[axis] + ON_EPSILON || cut >= bounds.maxs[axis] - ON_EPSILON
        {
            middle
        } else {
            cut
        };

        let mut normal = DVec3::ZERO;
        normal[axis] = 1.0;

        let (front, back) = w.clip(normal, cut, ON_EPSILON);
        match (front, back) {
            (Some(front), Some(back)) => {
                queue.push(front);
                queue.push(back);
            }
            (Some(w), None) | (None, Some(w)) => done.push(w),
            (None, None) => {}
        }
    }

    done
}

/// Builds the patch arena for every lit face of the world model.
pub fn make_patches(
    bsp: &Bsp,
    entities: &[bsp::entities::EntityKeyValues],
    chop: f64,
    texchop: f64,
) -> PatchArena {
    let texlights = texlight_table(entities);

    let mut arena = PatchArena {
        patches: Vec::new(),
        face_first: vec![0; bsp.faces.len()],
        face_count: vec![0; bsp.faces.len()],
    };

    let world_faces =
        bsp.models[0].first_face as usize..(bsp.models[0].first_face + bsp.models[0].face_count) as usize;

    for face_index in world_faces {
        let face = &bsp.faces[face_index];
        let texinfo = &bsp.texinfo[face.texinfo as usize];

        // sky and liquid faces take no lightmap and no patches
        if texinfo.flags & TEX_SPECIAL != 0 {
            continue;
        }

        let texture_name = bsp
            .textures
            .get(texinfo.texture_index as usize)
            .map(|t| t.texture_name.as_str().to_owned())
            .unwrap_or_default();

        let emission = texlights
            .iter()
            .find(|(name, _)| *name == texture_name)
            .map(|(_, color)| *color);

        let winding = Winding::new(
            bsp.face_vertices(face)
                .into_iter()
                .map(crate::math::to_f64)
                .collect::<Vec<DVec3>>(),
        );
        if !winding.is_valid() {
            continue;
        }

        let (normal, _) = winding.plane();
        let reflectivity = face_reflectivity(bsp, face);
        let face_chop = if emission.is_some() { texchop } else { chop };

        let pieces = chop_winding(winding.clone(), face_chop);

        arena.face_first[face_index] = arena.patches.len() as u32;
        arena.face_count[face_index] = pieces.len() as u32;

        for piece in pieces {
            let area = piece.area();
            if area < ON_EPSILON {
                continue;
            }

            // pull the centroid toward the face interior, then off the
            // wall along the normal
            let face_center = winding.center();
            let centroid = piece.center();
            let inward = (face_center - centroid).normalize_or_zero();
            let origin = centroid + inward * PATCH_HUNT_OFFSET + normal * PATCH_HUNT_OFFSET;

            let leaf = bsp.leaf_at(crate::math::to_f32(origin));

            arena.patches.push(Patch {
                face: face_index,
                winding: piece,
                area,
                origin,
                normal,
                leaf,
                reflectivity,
                base_light: emission.unwrap_or(DVec3::ZERO),
                emit_style: 0,
                emitter_range: 1.4 * area.sqrt(),
                direct: StyleLights::default(),
                total: StyleLights::default(),
            });
        }

        // count again after the area filter
        arena.face_count[face_index] =
            arena.patches.len() as u32 - arena.face_first[face_index];
    }

    arena
}

#[cfg(test)]
mod test {
    use super::*;

    fn flat_square(half: f64) -> Winding {
        Winding::new(vec![
            DVec3::new(-half, -half, 0.0),
            DVec3::new(-half, half, 0.0),
            DVec3::new(half, half, 0.0),
            DVec3::new(half, -half, 0.0),
        ])
    }

    #[test]
    fn chop_preserves_area() {
        let w = flat_square(128.0);
        let before = w.area();
        let pieces = chop_winding(w, 64.0);

        let after: f64 = pieces.iter().map(|p| p.area()).sum();
        assert!((before - after).abs() < 1e-6);
        // 256x256 face at 64 chop: a 4x4 grid
        assert_eq!(pieces.len(), 16);

        for piece in &pieces {
            let bounds = piece.bounds();
            let size = bounds.maxs - bounds.mins;
            assert!(size.x <= 64.0 + 1e-9);
            assert!(size.y <= 64.0 + 1e-9);
        }
    }

    #[test]
    fn small_face_is_one_patch() {
        let pieces = chop_winding(flat_square(16.0), 64.0);
        assert_eq!(pieces.len(), 1);
    }

    #[test]
    fn style_lights_accumulate_per_style() {
        let mut lights = StyleLights::default();
        lights.add(0, DVec3::splat(10.0));
        lights.add(2, DVec3::splat(1.0));
        lights.add(0, DVec3::splat(5.0));

        assert_eq!(lights.get(0), DVec3::splat(15.0));
        assert_eq!(lights.get(2), DVec3::splat(1.0));
        assert_eq!(lights.get(1), DVec3::ZERO);
        assert_eq!(lights.styles().collect::<Vec<u8>>(), vec![0, 2]);
        assert_eq!(lights.total(), DVec3::splat(16.0));
    }

    #[test]
    fn texlight_table_parses_info_texlights() {
        let text = "{\n\"classname\" \"info_texlights\"\n\"+0~light01\" \"255 200 100 500\"\n}\n";
        let entities = bsp::entities::parse_entities(text).unwrap();
        let table = texlight_table(&entities);

        assert_eq!(table.len(), 1);
        assert_eq!(table[0].0, "+0~light01");
        let expected = DVec3::new(255.0, 200.0, 100.0) / 255.0 * 500.0;
        assert!((table[0].1 - expected).length() < 1e-9);
    }
}
