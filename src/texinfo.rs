//! Texinfo and texture tables built during CSG.
//!
//! Both are deduplicating registries handing out indices into the lumps
//! they eventually become.

use std::collections::HashMap;

use glam::Vec3;

use wad::{MipTex, TextureName, Wad};

/// Bit-exact dedup key for a texinfo entry.
fn texinfo_key(ti: &bsp::TexInfo) -> [u32; 10] {
    [
        ti.u.x.to_bits(),
        ti.u.y.to_bits(),
        ti.u.z.to_bits(),
        ti.u_offset.to_bits(),
        ti.v.x.to_bits(),
        ti.v.y.to_bits(),
        ti.v.z.to_bits(),
        ti.v_offset.to_bits(),
        ti.texture_index,
        ti.flags,
    ]
}

#[derive(Default)]
pub struct TexInfoRegistry {
    entries: Vec<bsp::TexInfo>,
    lookup: HashMap<[u32; 10], u16>,
}

impl TexInfoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find_or_insert(&mut self, ti: bsp::TexInfo) -> u16 {
        let key = texinfo_key(&ti);
        if let Some(&index) = self.lookup.get(&key) {
            return index;
        }

        let index = self.entries.len() as u16;
        self.entries.push(ti);
        self.lookup.insert(key, index);
        index
    }

    pub fn get(&self, index: u16) -> &bsp::TexInfo {
        &self.entries[index as usize]
    }

    pub fn into_entries(self) -> Vec<bsp::TexInfo> {
        self.entries
    }
}

/// Projection axes for one brush side in Valve-220 texture format.
pub struct TextureAxes {
    pub u: Vec3,
    pub u_offset: f32,
    pub v: Vec3,
    pub v_offset: f32,
}

impl TextureAxes {
    pub fn from_side(side: &map::BrushSide) -> Self {
        // scale divides the axis: texel = dot(point, axis) / scale + offset
        let u_scale = if side.u_scale == 0.0 { 1.0 } else { side.u_scale };
        let v_scale = if side.v_scale == 0.0 { 1.0 } else { side.v_scale };

        Self {
            u: Vec3::new(
                (side.u.x / u_scale) as f32,
                (side.u.y / u_scale) as f32,
                (side.u.z / u_scale) as f32,
            ),
            u_offset: side.u.w as f32,
            v: Vec3::new(
                (side.v.x / v_scale) as f32,
                (side.v.y / v_scale) as f32,
                (side.v.z / v_scale) as f32,
            ),
            v_offset: side.v.w as f32,
        }
    }
}

#[derive(Default)]
pub struct TextureTable {
    textures: Vec<MipTex>,
    lookup: HashMap<TextureName, u32>,
}

impl TextureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `name`, pulling the texture out of the loaded WADs on
    /// first use. Unknown textures get a placeholder reference entry so
    /// the compile can continue; the engine will still want the WAD.
    pub fn find_or_insert(&mut self, name: TextureName, wads: &[Wad]) -> u32 {
        if let Some(&index) = self.lookup.get(&name) {
            return index;
        }

        let miptex = wads
            .iter()
            .find_map(|wad| wad.find(&name))
            .map(|entry| {
                let tex = &entry.miptex;
                MipTex::new_external(name, (tex.width, tex.height))
            })
            .unwrap_or_else(|| {
                log::warn!("Texture `{}` not found in any wad", name);
                MipTex::new_external(name, (64, 64))
            });

        let index = self.textures.len() as u32;
        self.textures.push(miptex);
        self.lookup.insert(name, index);
        index
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn into_textures(self) -> Vec<MipTex> {
        self.textures
    }
}
