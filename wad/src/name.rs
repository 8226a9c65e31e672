//! Texture names and the tool-texture taxonomy.
//!
//! WAD texture names are case-insensitive, stored lower-case: 15 usable
//! bytes plus a NUL that is always present. The name decides how the
//! compilers treat the face (clip, sky, null, hint, ...), so the whole
//! classification lives here next to the storage type.

use std::fmt::{self, Display, Write as FmtWrite};

use crate::constants::{
    EMBEDDED_LIGHTMAP_INDEX_DIGITS, EMBEDDED_LIGHTMAP_INDEX_START, MAX_TEXTURE_NAME_LENGTH,
    TEXTURE_NAME_BYTES,
};

#[derive(Debug, thiserror::Error)]
pub enum TextureNameError {
    #[error("texture name `{0}` is longer than 15 characters")]
    TooLong(String),
    #[error("texture name contains a NUL character")]
    EmbeddedNul,
    #[error("texture name is not valid UTF-8")]
    NotUtf8,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureName([u8; TEXTURE_NAME_BYTES]);

impl TextureName {
    pub fn new(s: &str) -> Result<Self, TextureNameError> {
        if s.len() > MAX_TEXTURE_NAME_LENGTH {
            return Err(TextureNameError::TooLong(s.to_owned()));
        }
        if s.contains('\0') {
            return Err(TextureNameError::EmbeddedNul);
        }

        let mut units = [0u8; TEXTURE_NAME_BYTES];
        units[..s.len()].copy_from_slice(s.as_bytes());
        units.iter_mut().for_each(|c| *c = c.to_ascii_lowercase());

        Ok(Self(units))
    }

    /// Reinterprets 16 bytes read from a file. Junk after the first NUL
    /// is zeroed (some WAD editors leave it behind); upper-case ASCII is
    /// lowered. Fails if there is no terminating NUL at all or the name
    /// is not UTF-8.
    pub fn from_bytes(bytes: [u8; TEXTURE_NAME_BYTES]) -> Result<Self, TextureNameError> {
        let mut units = bytes;
        let mut reached_nul = false;

        for c in units.iter_mut() {
            reached_nul |= *c == 0;
            if reached_nul {
                *c = 0;
            } else {
                *c = c.to_ascii_lowercase();
            }
        }

        if !reached_nul {
            return Err(TextureNameError::TooLong(
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }

        let len = units.iter().position(|&c| c == 0).unwrap();
        std::str::from_utf8(&units[..len]).map_err(|_| TextureNameError::NotUtf8)?;

        Ok(Self(units))
    }

    pub fn as_bytes(&self) -> &[u8; TEXTURE_NAME_BYTES] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.iter().position(|&c| c == 0).unwrap_or(TEXTURE_NAME_BYTES)
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    pub fn as_str(&self) -> &str {
        // checked at construction
        std::str::from_utf8(&self.0[..self.len()]).unwrap()
    }

    fn equals(&self, s: &str) -> bool {
        self.as_str() == s
    }

    fn has_prefix(&self, p: &str) -> bool {
        self.as_str().starts_with(p)
    }

    fn has_suffix(&self, p: &str) -> bool {
        self.as_str().ends_with(p)
    }

    fn byte(&self, i: usize) -> u8 {
        self.0[i]
    }

    // Content-override textures (contentwater on a solid texture etc.)

    pub fn is_content_empty(&self) -> bool {
        self.equals("contentempty")
    }

    pub fn is_content_solid(&self) -> bool {
        self.equals("contentsolid")
    }

    pub fn is_content_water(&self) -> bool {
        self.equals("contentwater")
    }

    pub fn is_content_sky(&self) -> bool {
        self.equals("contentsky")
    }

    pub fn is_any_content_override(&self) -> bool {
        self.has_prefix("cont")
            && (self.is_content_empty()
                || self.is_content_solid()
                || self.is_content_water()
                || self.is_content_sky())
    }

    pub fn is_aaatrigger(&self) -> bool {
        self.equals("aaatrigger")
    }

    pub fn is_origin(&self) -> bool {
        self.equals("origin")
    }

    /// Like ORIGIN, but defines a grid-snapped bounding box for an
    /// entity with off-grid geometry.
    pub fn is_bounding_box(&self) -> bool {
        self.equals("boundingbox")
    }

    pub fn is_ordinary_sky(&self) -> bool {
        self.equals("sky")
    }

    /// 3D-skybox marker used with the Spirit env_sky entity.
    pub fn is_env_sky(&self) -> bool {
        self.equals("env_sky")
    }

    pub fn is_any_sky(&self) -> bool {
        self.is_ordinary_sky() || self.is_env_sky()
    }

    // Embedded lightmap textures, `__rad<texinfo>` and friends

    pub fn is_ordinary_embedded_lightmap(&self) -> bool {
        self.has_prefix("__rad")
    }

    pub fn is_transparent_embedded_lightmap(&self) -> bool {
        self.has_prefix("{_rad")
    }

    pub fn is_water_embedded_lightmap(&self) -> bool {
        self.has_prefix("!_rad")
    }

    pub fn is_any_embedded_lightmap(&self) -> bool {
        self.is_ordinary_embedded_lightmap()
            || self.is_transparent_embedded_lightmap()
            || self.is_water_embedded_lightmap()
    }

    /// The texinfo index encoded in an embedded-lightmap texture name.
    pub fn embedded_lightmap_texinfo(&self) -> Option<u32> {
        if !self.is_any_embedded_lightmap() {
            return None;
        }

        let mut result = 0u32;
        for i in 0..EMBEDDED_LIGHTMAP_INDEX_DIGITS {
            let c = self.byte(EMBEDDED_LIGHTMAP_INDEX_START + i);
            if !c.is_ascii_digit() {
                break;
            }
            result = result * 10 + (c - b'0') as u32;
        }
        Some(result)
    }

    // Bevel and hint families

    pub fn is_ordinary_bevel(&self) -> bool {
        self.equals("bevel")
    }

    pub fn is_bevelbrush(&self) -> bool {
        self.equals("bevelbrush")
    }

    pub fn is_bevel_hint(&self) -> bool {
        self.equals("bevelhint")
    }

    pub fn is_any_bevel(&self) -> bool {
        self.is_ordinary_bevel() || self.is_bevelbrush() || self.is_bevel_hint()
            || self.is_any_clip_bevel()
    }

    pub fn is_ordinary_hint(&self) -> bool {
        self.equals("hint")
    }

    pub fn is_solid_hint(&self) -> bool {
        self.equals("solidhint")
    }

    pub fn is_any_hint(&self) -> bool {
        self.is_ordinary_hint() || self.is_bevel_hint() || self.is_solid_hint()
    }

    pub fn marks_discardable_faces(&self) -> bool {
        self.is_bevel_hint() || self.is_solid_hint()
    }

    pub fn is_skip(&self) -> bool {
        self.equals("skip")
    }

    pub fn is_splitface(&self) -> bool {
        self.equals("splitface")
    }

    // Null family

    pub fn is_noclip(&self) -> bool {
        self.equals("noclip") || self.equals("nullnoclip")
    }

    pub fn is_ordinary_null(&self) -> bool {
        self.equals("null")
    }

    pub fn is_any_null(&self) -> bool {
        self.is_ordinary_null() || self.is_noclip()
    }

    // Clip family

    pub fn is_ordinary_clip(&self) -> bool {
        self.equals("clip")
    }

    pub fn is_clip_hull(&self) -> bool {
        self.has_prefix("cliphull")
            && self.byte(9) == 0
            && (b'0'..=b'3').contains(&self.byte(8))
    }

    pub fn clip_hull_number(&self) -> Option<u8> {
        if self.is_clip_hull() {
            Some(self.byte(8) - b'0')
        } else {
            None
        }
    }

    pub fn is_ordinary_clip_bevel(&self) -> bool {
        self.equals("clipbevel")
    }

    pub fn is_clip_bevel_brush(&self) -> bool {
        self.equals("clipbevelbrush")
    }

    pub fn is_any_clip_bevel(&self) -> bool {
        self.is_ordinary_clip_bevel() || self.is_clip_bevel_brush()
    }

    pub fn is_any_clip(&self) -> bool {
        self.is_ordinary_clip() || self.is_clip_hull() || self.is_any_clip_bevel()
    }

    // Liquids

    pub fn is_lava(&self) -> bool {
        self.has_prefix("!lava") || self.has_prefix("*lava")
    }

    pub fn is_slime(&self) -> bool {
        self.has_prefix("!slime") || self.has_prefix("*slime")
    }

    pub fn is_any_liquid(&self) -> bool {
        self.has_prefix("!")
            || self.has_prefix("*")
            || self.has_prefix("laser")
            || self.has_prefix("water")
    }

    pub fn is_water(&self) -> bool {
        self.is_any_liquid() && !self.is_lava() && !self.is_slime()
    }

    pub fn is_water_with_current(&self) -> bool {
        self.has_prefix("!cur")
            && ["!cur_0", "!cur_90", "!cur_180", "!cur_270", "!cur_up", "!cur_dwn"]
                .iter()
                .any(|p| self.has_prefix(p))
    }

    /// Contents offset 0..=5 for `!cur_{0,90,180,270,up,dwn}`.
    pub fn current_direction(&self) -> Option<u8> {
        if !self.is_water_with_current() {
            return None;
        }
        ["!cur_0", "!cur_90", "!cur_180", "!cur_270", "!cur_up", "!cur_dwn"]
            .iter()
            .position(|p| self.has_prefix(p))
            .map(|i| i as u8)
    }

    // Render-style prefixes

    pub fn is_transparent_or_decal(&self) -> bool {
        self.has_prefix("{")
    }

    pub fn is_translucent(&self) -> bool {
        self.has_prefix("@") || self.equals("translucent")
    }

    pub fn is_tile(&self) -> bool {
        self.has_prefix("-") && self.byte(1) != 0
    }

    pub fn is_animation_frame(&self) -> bool {
        self.has_prefix("+")
            && (self.byte(1).is_ascii_digit() || (b'a'..=b'j').contains(&self.byte(1)))
    }

    /// `(frame, alternate)` for `+N…`/`+a…` animation or `-N…` tiling names.
    pub fn animation_frame(&self) -> Option<(u8, bool)> {
        if !self.is_animation_frame() && !self.is_tile() {
            return None;
        }
        let alternate = self.byte(1) >= b'a';
        let frame = self.byte(1) - if alternate { b'a' } else { b'0' };
        Some((frame, alternate))
    }

    pub fn has_minlight(&self) -> bool {
        self.has_prefix("%") && self.byte(1).is_ascii_digit()
    }

    pub fn minlight(&self) -> Option<u8> {
        if !self.has_minlight() {
            return None;
        }
        let mut value = 0u32;
        for i in 1..4 {
            let c = self.byte(i);
            if !c.is_ascii_digit() {
                break;
            }
            value = value * 10 + (c - b'0') as u32;
        }
        Some(value.min(255) as u8)
    }

    pub fn is_hidden(&self) -> bool {
        self.has_suffix("_hidden")
    }

    /// Placeholder family emitted when compiling with -notextures.
    pub fn is_default(&self) -> bool {
        self.has_prefix("default")
    }
}

impl fmt::Debug for TextureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TextureName").field(&self.as_str()).finish()
    }
}

impl Display for TextureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.as_str().chars() {
            f.write_char(c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn n(s: &str) -> TextureName {
        TextureName::new(s).unwrap()
    }

    #[test]
    fn lowercased_on_construction() {
        assert_eq!(n("AAATRIGGER").as_str(), "aaatrigger");
        assert!(n("CLIP").is_any_clip());
    }

    #[test]
    fn too_long_rejected() {
        assert!(TextureName::new("0123456789abcdef").is_err());
        assert!(TextureName::new("0123456789abcde").is_ok());
    }

    #[test]
    fn junk_after_nul_normalized() {
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(b"SKY\0");
        bytes[5] = 0xAA;
        let name = TextureName::from_bytes(bytes).unwrap();
        assert_eq!(name.as_str(), "sky");
        assert!(name.is_any_sky());
    }

    #[test]
    fn missing_nul_rejected() {
        let bytes = *b"0123456789abcdef";
        assert!(TextureName::from_bytes(bytes).is_err());
    }

    #[test]
    fn clip_family() {
        assert!(n("clip").is_any_clip());
        assert!(n("cliphull2").is_clip_hull());
        assert_eq!(n("cliphull2").clip_hull_number(), Some(2));
        assert_eq!(n("cliphull4").clip_hull_number(), None);
        assert!(n("clipbevel").is_any_clip_bevel());
        assert!(n("clipbevelbrush").is_any_clip());
        assert!(!n("cliphull22").is_clip_hull());
    }

    #[test]
    fn liquids() {
        assert!(n("!water0").is_water());
        assert!(n("*lava1").is_lava());
        assert!(!n("*lava1").is_water());
        assert!(n("!cur_90left").is_water_with_current());
        assert_eq!(n("!cur_dwn1").current_direction(), Some(5));
        assert!(n("laserbeam").is_water());
    }

    #[test]
    fn embedded_lightmap_index() {
        assert_eq!(n("__rad00042").embedded_lightmap_texinfo(), Some(42));
        assert_eq!(n("{_rad00007").embedded_lightmap_texinfo(), Some(7));
        assert_eq!(n("!_rad12345").embedded_lightmap_texinfo(), Some(12345));
        assert_eq!(n("__ordinary").embedded_lightmap_texinfo(), None);
    }

    #[test]
    fn animation_and_minlight() {
        assert_eq!(n("+3butn").animation_frame(), Some((3, false)));
        assert_eq!(n("+abutn").animation_frame(), Some((0, true)));
        assert_eq!(n("%200gold").minlight(), Some(200));
        assert_eq!(n("%5").minlight(), Some(5));
        assert_eq!(n("metal").minlight(), None);
    }

    #[test]
    fn hints_and_nulls() {
        assert!(n("hint").is_any_hint());
        assert!(n("solidhint").marks_discardable_faces());
        assert!(n("nullnoclip").is_any_null());
        assert!(n("nullnoclip").is_noclip());
        assert!(n("null").is_any_null());
        assert!(!n("null").is_noclip());
    }
}
