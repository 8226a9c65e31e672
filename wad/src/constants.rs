pub const MAX_TEXTURE_NAME_LENGTH: usize = 15;
pub const TEXTURE_NAME_BYTES: usize = 16;

pub const MIPTEX_HEADER_LENGTH: u32 = 16 + 4 + 4 + 4 * 4;

pub const MIP_LEVELS: usize = 4;

pub const PALETTE_COLORS: usize = 256;

/// `__radNNNNN`, `{_radNNNNN`, `!_radNNNNN`
pub const EMBEDDED_LIGHTMAP_INDEX_START: usize = 5;
pub const EMBEDDED_LIGHTMAP_INDEX_DIGITS: usize = 5;
