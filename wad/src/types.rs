use std::{
    io::Write,
    path::{Path, PathBuf},
};

use byte_writer::ByteWriter;

use crate::{
    constants::{MIP_LEVELS, PALETTE_COLORS},
    error::WadError,
    name::TextureName,
    parser::parse_wad,
};

#[derive(Debug)]
pub struct Header {
    pub num_dirs: i32,
    pub dir_offset: i32,
}

#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub entry_offset: i32,
    pub disk_size: i32,
    pub entry_size: i32,
    pub file_type: i8,
    pub compressed: bool,
    pub texture_name: TextureName,
}

#[derive(Debug, Clone, Default)]
pub struct Palette(pub Vec<[u8; 3]>);

#[derive(Debug, Clone)]
pub struct MipMap(pub Vec<u8>);

/// An embedded texture, or a reference to one in an external WAD when
/// `mip_images` is empty (all mip offsets zero on disk).
#[derive(Debug, Clone)]
pub struct MipTex {
    pub texture_name: TextureName,
    pub width: u32,
    pub height: u32,
    /// 4 entries; halved dimensions at each level
    pub mip_images: Vec<MipMap>,
    pub palette: Palette,
}

impl MipTex {
    pub fn new_embedded(
        name: TextureName,
        (width, height): (u32, u32),
        mips: [Vec<u8>; MIP_LEVELS],
        palette: impl Into<Vec<[u8; 3]>>,
    ) -> Self {
        Self {
            texture_name: name,
            width,
            height,
            mip_images: mips.into_iter().map(MipMap).collect(),
            palette: Palette(palette.into()),
        }
    }

    pub fn new_external(name: TextureName, (width, height): (u32, u32)) -> Self {
        Self {
            texture_name: name,
            width,
            height,
            mip_images: vec![],
            palette: Palette(vec![]),
        }
    }

    pub fn is_external(&self) -> bool {
        self.mip_images.is_empty()
    }

    pub fn write(&self, writer: &mut ByteWriter) {
        writer.append_u8_slice(self.texture_name.as_bytes());
        writer.append_u32(self.width);
        writer.append_u32(self.height);

        if self.is_external() {
            // all-zero mip offsets mark an external reference
            for _ in 0..MIP_LEVELS {
                writer.append_u32(0);
            }
            return;
        }

        let mut offset = crate::constants::MIPTEX_HEADER_LENGTH;
        for level in 0..MIP_LEVELS {
            writer.append_u32(offset);
            offset += (self.width >> level) * (self.height >> level);
        }

        for mip in &self.mip_images {
            writer.append_u8_slice(&mip.0);
        }

        writer.append_i16(PALETTE_COLORS as i16);
        for row in &self.palette.0 {
            writer.append_u8_slice(row);
        }
        // pad short palettes out to 256 colors
        writer.append_u8_slice(&vec![0u8; (PALETTE_COLORS - self.palette.0.len()) * 3]);
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub directory_entry: DirectoryEntry,
    pub miptex: MipTex,
}

impl Entry {
    pub fn new(miptex: MipTex) -> Self {
        Self {
            directory_entry: DirectoryEntry {
                entry_offset: 0,
                disk_size: 0,
                entry_size: 0,
                file_type: 0x43,
                compressed: false,
                texture_name: miptex.texture_name,
            },
            miptex,
        }
    }

    pub fn texture_name(&self) -> &TextureName {
        &self.directory_entry.texture_name
    }
}

#[derive(Debug, Default)]
pub struct Wad {
    pub entries: Vec<Entry>,
}

impl Wad {
    pub fn new() -> Self {
        Self { entries: vec![] }
    }

    pub fn find(&self, name: &TextureName) -> Option<&Entry> {
        self.entries.iter().find(|e| e.texture_name() == name)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WadError> {
        parse_wad(bytes)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| WadError::Io {
            source,
            path: path.to_path_buf(),
        })?;

        Self::from_bytes(&bytes)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path> + Into<PathBuf>) -> std::io::Result<()> {
        let bytes = self.write_to_bytes();

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&bytes)?;
        file.flush()
    }

    pub fn write_to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();

        writer.append_string("WAD3");
        writer.append_i32(self.entries.len() as i32);

        // dummy directory offset, patched once the payload is written
        let dir_offset_at = writer.get_offset();
        writer.append_i32(0);

        let payload_spans = self
            .entries
            .iter()
            .map(|entry| {
                let start = writer.get_offset();
                entry.miptex.write(&mut writer);
                // Wally compatibility wants 4-byte alignment between entries
                writer.pad_to_multiple(4);
                (start, writer.get_offset() - start)
            })
            .collect::<Vec<(usize, usize)>>();

        writer.replace_with_u32(dir_offset_at, writer.get_offset() as u32);

        for (entry, (offset, length)) in self.entries.iter().zip(payload_spans) {
            writer.append_i32(offset as i32);
            writer.append_i32(length as i32);
            writer.append_i32(length as i32);
            writer.append_i8(entry.directory_entry.file_type);
            writer.append_i8(0); // not compressed
            writer.append_i16(PALETTE_COLORS as i16);
            writer.append_u8_slice(entry.texture_name().as_bytes());
        }

        writer.data
    }
}
