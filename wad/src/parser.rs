use nom::{
    multi::count,
    number::complete::{le_i16, le_i32, le_i8, le_u32, le_u8},
    sequence::tuple,
    IResult as _IResult,
};

use crate::{
    constants::{MIP_LEVELS, TEXTURE_NAME_BYTES},
    error::WadError,
    name::TextureName,
    types::{DirectoryEntry, Entry, Header, MipMap, MipTex, Palette, Wad},
};

type IResult<'a, T> = _IResult<&'a [u8], T>;

// miptex entries (0x40 is an out-of-spec variant some tools emit)
const MIPTEX_FILE_TYPES: &[i8] = &[0x40, 0x43];

fn parse_header(i: &[u8]) -> IResult<Header> {
    let (i, _magic) = count(le_u8, 4)(i)?;
    let (i, (num_dirs, dir_offset)) = tuple((le_i32, le_i32))(i)?;

    Ok((
        i,
        Header {
            num_dirs,
            dir_offset,
        },
    ))
}

fn parse_texture_name(i: &[u8]) -> IResult<[u8; TEXTURE_NAME_BYTES]> {
    let (i, bytes) = count(le_u8, TEXTURE_NAME_BYTES)(i)?;
    let mut res = [0u8; TEXTURE_NAME_BYTES];
    res.copy_from_slice(&bytes);
    Ok((i, res))
}

fn parse_directory_entry(i: &[u8]) -> IResult<(DirectoryEntry, Result<(), WadError>)> {
    let (i, (entry_offset, disk_size, entry_size, file_type, compressed, _padding)) =
        tuple((le_i32, le_i32, le_i32, le_i8, le_i8, le_i16))(i)?;
    let (i, name_bytes) = parse_texture_name(i)?;

    let (texture_name, name_check) = match TextureName::from_bytes(name_bytes) {
        Ok(name) => (name, Ok(())),
        Err(e) => (TextureName::new("").unwrap(), Err(WadError::from(e))),
    };

    Ok((
        i,
        (
            DirectoryEntry {
                entry_offset,
                disk_size,
                entry_size,
                file_type,
                compressed: compressed != 0,
                texture_name,
            },
            name_check,
        ),
    ))
}

/// Parses a miptex struct. Offsets inside are relative to the struct
/// start, so the caller hands in the slice beginning at the struct.
pub fn parse_miptex(struct_start: &[u8]) -> Result<MipTex, WadError> {
    let bail = |name: &TextureName| WadError::ParseMipTex {
        name: name.to_string(),
    };

    let (i, name_bytes) =
        parse_texture_name(struct_start).map_err(|_| WadError::ParseDirectory)?;
    let texture_name = TextureName::from_bytes(name_bytes)?;

    let (i, (width, height)) =
        tuple((le_u32, le_u32))(i).map_err(|_: nom::Err<nom::error::Error<&[u8]>>| bail(&texture_name))?;
    let (_, mip_offsets) = count(le_u32, MIP_LEVELS)(i)
        .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| bail(&texture_name))?;

    // zero offsets mean the texture lives in an external WAD
    if mip_offsets[0] == 0 {
        return Ok(MipTex::new_external(texture_name, (width, height)));
    }

    let mut mips: Vec<MipMap> = Vec::with_capacity(MIP_LEVELS);
    for level in 0..MIP_LEVELS {
        let len = ((width >> level) * (height >> level)) as usize;
        let at = mip_offsets[level] as usize;
        let data = struct_start
            .get(at..at + len)
            .ok_or_else(|| bail(&texture_name))?;
        mips.push(MipMap(data.to_vec()));
    }

    // the palette sits right after the last mip: a color count then rgb rows
    let palette_at = mip_offsets[MIP_LEVELS - 1] as usize
        + ((width >> (MIP_LEVELS - 1)) * (height >> (MIP_LEVELS - 1))) as usize;
    let palette_start = struct_start
        .get(palette_at..)
        .ok_or_else(|| bail(&texture_name))?;
    let (palette_start, colors_used) =
        le_i16::<_, nom::error::Error<&[u8]>>(palette_start).map_err(|_| bail(&texture_name))?;

    // some editors write garbage counts; a WAD3 palette is 256 colors
    let colors_used = if !(1..=256).contains(&colors_used) {
        256
    } else {
        colors_used
    };

    let (_, palette_bytes) =
        count(le_u8::<_, nom::error::Error<&[u8]>>, colors_used as usize * 3)(palette_start)
            .map_err(|_| bail(&texture_name))?;
    let palette = palette_bytes
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect::<Vec<[u8; 3]>>();

    Ok(MipTex {
        texture_name,
        width,
        height,
        mip_images: mips,
        palette: Palette(palette),
    })
}

pub fn parse_wad(file: &[u8]) -> Result<Wad, WadError> {
    let (_, header) = parse_header(file).map_err(|_| WadError::NotWad3)?;

    if &file[..4] != b"WAD3" {
        return Err(WadError::NotWad3);
    }

    let dir_start = file
        .get(header.dir_offset as usize..)
        .ok_or(WadError::ParseDirectory)?;
    let (_, directory_entries) = count(parse_directory_entry, header.num_dirs as usize)(dir_start)
        .map_err(|_| WadError::ParseDirectory)?;

    let mut entries = Vec::with_capacity(directory_entries.len());

    for (directory_entry, name_check) in directory_entries {
        name_check?;

        if directory_entry.compressed {
            return Err(WadError::Compressed);
        }
        if !MIPTEX_FILE_TYPES.contains(&directory_entry.file_type) {
            return Err(WadError::UnknownEntryType {
                file_type: directory_entry.file_type,
            });
        }

        let struct_start = file
            .get(directory_entry.entry_offset as usize..)
            .ok_or(WadError::ParseDirectory)?;
        let miptex = parse_miptex(struct_start)?;

        entries.push(Entry {
            directory_entry,
            miptex,
        });
    }

    Ok(Wad { entries })
}
