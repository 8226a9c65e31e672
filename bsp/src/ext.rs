//! `.ext` side channel: per-face lightmap extents for tools that do
//! not recompute them from texinfo.

use std::path::Path;

use crate::error::BspError;

const EXT_HEADER: &str = "HLT Extent File";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceExtents {
    pub texture_mins: [i32; 2],
    pub extents: [i32; 2],
}

pub fn write_extent_file(
    path: impl AsRef<Path>,
    extents: &[FaceExtents],
) -> std::io::Result<()> {
    let mut text = String::with_capacity(extents.len() * 16 + EXT_HEADER.len());
    text += EXT_HEADER;
    text += "\n";

    for e in extents {
        text += &format!(
            "{} {} {} {}\n",
            e.texture_mins[0], e.texture_mins[1], e.extents[0], e.extents[1]
        );
    }

    std::fs::write(path, text)
}

pub fn read_extent_file(path: impl AsRef<Path>) -> Result<Vec<FaceExtents>, BspError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| BspError::Io {
        source,
        path: path.to_path_buf(),
    })?;

    let mut lines = text.lines();
    if lines.next() != Some(EXT_HEADER) {
        return Err(BspError::BadExtentFile);
    }

    let mut res = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<i32> = line
            .split_whitespace()
            .map(|f| f.parse::<i32>())
            .collect::<Result<_, _>>()
            .map_err(|_| BspError::BadExtentFile)?;
        if fields.len() != 4 {
            return Err(BspError::BadExtentFile);
        }
        res.push(FaceExtents {
            texture_mins: [fields[0], fields[1]],
            extents: [fields[2], fields[3]],
        });
    }

    Ok(res)
}
