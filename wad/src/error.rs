use std::path::PathBuf;

use crate::name::TextureNameError;

#[derive(Debug, thiserror::Error)]
pub enum WadError {
    #[error("wad file is not WAD3")]
    NotWad3,
    #[error("Cannot parse wad directory")]
    ParseDirectory,
    #[error("Cannot parse miptex `{name}`")]
    ParseMipTex { name: String },
    #[error("Does not support compressed wad entries")]
    Compressed,
    #[error("unknown wad entry type: {file_type:#02x}")]
    UnknownEntryType { file_type: i8 },
    #[error("Bad texture name: {0}")]
    BadTextureName(#[from] TextureNameError),
    #[error("Cannot read wad file `{path}`: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}
