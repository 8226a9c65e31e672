use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BspError {
    #[error("Bsp version is not 30: {version}")]
    BspVersion { version: i32 },
    #[error("Lump {lump} is out of file bounds")]
    LumpBounds { lump: usize },
    #[error("Lump {lump} length {length} is not a multiple of its element size {element_size}")]
    LumpSize {
        lump: usize,
        length: usize,
        element_size: usize,
    },
    #[error("Cannot parse entity lump")]
    ParseEntities,
    #[error("Cannot parse planes")]
    ParsePlanes,
    #[error("Cannot parse textures")]
    ParseTextures {
        #[source]
        source: wad::WadError,
    },
    #[error("Cannot parse vertices")]
    ParseVertices,
    #[error("Cannot parse nodes")]
    ParseNodes,
    #[error("Cannot parse texinfo")]
    ParseTexInfo,
    #[error("Cannot parse faces")]
    ParseFaces,
    #[error("Cannot parse lightmap")]
    ParseLightmap,
    #[error("Cannot parse clipnodes")]
    ParseClipNodes,
    #[error("Cannot parse leaves")]
    ParseLeaves,
    #[error("Cannot parse mark surfaces")]
    ParseMarkSurfaces,
    #[error("Cannot parse edges")]
    ParseEdges,
    #[error("Cannot parse surface edges")]
    ParseSurfEdges,
    #[error("Cannot parse models")]
    ParseModels,
    #[error("Malformed extent file")]
    BadExtentFile,
    #[error("{name} exceeds the engine limit: {value} > {max}. {hint}")]
    LimitExceeded {
        name: &'static str,
        value: usize,
        max: usize,
        hint: &'static str,
    },
    #[error("Cannot read file `{path}`: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl BspError {
    pub fn to_result<T>(self) -> Result<T, Self> {
        Err(self)
    }
}
