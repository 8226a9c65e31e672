//! Visibility compression and the limit chart.

use crate::{constants::*, error::BspError, types::Bsp};

/// Run-length compression of a PVS row: non-zero bytes copy through, a
/// zero byte is followed by the count of zeros it stands for.
pub fn compress_vis(row: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(row.len() / 2);
    let mut i = 0;

    while i < row.len() {
        if row[i] != 0 {
            res.push(row[i]);
            i += 1;
            continue;
        }

        let mut run = 0u8;
        while i < row.len() && row[i] == 0 && run < 255 {
            run += 1;
            i += 1;
        }
        res.push(0);
        res.push(run);
    }

    res
}

/// Expands a compressed row into `row_size` bytes.
pub fn decompress_vis(compressed: &[u8], row_size: usize) -> Vec<u8> {
    let mut res = Vec::with_capacity(row_size);
    let mut i = 0;

    while res.len() < row_size {
        match compressed.get(i) {
            Some(0) => {
                let run = *compressed.get(i + 1).unwrap_or(&0) as usize;
                if run == 0 {
                    break;
                }
                res.extend(std::iter::repeat(0u8).take(run.min(row_size - res.len())));
                i += 2;
            }
            Some(&byte) => {
                res.push(byte);
                i += 1;
            }
            None => break,
        }
    }

    res.resize(row_size, 0);
    res
}

pub struct ChartRow {
    pub name: &'static str,
    pub count: usize,
    pub max: usize,
    pub bytes: usize,
}

impl ChartRow {
    pub fn percent_full(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.count as f64 * 100.0 / self.max as f64
        }
    }
}

impl Bsp {
    /// Rows for the -chart table, in lump order.
    pub fn size_chart(&self) -> Vec<ChartRow> {
        let row = |name, count, max, element_size: usize| ChartRow {
            name,
            count,
            max,
            bytes: count * element_size,
        };

        vec![
            row("models", self.models.len(), MAX_MAP_MODELS, MODEL_SIZE),
            row("planes", self.planes.len(), MAX_MAP_PLANES, PLANE_SIZE),
            row("vertexes", self.vertices.len(), MAX_MAP_VERTS, VERTEX_SIZE),
            row("nodes", self.nodes.len(), MAX_MAP_NODES, NODE_SIZE),
            row("texinfos", self.texinfo.len(), MAX_MAP_TEXINFO, TEXINFO_SIZE),
            row("faces", self.faces.len(), MAX_MAP_FACES, FACE_SIZE),
            row(
                "clipnodes",
                self.clipnodes.len(),
                MAX_MAP_CLIPNODES,
                CLIPNODE_SIZE,
            ),
            row("leaves", self.leaves.len(), MAX_MAP_LEAFS, LEAF_SIZE),
            row(
                "marksurfaces",
                self.mark_surfaces.len(),
                MAX_MAP_MARKSURFACES,
                MARKSURFACE_SIZE,
            ),
            row("surfedges", self.surf_edges.len(), MAX_MAP_SURFEDGES, SURFEDGE_SIZE),
            row("edges", self.edges.len(), MAX_MAP_EDGES, EDGE_SIZE),
            row("texdata", 1, 1, self.texture_lump_bytes()),
            row("lightdata", 1, 1, self.lightmap.len() * 3),
            row("visdata", 1, 1, self.visibility.len()),
            row("entdata", 1, 1, self.entities.len() + 1),
        ]
    }

    fn texture_lump_bytes(&self) -> usize {
        let mut writer = byte_writer::ByteWriter::new();
        for texture in &self.textures {
            texture.write(&mut writer);
        }
        writer.data.len() + 4 + self.textures.len() * 4
    }

    /// Every engine limit, checked with its dedicated message.
    pub fn check_limits(&self) -> Result<(), BspError> {
        let check = |name: &'static str, value: usize, max: usize, hint: &'static str| {
            if value > max {
                Err(BspError::LimitExceeded {
                    name,
                    value,
                    max,
                    hint,
                })
            } else {
                Ok(())
            }
        };

        check(
            "MAX_MAP_MODELS",
            self.models.len(),
            MAX_MAP_MODELS,
            "Delete some brush entities or merge them with func_wall.",
        )?;
        check(
            "MAX_MAP_PLANES",
            self.planes.len(),
            MAX_MAP_PLANES,
            "Simplify off-axis brushwork; unaligned brushes burn planes.",
        )?;
        check(
            "MAX_MAP_VERTS",
            self.vertices.len(),
            MAX_MAP_VERTS,
            "Reduce brush detail or turn detail into models.",
        )?;
        check(
            "MAX_MAP_NODES",
            self.nodes.len(),
            MAX_MAP_NODES,
            "Reduce visible brush count; func_detail heavy areas split the tree.",
        )?;
        check(
            "MAX_MAP_TEXINFO",
            self.texinfo.len(),
            MAX_MAP_TEXINFO,
            "Scale textures up or align them; every distinct projection costs one.",
        )?;
        check(
            "MAX_MAP_FACES",
            self.faces.len(),
            MAX_MAP_FACES,
            "Cover unseen surfaces with NULL to cut emitted faces.",
        )?;
        check(
            "MAX_MAP_CLIPNODES",
            self.clipnodes.len(),
            MAX_MAP_CLIPNODES,
            "Use clip brushes over complex shapes so hulls stay simple.",
        )?;
        check(
            "MAX_MAP_LEAFS",
            self.leaves.len(),
            MAX_MAP_LEAFS,
            "Seal large open areas; leaf count grows with visible volume.",
        )?;
        check(
            "MAX_MAP_MARKSURFACES",
            self.mark_surfaces.len(),
            MAX_MAP_MARKSURFACES,
            "Cover unseen surfaces with NULL to cut emitted faces.",
        )?;
        check(
            "MAX_MAP_EDGES",
            self.edges.len(),
            MAX_MAP_EDGES,
            "Reduce brush detail or turn detail into models.",
        )?;
        check(
            "MAX_MAP_SURFEDGES",
            self.surf_edges.len(),
            MAX_MAP_SURFEDGES,
            "Reduce brush detail or turn detail into models.",
        )?;
        check(
            "MAX_MAP_MIPTEX",
            self.texture_lump_bytes(),
            MAX_MAP_MIPTEX,
            "Move embedded textures into an external WAD.",
        )?;
        check(
            "MAX_MAP_LIGHTING",
            self.lightmap.len() * 3,
            MAX_MAP_LIGHTING,
            "Raise -chop or scale up textures on large faces.",
        )?;
        check(
            "MAX_MAP_VISIBILITY",
            self.visibility.len(),
            MAX_MAP_VISIBILITY,
            "Seal large open areas or add hint brushes.",
        )?;
        check(
            "MAX_MAP_ENTSTRING",
            self.entities.len() + 1,
            MAX_MAP_ENTSTRING,
            "Delete unused entities or shorten long key values.",
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vis_round_trip() {
        let row = vec![0, 0, 0, 0xff, 0x01, 0, 0, 0, 0, 0x80];
        let compressed = compress_vis(&row);
        assert_eq!(decompress_vis(&compressed, row.len()), row);
        assert!(compressed.len() < row.len());
    }

    #[test]
    fn vis_all_zero() {
        let row = vec![0u8; 300];
        let compressed = compress_vis(&row);
        // 255-run plus 45-run
        assert_eq!(compressed, vec![0, 255, 0, 45]);
        assert_eq!(decompress_vis(&compressed, 300), row);
    }

    #[test]
    fn vis_no_zeros() {
        let row = vec![0xffu8; 16];
        assert_eq!(compress_vis(&row), row);
    }
}
