use std::{
    ffi::OsStr,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use byte_writer::ByteWriter;

use crate::{
    constants::{
        HEADER_LUMPS, HEADER_LUMP_SIZE, LUMP_CLIPNODES, LUMP_EDGES, LUMP_ENTITIES, LUMP_FACES,
        LUMP_LEAVES, LUMP_LIGHTING, LUMP_MARKSURFACES, LUMP_MODELS, LUMP_NODES, LUMP_PLANES,
        LUMP_SURFEDGES, LUMP_TEXINFO, LUMP_TEXTURES, LUMP_VERTICES, LUMP_VISIBILITY,
    },
    error::BspError,
    parser::parse_bsp,
    types::{Bsp, ClipNode, Face, Leaf, Model, TexInfo},
};

impl Bsp {
    pub fn from_bytes(bytes: &[u8]) -> Result<Bsp, BspError> {
        parse_bsp(bytes)
    }

    pub fn from_file(path: impl AsRef<Path> + AsRef<OsStr>) -> Result<Bsp, BspError> {
        let path: &Path = path.as_ref();

        let bytes = std::fs::read(path).map_err(|op| BspError::Io {
            source: op,
            path: path.to_path_buf(),
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path> + Into<PathBuf>) -> eyre::Result<()> {
        let bytes = self.write_to_bytes();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        file.write_all(&bytes)?;
        file.flush()?;

        Ok(())
    }

    /// Drops planes and texinfo entries nothing references any more and
    /// renumbers the references through monotonic maps. Relative order
    /// is preserved so the output is stable across recompiles.
    pub fn strip_unreferenced(&mut self) {
        // planes are referenced by faces, nodes and clipnodes
        let mut plane_used = vec![false; self.planes.len()];
        for face in &self.faces {
            plane_used[face.plane as usize] = true;
        }
        for node in &self.nodes {
            plane_used[node.plane as usize] = true;
        }
        for clipnode in &self.clipnodes {
            plane_used[clipnode.plane as usize] = true;
        }

        let plane_map = monotonic_map(&plane_used);
        self.planes = keep_used(std::mem::take(&mut self.planes), &plane_used);

        for face in &mut self.faces {
            face.plane = plane_map[face.plane as usize] as u16;
        }
        for node in &mut self.nodes {
            node.plane = plane_map[node.plane as usize] as u32;
        }
        for clipnode in &mut self.clipnodes {
            clipnode.plane = plane_map[clipnode.plane as usize] as i32;
        }

        // texinfo is referenced by faces only
        let mut texinfo_used = vec![false; self.texinfo.len()];
        for face in &self.faces {
            texinfo_used[face.texinfo as usize] = true;
        }

        let texinfo_map = monotonic_map(&texinfo_used);
        self.texinfo = keep_used(std::mem::take(&mut self.texinfo), &texinfo_used);

        for face in &mut self.faces {
            face.texinfo = texinfo_map[face.texinfo as usize] as u16;
        }
    }

    pub fn write_to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();

        writer.append_i32(crate::constants::BSP_VERSION);

        let lump_headers_offset = writer.get_offset();
        writer.append_u8_slice(&vec![0u8; HEADER_LUMP_SIZE * HEADER_LUMPS]);

        // write every lump payload in file order, then patch its
        // (offset, length) pair back into the header
        let mut patch_header = |writer: &mut ByteWriter, lump: usize, offset: usize| {
            let length = writer.get_offset() - offset;
            let header = lump_headers_offset + lump * HEADER_LUMP_SIZE;

            writer.replace_with_i32(header, offset as i32);
            writer.replace_with_i32(header + 4, length as i32);
        };

        // planes
        {
            let offset = writer.get_offset();
            self.planes.iter().for_each(|plane| {
                writer.append_f32(plane.normal.x);
                writer.append_f32(plane.normal.y);
                writer.append_f32(plane.normal.z);
                writer.append_f32(plane.distance);
                writer.append_i32(plane.type_ as i32);
            });
            patch_header(&mut writer, LUMP_PLANES, offset);
        }

        // leaves
        {
            let offset = writer.get_offset();
            self.leaves.iter().for_each(
                |Leaf {
                     contents,
                     vis_offset,
                     mins,
                     maxs,
                     first_mark_surface,
                     mark_surface_count,
                     ambient_levels,
                 }| {
                    writer.append_i32(*contents as i32);
                    writer.append_i32(*vis_offset);
                    writer.append_i16_slice(mins);
                    writer.append_i16_slice(maxs);
                    writer.append_u16(*first_mark_surface);
                    writer.append_u16(*mark_surface_count);
                    writer.append_u8_slice(ambient_levels);
                },
            );
            patch_header(&mut writer, LUMP_LEAVES, offset);
        }

        // vertices
        {
            let offset = writer.get_offset();
            self.vertices.iter().for_each(|vertex| {
                writer.append_f32(vertex.x);
                writer.append_f32(vertex.y);
                writer.append_f32(vertex.z);
            });
            patch_header(&mut writer, LUMP_VERTICES, offset);
        }

        // nodes
        {
            let offset = writer.get_offset();
            self.nodes.iter().for_each(|node| {
                writer.append_u32(node.plane);
                writer.append_i16(node.children[0]);
                writer.append_i16(node.children[1]);
                writer.append_i16_slice(&node.mins);
                writer.append_i16_slice(&node.maxs);
                writer.append_u16(node.first_face);
                writer.append_u16(node.face_count);
            });
            patch_header(&mut writer, LUMP_NODES, offset);
        }

        // texinfo
        {
            let offset = writer.get_offset();
            self.texinfo.iter().for_each(
                |TexInfo {
                     u,
                     u_offset,
                     v,
                     v_offset,
                     texture_index,
                     flags,
                 }| {
                    writer.append_f32(u.x);
                    writer.append_f32(u.y);
                    writer.append_f32(u.z);
                    writer.append_f32(*u_offset);
                    writer.append_f32(v.x);
                    writer.append_f32(v.y);
                    writer.append_f32(v.z);
                    writer.append_f32(*v_offset);
                    writer.append_u32(*texture_index);
                    writer.append_u32(*flags);
                },
            );
            patch_header(&mut writer, LUMP_TEXINFO, offset);
        }

        // faces
        {
            let offset = writer.get_offset();
            self.faces.iter().for_each(
                |Face {
                     plane,
                     side,
                     first_edge,
                     edge_count,
                     texinfo,
                     styles,
                     lightmap_offset,
                 }| {
                    writer.append_u16(*plane);
                    writer.append_u16(*side);
                    writer.append_i32(*first_edge);
                    writer.append_u16(*edge_count);
                    writer.append_u16(*texinfo);
                    writer.append_u8_slice(styles);
                    writer.append_i32(*lightmap_offset);
                },
            );
            patch_header(&mut writer, LUMP_FACES, offset);
        }

        // clipnodes
        {
            let offset = writer.get_offset();
            self.clipnodes
                .iter()
                .for_each(|ClipNode { plane, children }| {
                    writer.append_i32(*plane);
                    writer.append_i16(children[0]);
                    writer.append_i16(children[1]);
                });
            patch_header(&mut writer, LUMP_CLIPNODES, offset);
        }

        // mark surfaces
        {
            let offset = writer.get_offset();
            self.mark_surfaces.iter().for_each(|&v| {
                writer.append_u16(v);
            });
            patch_header(&mut writer, LUMP_MARKSURFACES, offset);
        }

        // surfedges
        {
            let offset = writer.get_offset();
            self.surf_edges.iter().for_each(|&v| {
                writer.append_i32(v);
            });
            patch_header(&mut writer, LUMP_SURFEDGES, offset);
        }

        // edges
        {
            let offset = writer.get_offset();
            self.edges.iter().for_each(|&[p1, p2]| {
                writer.append_u16(p1);
                writer.append_u16(p2);
            });
            patch_header(&mut writer, LUMP_EDGES, offset);
        }

        // models
        {
            let offset = writer.get_offset();
            self.models.iter().for_each(
                |Model {
                     mins,
                     maxs,
                     origin,
                     head_nodes,
                     vis_leaves_count,
                     first_face,
                     face_count,
                 }| {
                    writer.append_f32_slice(&[mins.x, mins.y, mins.z]);
                    writer.append_f32_slice(&[maxs.x, maxs.y, maxs.z]);
                    writer.append_f32_slice(&[origin.x, origin.y, origin.z]);
                    head_nodes.iter().for_each(|&v| writer.append_i32(v));
                    writer.append_i32(*vis_leaves_count);
                    writer.append_i32(*first_face);
                    writer.append_i32(*face_count);
                },
            );
            patch_header(&mut writer, LUMP_MODELS, offset);
        }

        // lighting
        {
            let offset = writer.get_offset();
            self.lightmap.iter().for_each(|rgb| {
                writer.append_u8_slice(rgb);
            });
            patch_header(&mut writer, LUMP_LIGHTING, offset);
        }

        // visibility
        {
            let offset = writer.get_offset();
            writer.append_u8_slice(&self.visibility);
            patch_header(&mut writer, LUMP_VISIBILITY, offset);
        }

        // entities
        {
            let offset = writer.get_offset();
            writer.append_string(&self.entities);
            writer.append_u8(0);
            patch_header(&mut writer, LUMP_ENTITIES, offset);
        }

        // textures
        {
            let offset = writer.get_offset();

            writer.append_u32(self.textures.len() as u32);

            let offsets_start = writer.get_offset();
            (0..self.textures.len()).for_each(|_| {
                writer.append_i32(0); // patched below
            });

            self.textures.iter().enumerate().for_each(|(idx, texture)| {
                let texture_offset = writer.get_offset();
                // offsets are relative to the lump start
                writer.replace_with_u32(offsets_start + idx * 4, (texture_offset - offset) as u32);
                texture.write(&mut writer);
            });

            patch_header(&mut writer, LUMP_TEXTURES, offset);
        }

        writer.data
    }
}

fn monotonic_map(used: &[bool]) -> Vec<usize> {
    let mut map = vec![0usize; used.len()];
    let mut next = 0usize;
    for (old, &u) in used.iter().enumerate() {
        map[old] = next;
        if u {
            next += 1;
        }
    }
    map
}

fn keep_used<T>(items: Vec<T>, used: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(used.iter())
        .filter_map(|(item, &u)| u.then_some(item))
        .collect()
}
