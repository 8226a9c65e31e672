//! Entity and texture lump round-tripping.
//!
//! Exports keep the lump bytes untouched so an export-import cycle
//! with no edit reproduces the BSP byte for byte. `-parse` instead
//! re-parses and re-formats the text, which normalizes hand edits.
//! Texture export collects the embedded miptexes into a WAD; import
//! replaces matching entries, embedded RAD lightmap textures included.

use std::path::Path;

use bsp::Bsp;
use wad::Wad;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RipentMode {
    ExportEntities,
    ImportEntities,
    ExportTextures,
    ImportTextures,
}

/// Writes `<map>.ent` with the exact entity lump text.
pub fn export_entities(bsp_path: &Path, parse: bool) -> eyre::Result<()> {
    let bsp = Bsp::from_file(bsp_path)?;
    let ent_path = bsp_path.with_extension("ent");

    let text = if parse {
        let entities = bsp::entities::parse_entities(&bsp.entities)?;
        bsp::entities::format_entities(&entities)
    } else {
        bsp.entities.clone()
    };

    std::fs::write(&ent_path, text)?;
    log::info!("Exported entities to {}", ent_path.display());
    Ok(())
}

/// Replaces the entity lump with `<map>.ent`.
pub fn import_entities(bsp_path: &Path, parse: bool) -> eyre::Result<()> {
    let mut bsp = Bsp::from_file(bsp_path)?;
    let ent_path = bsp_path.with_extension("ent");
    let text = std::fs::read_to_string(&ent_path)?;

    // validate even when importing verbatim: a broken lump bricks the map
    let entities = bsp::entities::parse_entities(&text)?;

    bsp.entities = if parse {
        bsp::entities::format_entities(&entities)
    } else {
        text
    };

    bsp.check_limits()?;
    bsp.write_to_file(bsp_path)?;
    log::info!("Imported {} entities", entities.len());
    Ok(())
}

/// Writes embedded textures into `<map>.wa_`. External references are
/// skipped; they already live in their own WAD.
pub fn export_textures(bsp_path: &Path) -> eyre::Result<()> {
    let bsp = Bsp::from_file(bsp_path)?;
    let wad_path = bsp_path.with_extension("wa_");

    let mut wad = Wad::new();
    for texture in &bsp.textures {
        if texture.is_external() {
            continue;
        }
        wad.entries.push(wad::Entry::new(texture.clone()));
    }

    let count = wad.entries.len();
    wad.write_to_file(&wad_path)?;
    log::info!("Exported {} embedded textures to {}", count, wad_path.display());
    Ok(())
}

/// Replaces texture lump entries with same-named entries from
/// `<map>.wa_`. Entries absent from the WAD stay as they are.
pub fn import_textures(bsp_path: &Path) -> eyre::Result<()> {
    let mut bsp = Bsp::from_file(bsp_path)?;
    let wad_path = bsp_path.with_extension("wa_");
    let wad = Wad::from_file(&wad_path)?;

    let mut replaced = 0usize;
    for texture in bsp.textures.iter_mut() {
        if let Some(entry) = wad.find(&texture.texture_name) {
            *texture = entry.miptex.clone();
            replaced += 1;
        }
    }

    bsp.check_limits()?;
    bsp.write_to_file(bsp_path)?;
    log::info!("Imported {} textures", replaced);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bspbuild::{compile, BspOptions};
    use crate::csg::test_support::{hollow_box, point_entity, worldspawn_with};
    use crate::csg::{compile_map, CsgOptions};
    use glam::DVec3;

    fn build_map_file(dir: &Path) -> std::path::PathBuf {
        let mut map = worldspawn_with(hollow_box(
            DVec3::splat(-128.0),
            DVec3::splat(128.0),
            16.0,
            "stone",
        ));
        map.entities
            .push(point_entity("info_player_start", DVec3::ZERO, &[]));

        let out = compile_map(&map, &CsgOptions::default()).unwrap();
        let mut bsp = out.bsp;
        compile(&mut bsp, &out.hull_faces, &BspOptions::default(), None).unwrap();

        std::fs::create_dir_all(dir).unwrap();
        let bsp_path = dir.join("ripent_room.bsp");
        bsp.write_to_file(&bsp_path).unwrap();
        bsp_path
    }

    #[test]
    fn unedited_round_trip_is_byte_identical() {
        let dir = std::env::temp_dir().join("hlt_ripent_test");
        let bsp_path = build_map_file(&dir);

        let before = std::fs::read(&bsp_path).unwrap();

        export_entities(&bsp_path, false).unwrap();
        import_entities(&bsp_path, false).unwrap();

        let after = std::fs::read(&bsp_path).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn edited_value_survives_round_trip() {
        let dir = std::env::temp_dir().join("hlt_ripent_edit_test");
        let bsp_path = build_map_file(&dir);

        export_entities(&bsp_path, false).unwrap();

        let ent_path = bsp_path.with_extension("ent");
        let text = std::fs::read_to_string(&ent_path).unwrap();
        let edited = text.replace("info_player_start", "info_player_deathmatch");
        std::fs::write(&ent_path, edited).unwrap();

        import_entities(&bsp_path, false).unwrap();

        let bsp = Bsp::from_file(&bsp_path).unwrap();
        let entities = bsp::entities::parse_entities(&bsp.entities).unwrap();
        assert!(entities
            .iter()
            .any(|e| e.classname() == "info_player_deathmatch"));
    }
}
