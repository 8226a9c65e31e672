pub mod constants;
pub mod error;
mod name;
mod parser;
pub mod types;

pub use error::WadError;
pub use name::{TextureName, TextureNameError};
pub use parser::parse_miptex;
pub use types::{Entry, MipMap, MipTex, Palette, Wad};

#[cfg(test)]
mod test {
    use super::*;

    fn checkers_miptex(name: &str) -> MipTex {
        let (w, h) = (16u32, 16u32);
        let mips = [
            (0..w * h).map(|i| (i % 2) as u8).collect::<Vec<u8>>(),
            vec![0u8; (w * h / 4) as usize],
            vec![0u8; (w * h / 16) as usize],
            vec![0u8; (w * h / 64) as usize],
        ];
        let palette = vec![[0, 0, 255], [255, 255, 255]];

        MipTex::new_embedded(TextureName::new(name).unwrap(), (w, h), mips, palette)
    }

    #[test]
    fn wad_round_trip() {
        let mut wad = Wad::new();
        wad.entries.push(Entry::new(checkers_miptex("{blue")));
        wad.entries.push(Entry::new(checkers_miptex("crate01")));

        let bytes = wad.write_to_bytes();
        let back = Wad::from_bytes(&bytes).unwrap();

        assert_eq!(back.entries.len(), 2);
        assert_eq!(back.entries[0].texture_name().as_str(), "{blue");
        assert_eq!(back.entries[1].miptex.width, 16);
        assert_eq!(back.entries[1].miptex.mip_images[0].0.len(), 256);
        assert_eq!(back.entries[1].miptex.palette.0[1], [255, 255, 255]);
    }

    #[test]
    fn external_reference_round_trip() {
        let mut writer = byte_writer::ByteWriter::new();
        MipTex::new_external(TextureName::new("outside").unwrap(), (64, 32)).write(&mut writer);

        let tex = parse_miptex(&writer.data).unwrap();
        assert!(tex.is_external());
        assert_eq!(tex.width, 64);
        assert_eq!(tex.height, 32);
    }

    #[test]
    fn not_wad3_rejected() {
        assert!(matches!(
            Wad::from_bytes(b"WAD2\0\0\0\0\0\0\0\0"),
            Err(WadError::NotWad3)
        ));
    }
}
