//! Hull face streams, `<map>.p0` .. `<map>.p3`.
//!
//! CSG hands the BSP stage one face stream per hull. Hull 0 carries the
//! textured faces; hulls 1-3 carry contents-only collision faces. The
//! stream is plain text in stable brush/side order, which also makes
//! compiles reproducible.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use glam::DVec3;

use bsp::Contents;

use crate::winding::Winding;

use super::CsgError;

#[derive(Debug, Clone, PartialEq)]
pub struct HullFace {
    pub entity: u16,
    pub brush: u16,
    pub contents: Contents,
    /// Plane registry index in the face's exact orientation.
    pub plane: u16,
    /// -1 in the expansion hulls.
    pub texinfo: i32,
    pub detail_level: u16,
    pub winding: Winding,
}

pub fn hull_file_path(map_path: &Path, hull: usize) -> PathBuf {
    map_path.with_extension(format!("p{}", hull))
}

pub fn write_hull_file(path: &Path, hull: usize, faces: &[HullFace]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    writeln!(w, "hullfile {}", hull)?;

    for face in faces {
        writeln!(
            w,
            "face {} {} {} {} {} {} {}",
            face.entity,
            face.brush,
            face.contents as i32,
            face.plane,
            face.texinfo,
            face.detail_level,
            face.winding.size(),
        )?;
        for p in &face.winding.points {
            writeln!(w, "{} {} {}", p.x, p.y, p.z)?;
        }
    }

    writeln!(w, "end")?;
    w.flush()
}

pub fn read_hull_file(path: &Path) -> Result<(usize, Vec<HullFace>), CsgError> {
    let io_err = |source| CsgError::Io {
        source,
        path: path.to_path_buf(),
    };
    let bad = || CsgError::BadHullFile {
        path: path.to_path_buf(),
    };

    let file = File::open(path).map_err(io_err)?;
    let mut lines = BufReader::new(file).lines();

    let header = lines.next().ok_or_else(bad)?.map_err(io_err)?;
    let hull = header
        .strip_prefix("hullfile ")
        .and_then(|h| h.parse::<usize>().ok())
        .ok_or_else(bad)?;

    let mut faces = Vec::new();

    loop {
        let line = lines.next().ok_or_else(bad)?.map_err(io_err)?;
        if line == "end" {
            break;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 8 || fields[0] != "face" {
            return Err(bad());
        }

        let parse_int = |s: &str| s.parse::<i64>().map_err(|_| bad());
        let entity = parse_int(fields[1])? as u16;
        let brush = parse_int(fields[2])? as u16;
        let contents =
            Contents::try_from(parse_int(fields[3])? as i32).map_err(|_| bad())?;
        let plane = parse_int(fields[4])? as u16;
        let texinfo = parse_int(fields[5])? as i32;
        let detail_level = parse_int(fields[6])? as u16;
        let point_count = parse_int(fields[7])? as usize;

        let mut points = Vec::with_capacity(point_count);
        for _ in 0..point_count {
            let line = lines.next().ok_or_else(bad)?.map_err(io_err)?;
            let coords: Vec<f64> = line
                .split_whitespace()
                .map(|c| c.parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|_| bad())?;
            if coords.len() != 3 {
                return Err(bad());
            }
            points.push(DVec3::new(coords[0], coords[1], coords[2]));
        }

        faces.push(HullFace {
            entity,
            brush,
            contents,
            plane,
            texinfo,
            detail_level,
            winding: Winding::new(points),
        });
    }

    Ok((hull, faces))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hull_file_round_trip() {
        let faces = vec![
            HullFace {
                entity: 0,
                brush: 3,
                contents: Contents::Solid,
                plane: 12,
                texinfo: 4,
                detail_level: 0,
                winding: Winding::new(vec![
                    DVec3::new(0.0, 0.0, 0.0),
                    DVec3::new(0.0, 64.0, 0.0),
                    DVec3::new(64.0, 64.0, 0.5),
                ]),
            },
            HullFace {
                entity: 1,
                brush: 0,
                contents: Contents::Water,
                plane: 7,
                texinfo: -1,
                detail_level: 2,
                winding: Winding::new(vec![
                    DVec3::new(-8.0, 0.25, 16.0),
                    DVec3::new(8.0, 0.25, 16.0),
                    DVec3::new(8.0, 0.25, -16.0),
                    DVec3::new(-8.0, 0.25, -16.0),
                ]),
            },
        ];

        let dir = std::env::temp_dir().join("hlt_hullfile_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = hull_file_path(&dir.join("map.map"), 2);

        write_hull_file(&path, 2, &faces).unwrap();
        let (hull, back) = read_hull_file(&path).unwrap();

        assert_eq!(hull, 2);
        assert_eq!(back, faces);
    }
}
