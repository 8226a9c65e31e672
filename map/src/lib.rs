//! Valve-220 `.map` brush text parser and writer.
//!
//! The grammar is token-oriented: every token may be preceded by
//! whitespace and `//` comments, so one separator-eating combinator
//! wraps every primitive and comments never need special casing at the
//! statement level. Entity bodies are parsed as a stream of items
//! (key-value pair or brush block) and folded into the entity, which
//! also tolerates exporters that interleave the two.

use std::{fmt::Write as _, path::Path};

use glam::{DVec3, DVec4};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, multispace1},
    combinator::{map, opt, verify},
    multi::{many0, many1},
    number::complete::double,
    sequence::{delimited, preceded, tuple},
    IResult,
};

mod kv;

pub use kv::{KeyValue, KeyValues};

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Cannot read map file `{path}`: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: std::path::PathBuf,
    },
    #[error("Cannot parse map file near `{snippet}`")]
    Parse { snippet: String },
    #[error("Brush side is not in Valve-220 format near `{snippet}`; re-export the map with texture axes")]
    NotValve220 { snippet: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrushSide {
    pub p1: DVec3,
    pub p2: DVec3,
    pub p3: DVec3,
    pub texture_name: String,
    /// Ux Uy Uz Uoffset
    pub u: DVec4,
    /// Vx Vy Vz Voffset
    pub v: DVec4,
    pub rotation: f64,
    pub u_scale: f64,
    pub v_scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    pub sides: Vec<BrushSide>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key_values: KeyValues,
    pub brushes: Option<Vec<Brush>>,
}

impl Entity {
    pub fn classname(&self) -> &str {
        self.key_values.get("classname").unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    pub tb_header: Option<Vec<String>>,
    pub entities: Vec<Entity>,
}

impl Map {
    pub fn from_text(text: &str) -> Result<Self, MapError> {
        match parse_map(text) {
            Ok((_, parsed)) => Ok(parsed),
            Err(err) => {
                let snippet: String = match &err {
                    nom::Err::Error(e) | nom::Err::Failure(e) => {
                        e.input.chars().take(40).collect()
                    }
                    nom::Err::Incomplete(_) => String::from("<end of file>"),
                };

                // a side row that starts like a brush plane but has no
                // `[ u ]` block is the old QuakeEd axis format
                let looks_like_side = snippet
                    .lines()
                    .take(3)
                    .any(|line| line.trim_start().starts_with('('));
                if looks_like_side && !snippet.contains('[') {
                    return Err(MapError::NotValve220 { snippet });
                }

                Err(MapError::Parse { snippet })
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MapError::Io {
            source,
            path: path.to_path_buf(),
        })?;

        Self::from_text(&text)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.to_text())
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();

        if let Some(header) = &self.tb_header {
            for line in header {
                let _ = writeln!(out, "//{}", line);
            }
        }

        for entity in &self.entities {
            out.push_str("{\n");
            for (key, value) in entity.key_values.iter() {
                let _ = writeln!(out, "\"{}\" \"{}\"", escape(key), escape(value));
            }

            for brush in entity.brushes.iter().flatten() {
                out.push_str("{\n");
                for s in &brush.sides {
                    let _ = writeln!(
                        out,
                        "( {} {} {} ) ( {} {} {} ) ( {} {} {} ) {} [ {} {} {} {} ] [ {} {} {} {} ] {} {} {}",
                        s.p1.x, s.p1.y, s.p1.z,
                        s.p2.x, s.p2.y, s.p2.z,
                        s.p3.x, s.p3.y, s.p3.z,
                        s.texture_name,
                        s.u.x, s.u.y, s.u.z, s.u.w,
                        s.v.x, s.v.y, s.v.z, s.v.w,
                        s.rotation, s.u_scale, s.v_scale,
                    );
                }
                out.push_str("}\n");
            }

            out.push_str("}\n");
        }

        out
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

// ---- lexing helpers ----

/// One `//` comment, excluding its newline.
fn comment(i: &str) -> IResult<&str, &str> {
    preceded(tag("//"), take_till(|c| c == '\n'))(i)
}

/// Whitespace and comments between tokens. Always succeeds.
fn sep(i: &str) -> IResult<&str, ()> {
    map(many0(alt((map(multispace1, |_| ()), map(comment, |_| ())))), |_| ())(i)
}

/// Wraps a parser so it may be preceded by separators.
fn token<'a, T>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, T>,
) -> impl FnMut(&'a str) -> IResult<&'a str, T> {
    preceded(sep, inner)
}

fn number(i: &str) -> IResult<&str, f64> {
    token(double)(i)
}

fn sym(c: char) -> impl FnMut(&str) -> IResult<&str, char> {
    move |i| token(char(c))(i)
}

/// A quoted string with backslash escapes, scanned by hand: the
/// escape/unescape pairing is easier to keep honest outside the
/// combinator DSL.
fn quoted(i: &str) -> IResult<&str, String> {
    let (i, _) = sym('"')(i)?;

    let mut value = String::new();
    let mut chars = i.char_indices();

    loop {
        let Some((at, c)) = chars.next() else {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Char,
            )));
        };
        match c {
            '"' => return Ok((&i[at + 1..], value)),
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => value.push('\\'),
            },
            _ => value.push(c),
        }
    }
}

// ---- brush grammar ----

fn point(i: &str) -> IResult<&str, DVec3> {
    map(
        delimited(sym('('), tuple((number, number, number)), sym(')')),
        |(x, y, z)| DVec3::new(x, y, z),
    )(i)
}

fn texture_axis(i: &str) -> IResult<&str, DVec4> {
    map(
        delimited(sym('['), tuple((number, number, number, number)), sym(']')),
        |(x, y, z, w)| DVec4::new(x, y, z, w),
    )(i)
}

fn texture_name(i: &str) -> IResult<&str, &str> {
    token(take_while1(|c: char| !c.is_whitespace()))(i)
}

fn side_row(i: &str) -> IResult<&str, BrushSide> {
    let (i, (p1, p2, p3)) = tuple((point, point, point))(i)?;
    let (i, texture) = texture_name(i)?;
    let (i, u) = texture_axis(i)?;
    let (i, v) = texture_axis(i)?;
    let (i, (rotation, u_scale, v_scale)) = tuple((number, number, number))(i)?;

    Ok((
        i,
        BrushSide {
            p1,
            p2,
            p3,
            texture_name: texture.to_string(),
            u,
            v,
            rotation,
            u_scale,
            v_scale,
        },
    ))
}

fn brush_block(i: &str) -> IResult<&str, Brush> {
    map(
        delimited(sym('{'), many1(side_row), sym('}')),
        |sides| Brush { sides },
    )(i)
}

// ---- entity grammar ----

/// Anything that can appear inside an entity block.
enum BodyItem {
    Pair(String, String),
    Solid(Brush),
}

fn body_item(i: &str) -> IResult<&str, BodyItem> {
    alt((
        map(tuple((quoted, quoted)), |(k, v)| BodyItem::Pair(k, v)),
        map(brush_block, BodyItem::Solid),
    ))(i)
}

fn entity(i: &str) -> IResult<&str, Entity> {
    map(
        delimited(sym('{'), many0(body_item), sym('}')),
        |items| {
            let mut key_values = KeyValues::new();
            let mut brushes: Vec<Brush> = Vec::new();

            for item in items {
                match item {
                    BodyItem::Pair(key, value) => key_values.set(&key, &value),
                    BodyItem::Solid(brush) => brushes.push(brush),
                }
            }

            Entity {
                key_values,
                brushes: (!brushes.is_empty()).then_some(brushes),
            }
        },
    )(i)
}

/// Leading comment lines that belong to the editor header, not to the
/// per-entity markers exporters sprinkle in.
fn header_line(i: &str) -> IResult<&str, String> {
    map(
        verify(preceded(opt(multispace1), comment), |line: &str| {
            !line.trim_start().starts_with("entity")
        }),
        |line: &str| line.to_string(),
    )(i)
}

fn parse_map(i: &str) -> IResult<&str, Map> {
    let (i, header) = many0(header_line)(i)?;
    let (i, entities) = many1(entity)(i)?;
    let (i, _) = sep(i)?;

    if !i.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Eof,
        )));
    }

    Ok((
        i,
        Map {
            tb_header: (!header.is_empty()).then_some(header),
            entities,
        },
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quoted_handles_escapes() {
        let (rest, s) = quoted("\"wall\" next").unwrap();
        assert_eq!(s, "wall");
        assert_eq!(rest, " next");

        let (_, s) = quoted(r#""say \"go\" twice""#).unwrap();
        assert_eq!(s, "say \"go\" twice");

        let (_, s) = quoted(r#""C:\\maps\\box""#).unwrap();
        assert_eq!(s, r"C:\maps\box");

        assert!(quoted("\"never closed").is_err());
    }

    #[test]
    fn side_row_parses() {
        let i = "( 96 0 64 ) ( 96 128 64 ) ( 96 0 0 ) crate01 [ 0 1 0 12 ] [ 0 0 -1 -4 ] 0 0.5 2";
        let (rest, side) = side_row(i).unwrap();

        assert!(rest.is_empty());
        assert_eq!(side.p2, DVec3::new(96.0, 128.0, 64.0));
        assert_eq!(side.texture_name, "crate01");
        assert_eq!(side.u, DVec4::new(0.0, 1.0, 0.0, 12.0));
        assert_eq!(side.v.w, -4.0);
        assert_eq!(side.u_scale, 0.5);
        assert_eq!(side.v_scale, 2.0);
    }

    #[test]
    fn brush_block_with_interleaved_comments() {
        let i = "\
{
// north face, keep flush with the ledge
( 0 32 0 ) ( 8 32 0 ) ( 0 32 8 ) metal2 [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( 0 -32 0 ) ( 0 -32 8 ) ( 8 -32 0 ) metal2 [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( 24 0 0 ) ( 24 8 0 ) ( 24 0 8 ) metal2 [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -24 0 0 ) ( -24 0 8 ) ( -24 8 0 ) metal2 [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1 // west
( 0 0 16 ) ( 8 0 16 ) ( 0 8 16 ) metal2 [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 0 0 -16 ) ( 0 8 -16 ) ( 8 0 -16 ) metal2 [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
}";

        let (rest, brush) = brush_block(i).unwrap();
        assert!(rest.is_empty());
        assert_eq!(brush.sides.len(), 6);
        assert!(brush.sides.iter().all(|s| s.texture_name == "metal2"));
        assert_eq!(brush.sides[3].p1, DVec3::new(-24.0, 0.0, 0.0));
    }

    #[test]
    fn point_entity_parses() {
        let i = "\
{
\"classname\" \"ambient_generic\"
\"message\" \"ambience/drips.wav\"
\"health\" \"8\"
\"origin\" \"40 -16 90\"
}";
        let (rest, ent) = entity(i).unwrap();
        assert!(rest.is_empty());
        assert!(ent.brushes.is_none());
        assert_eq!(ent.classname(), "ambient_generic");
        assert_eq!(ent.key_values.len(), 4);
        assert_eq!(ent.key_values.get("origin"), Some("40 -16 90"));
    }

    #[test]
    fn duplicate_keys_keep_first_position_last_value() {
        let i = "\
{
\"wait\" \"2\"
\"classname\" \"func_button\"
\"wait\" \"5\"
}";
        let (_, ent) = entity(i).unwrap();

        let keys: Vec<&str> = ent.key_values.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["wait", "classname"]);
        assert_eq!(ent.key_values.get("wait"), Some("5"));
    }

    #[test]
    fn header_kept_entity_markers_dropped() {
        let i = "\
// Game: Half-Life
// Format: Valve
// entity 0
{
\"classname\" \"worldspawn\"
\"mapversion\" \"220\"
// brush 0
{
( -96 -96 0 ) ( -96 -95 0 ) ( -96 -96 1 ) crate01 [ 0 -1 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -96 -96 0 ) ( -96 -96 1 ) ( -95 -96 0 ) crate01 [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -96 -96 0 ) ( -95 -96 0 ) ( -96 -95 0 ) crate01 [ -1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 96 96 32 ) ( 96 97 32 ) ( 97 96 32 ) crate01 [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 96 96 0 ) ( 97 96 0 ) ( 96 96 1 ) crate01 [ -1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( 96 96 0 ) ( 96 96 1 ) ( 96 97 0 ) crate01 [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1
}
}
";

        let parsed = Map::from_text(i).unwrap();

        let header = parsed.tb_header.as_ref().unwrap();
        assert_eq!(header.len(), 2);
        assert!(header[0].contains("Game:"));

        assert_eq!(parsed.entities.len(), 1);
        let world = &parsed.entities[0];
        assert_eq!(world.classname(), "worldspawn");
        assert_eq!(world.key_values.get("mapversion"), Some("220"));

        let brushes = world.brushes.as_ref().unwrap();
        assert_eq!(brushes.len(), 1);
        assert_eq!(brushes[0].sides[3].p2, DVec3::new(96.0, 97.0, 32.0));
    }

    #[test]
    fn pairs_after_brushes_still_land_on_the_entity() {
        // some exporters append keys below the brush list
        let i = "\
{
\"classname\" \"func_wall\"
{
( 0 16 0 ) ( 4 16 0 ) ( 0 16 4 ) glass [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( 0 -16 0 ) ( 0 -16 4 ) ( 4 -16 0 ) glass [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( 16 0 0 ) ( 16 4 0 ) ( 16 0 4 ) glass [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -16 0 0 ) ( -16 0 4 ) ( -16 4 0 ) glass [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1
( 0 0 48 ) ( 4 0 48 ) ( 0 4 48 ) glass [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 0 0 40 ) ( 0 4 40 ) ( 4 0 40 ) glass [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
}
\"rendermode\" \"2\"
}";
        let (_, ent) = entity(i).unwrap();
        assert_eq!(ent.key_values.get("rendermode"), Some("2"));
        assert_eq!(ent.brushes.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        let err = Map::from_text("{\n\"classname\" \"worldspawn\"\n}\nleftover").unwrap_err();
        assert!(matches!(err, MapError::Parse { .. }));
    }

    #[test]
    fn quakeed_axes_are_called_out() {
        // old-format side rows have no [ u ] [ v ] blocks
        let i = "\
{
\"classname\" \"worldspawn\"
{
( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) LAB1_DOOR 0 0 0 1 1
}
}
";
        let err = Map::from_text(i).unwrap_err();
        assert!(matches!(err, MapError::NotValve220 { .. }));
    }

    #[test]
    fn write_then_parse_round_trips() {
        let text = "\
// Game: Half-Life
// Format: Valve
{
\"classname\" \"worldspawn\"
\"message\" \"storage \\\"annex\\\"\"
{
( -40 -40 -8 ) ( -40 -39 -8 ) ( -40 -40 -7 ) !water2 [ 0 -1 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -40 -40 -8 ) ( -40 -40 -7 ) ( -39 -40 -8 ) !water2 [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -40 -40 -8 ) ( -39 -40 -8 ) ( -40 -39 -8 ) !water2 [ -1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 40 40 24 ) ( 40 41 24 ) ( 41 40 24 ) !water2 [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 40 40 -8 ) ( 41 40 -8 ) ( 40 40 -7 ) !water2 [ -1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( 40 40 -8 ) ( 40 40 -7 ) ( 40 41 -8 ) !water2 [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1
}
}
{
\"classname\" \"light\"
\"origin\" \"0 0 20\"
\"_light\" \"255 240 220 150\"
}
";
        let first = Map::from_text(text).unwrap();
        let second = Map::from_text(&first.to_text()).unwrap();
        assert_eq!(first, second);
    }
}
