//! Brush expansion: planes from side points, windings by mutual
//! intersection, contents from the dominant texture, and the
//! box-expanded variants for the collision hulls.

use glam::DVec3;

use bsp::Contents;
use wad::TextureName;

use crate::{
    math::{BoundingBox, ON_EPSILON},
    planes::PlaneRegistry,
    winding::Winding,
};

use super::CsgError;

/// Half-extent tables for the four hulls: point, standing player,
/// large monster, crouching player. Expansion is per-axis.
pub const HULL_SIZES: [[f64; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [16.0, 16.0, 36.0],
    [32.0, 32.0, 32.0],
    [16.0, 16.0, 18.0],
];

pub const NUM_HULLS: usize = 4;

/// What a whole brush is, decided by its side textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrushContents {
    Solid,
    Water(Contents),
    Sky,
    Translucent,
    Empty,
    Hint,
    /// Solid only in the hulls of the mask; invisible in hull 0 unless
    /// bit 0 is set.
    Clip { hull_mask: u8 },
    /// Contributes a center of mass to the owning entity, nothing else.
    Origin,
    /// Overrides the owning entity's bounding box, nothing else.
    BoundingBox,
}

impl BrushContents {
    pub fn to_leaf_contents(self) -> Contents {
        match self {
            Self::Solid | Self::Clip { .. } => Contents::Solid,
            Self::Water(c) => c,
            Self::Sky => Contents::Sky,
            Self::Translucent => Contents::Translucent,
            Self::Empty | Self::Hint => Contents::Empty,
            Self::Origin => Contents::Origin,
            Self::BoundingBox => Contents::Empty,
        }
    }

    /// Whether the brush occupies the given hull at all.
    pub fn in_hull(self, hull: usize) -> bool {
        match self {
            Self::Clip { hull_mask } => hull_mask & (1 << hull) != 0,
            Self::Origin | Self::BoundingBox | Self::Hint | Self::Empty => hull == 0,
            // non-solid contents never block movement
            Self::Water(_) | Self::Translucent => hull == 0,
            Self::Solid | Self::Sky => true,
        }
    }
}

/// Contents contributed by a single texture name; None for textures
/// that do not vote (null, skip, bevel, hints mixed into solid).
pub fn side_contents(name: &TextureName) -> Option<BrushContents> {
    if name.is_origin() {
        return Some(BrushContents::Origin);
    }
    if name.is_bounding_box() {
        return Some(BrushContents::BoundingBox);
    }
    if let Some(hull) = name.clip_hull_number() {
        return Some(BrushContents::Clip {
            hull_mask: 1 << hull,
        });
    }
    if name.is_any_clip() {
        // plain clip blocks every expansion hull but not hull 0
        return Some(BrushContents::Clip { hull_mask: 0b1110 });
    }
    if name.is_any_sky() {
        return Some(BrushContents::Sky);
    }
    if name.is_any_content_override() {
        if name.is_content_empty() {
            return Some(BrushContents::Empty);
        }
        if name.is_content_water() {
            return Some(BrushContents::Water(Contents::Water));
        }
        if name.is_content_sky() {
            return Some(BrushContents::Sky);
        }
        return Some(BrushContents::Solid);
    }
    if name.is_lava() {
        return Some(BrushContents::Water(Contents::Lava));
    }
    if name.is_slime() {
        return Some(BrushContents::Water(Contents::Slime));
    }
    if name.is_water() {
        let contents = match name.current_direction() {
            Some(0) => Contents::Current0,
            Some(1) => Contents::Current90,
            Some(2) => Contents::Current180,
            Some(3) => Contents::Current270,
            Some(4) => Contents::CurrentUp,
            Some(5) => Contents::CurrentDown,
            _ => Contents::Water,
        };
        return Some(BrushContents::Water(contents));
    }
    if name.is_translucent() {
        return Some(BrushContents::Translucent);
    }
    if name.is_ordinary_hint() {
        return Some(BrushContents::Hint);
    }
    // null, skip, bevel families and solid textures do not vote against
    // whatever the rest of the brush says
    if name.is_any_null() || name.is_skip() || name.is_any_bevel() || name.marks_discardable_faces()
    {
        return None;
    }
    Some(BrushContents::Solid)
}

#[derive(Debug, Clone)]
pub struct CsgSide {
    /// Outward-facing plane, registry index.
    pub plane: u16,
    pub texture: TextureName,
    pub axes_source: usize,
    /// Bevel sides only participate in clipping hulls.
    pub bevel: bool,
    pub winding: Winding,
}

#[derive(Debug, Clone)]
pub struct CsgBrush {
    pub entity: usize,
    pub brush: usize,
    pub contents: BrushContents,
    pub sides: Vec<CsgSide>,
    pub bounds: BoundingBox,
}

/// Interns the side planes of a parsed brush and decides its contents.
pub fn prepare_brush(
    entity: usize,
    brush_index: usize,
    brush: &map::Brush,
    planes: &mut PlaneRegistry,
) -> Result<CsgBrush, CsgError> {
    let mut sides = Vec::with_capacity(brush.sides.len());
    let mut contents: Option<(BrushContents, TextureName)> = None;

    for (side_index, side) in brush.sides.iter().enumerate() {
        let texture =
            TextureName::new(&side.texture_name).map_err(|source| CsgError::BadTextureName {
                entity,
                brush: brush_index,
                source,
            })?;

        let Some(plane) = planes.intern_from_points(side.p1, side.p2, side.p3) else {
            return Err(CsgError::DegenerateSide {
                entity,
                brush: brush_index,
                side: side_index,
            });
        };

        // a clip mask accumulates across sides instead of disputing
        match (contents.as_mut(), side_contents(&texture)) {
            (_, None) => {}
            (None, Some(vote)) => contents = Some((vote, texture)),
            (Some((current, _)), Some(vote)) => match (current, vote) {
                (BrushContents::Clip { hull_mask }, BrushContents::Clip { hull_mask: add }) => {
                    *hull_mask |= add;
                }
                (current, vote) if *current == vote => {}
                (current, _) => {
                    return Err(CsgError::MixedContents {
                        entity,
                        brush: brush_index,
                        first: contents_name(*current).to_string(),
                        second: texture.to_string(),
                    });
                }
            },
        }

        sides.push(CsgSide {
            plane,
            texture,
            axes_source: side_index,
            bevel: texture.is_any_bevel() && !texture.is_bevel_hint(),
            winding: Winding::default(),
        });
    }

    let contents = contents.map(|(c, _)| c).unwrap_or(BrushContents::Solid);

    let mut prepared = CsgBrush {
        entity,
        brush: brush_index,
        contents,
        sides,
        bounds: BoundingBox::empty(),
    };

    build_windings(&mut prepared, planes)?;

    Ok(prepared)
}

fn contents_name(contents: BrushContents) -> &'static str {
    match contents {
        BrushContents::Solid => "solid",
        BrushContents::Water(_) => "water",
        BrushContents::Sky => "sky",
        BrushContents::Translucent => "translucent",
        BrushContents::Empty => "empty",
        BrushContents::Hint => "hint",
        BrushContents::Clip { .. } => "clip",
        BrushContents::Origin => "origin",
        BrushContents::BoundingBox => "boundingbox",
    }
}

/// Rebuilds every side winding as the plane quad chopped by all other
/// side planes. Sides that vanish are dropped; a brush left with fewer
/// than four sides was degenerate to begin with.
pub fn build_windings(brush: &mut CsgBrush, planes: &PlaneRegistry) -> Result<(), CsgError> {
    let side_planes: Vec<u16> = brush.sides.iter().map(|s| s.plane).collect();

    let mut bounds = BoundingBox::empty();

    for (i, side) in brush.sides.iter_mut().enumerate() {
        let plane = planes.get(side.plane);
        let mut winding = Winding::from_plane(plane.normal, plane.dist);

        for (j, &other) in side_planes.iter().enumerate() {
            if i == j {
                continue;
            }
            // keep what is behind every other outward plane
            let back = planes.get(planes.back(other));
            if !winding.chop_in_place(back.normal, back.dist, ON_EPSILON) {
                break;
            }
        }

        side.winding = winding;
        for &p in &side.winding.points {
            bounds.add_point(p);
        }
    }

    brush.sides.retain(|s| s.winding.is_valid());

    if brush.sides.len() < 4 {
        return Err(CsgError::DegenerateBrush {
            entity: brush.entity,
            brush: brush.brush,
            sides: brush.sides.len(),
        });
    }

    brush.bounds = bounds;
    Ok(())
}

/// How strongly a brush's contents claim the space they occupy; a
/// face buried in equal-or-stronger contents is never visible.
pub fn occlusion_rank(contents: BrushContents) -> u8 {
    match contents {
        BrushContents::Solid | BrushContents::Sky => 3,
        BrushContents::Water(_) => 2,
        BrushContents::Translucent => 1,
        _ => 0,
    }
}

/// Splits a winding into the parts outside the convex volume bounded
/// by `volume_planes` (outward normals). A face flush against the
/// volume's boundary counts as inside.
pub fn clip_to_outside(
    winding: Winding,
    volume_planes: &[u16],
    planes: &PlaneRegistry,
) -> Vec<Winding> {
    let mut outside = Vec::new();
    let mut inside = winding;

    for &p in volume_planes {
        let plane = planes.get(p);
        let (front, back) = inside.clip(plane.normal, plane.dist, ON_EPSILON);

        if let Some(front) = front {
            outside.push(front);
        }
        match back {
            Some(back) => inside = back,
            None => return outside,
        }
    }

    // whatever is left lies within the volume and is dropped
    outside
}

/// Culls the parts of a side buried inside sibling brushes. Returns
/// the surviving fragments, possibly more than one.
///
/// Coplanar cases follow the classic ordering rules: a face flush
/// against a neighbor's opposing boundary is interior and dies; of two
/// same-facing coincident faces, the lower brush index keeps its copy.
pub fn cull_side_against_neighbors(
    side: &CsgSide,
    owner: &CsgBrush,
    neighbors: &[CsgBrush],
    planes: &PlaneRegistry,
) -> Vec<Winding> {
    let mut fragments = vec![side.winding.clone()];

    for neighbor in neighbors {
        if neighbor.entity != owner.entity || neighbor.brush == owner.brush {
            continue;
        }
        if occlusion_rank(neighbor.contents) < occlusion_rank(owner.contents) {
            continue;
        }
        if !neighbor.bounds.intersects(&owner.bounds) {
            continue;
        }

        let coplanar = neighbor
            .sides
            .iter()
            .find(|s| s.plane & !1 == side.plane & !1)
            .map(|s| s.plane == side.plane);

        // same-facing coincident faces: the lower brush index wins
        if coplanar == Some(true) && owner.brush < neighbor.brush {
            continue;
        }

        // when coplanar, the face sits on that boundary plane; clip by
        // the remaining planes only
        let volume: Vec<u16> = neighbor
            .sides
            .iter()
            .map(|s| s.plane)
            .filter(|&p| coplanar.is_none() || p & !1 != side.plane & !1)
            .collect();

        fragments = fragments
            .into_iter()
            .flat_map(|f| clip_to_outside(f, &volume, planes))
            .filter(|f| f.is_valid())
            .collect();

        if fragments.is_empty() {
            break;
        }
    }

    fragments
}

/// The brush's sides pushed outward for a collision hull, with axial
/// bevels over the expanded bounds so box sweeps cannot snag on
/// unbeveled corners.
pub fn expand_brush_for_hull(
    brush: &CsgBrush,
    hull: usize,
    planes: &mut PlaneRegistry,
) -> Result<Vec<(u16, Winding)>, CsgError> {
    let hull_size = DVec3::from_array(HULL_SIZES[hull]);

    let mut expanded_planes: Vec<u16> = Vec::with_capacity(brush.sides.len() + 6);

    for side in &brush.sides {
        let plane = planes.get(side.plane);
        let (normal, dist) = (plane.normal, plane.dist);
        let expansion = normal.abs().dot(hull_size);
        let index = planes.intern(normal, dist + expansion);
        if !expanded_planes.contains(&index) {
            expanded_planes.push(index);
        }
    }

    // axial bevels at the expanded bounds, for the directions no side
    // plane already covers
    let expanded_bounds = BoundingBox {
        mins: brush.bounds.mins - hull_size,
        maxs: brush.bounds.maxs + hull_size,
    };

    for axis in 0..3 {
        for positive in [true, false] {
            let mut normal = DVec3::ZERO;
            normal[axis] = if positive { 1.0 } else { -1.0 };

            let covered = expanded_planes.iter().any(|&p| {
                (planes.get(p).normal - normal).abs().max_element() < crate::math::NORMAL_EPSILON
            });
            if covered {
                continue;
            }

            let dist = if positive {
                expanded_bounds.maxs[axis]
            } else {
                -expanded_bounds.mins[axis]
            };
            let index = planes.intern(normal, dist);
            if !expanded_planes.contains(&index) {
                expanded_planes.push(index);
            }
        }
    }

    // windings over the expanded plane set
    let mut result = Vec::with_capacity(expanded_planes.len());
    for (i, &plane_index) in expanded_planes.iter().enumerate() {
        let plane = planes.get(plane_index);
        let mut winding = Winding::from_plane(plane.normal, plane.dist);

        for (j, &other) in expanded_planes.iter().enumerate() {
            if i == j {
                continue;
            }
            let back_index = planes.back(other);
            let back = planes.get(back_index).clone();
            if !winding.chop_in_place(back.normal, back.dist, ON_EPSILON) {
                break;
            }
        }

        if winding.is_valid() {
            result.push((plane_index, winding));
        }
    }

    if result.len() < 4 {
        return Err(CsgError::DegenerateBrush {
            entity: brush.entity,
            brush: brush.brush,
            sides: result.len(),
        });
    }

    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::csg::test_support::cube_brush;

    #[test]
    fn cube_windings_and_bounds() {
        let mut planes = PlaneRegistry::new();
        let brush = cube_brush(DVec3::ZERO, 64.0, "stone");
        let prepared = prepare_brush(0, 0, &brush, &mut planes).unwrap();

        assert_eq!(prepared.sides.len(), 6);
        assert_eq!(prepared.contents, BrushContents::Solid);
        assert_eq!(prepared.bounds.mins, DVec3::splat(-64.0));
        assert_eq!(prepared.bounds.maxs, DVec3::splat(64.0));

        for side in &prepared.sides {
            assert_eq!(side.winding.size(), 4);
            assert!((side.winding.area() - 128.0 * 128.0).abs() < 1e-6);
        }
    }

    #[test]
    fn water_cube() {
        let mut planes = PlaneRegistry::new();
        let brush = cube_brush(DVec3::ZERO, 32.0, "!water1");
        let prepared = prepare_brush(0, 0, &brush, &mut planes).unwrap();
        assert_eq!(prepared.contents, BrushContents::Water(Contents::Water));
        assert!(!prepared.contents.in_hull(1));
    }

    #[test]
    fn clip_masks_accumulate() {
        let mut planes = PlaneRegistry::new();
        let mut brush = cube_brush(DVec3::ZERO, 32.0, "cliphull1");
        brush.sides[0].texture_name = "cliphull3".to_string();
        let prepared = prepare_brush(0, 0, &brush, &mut planes).unwrap();
        assert_eq!(
            prepared.contents,
            BrushContents::Clip {
                hull_mask: (1 << 1) | (1 << 3)
            }
        );
        assert!(prepared.contents.in_hull(1));
        assert!(!prepared.contents.in_hull(2));
    }

    #[test]
    fn mixed_contents_is_an_error() {
        let mut planes = PlaneRegistry::new();
        let mut brush = cube_brush(DVec3::ZERO, 32.0, "stone");
        brush.sides[2].texture_name = "!water".to_string();
        let err = prepare_brush(0, 7, &brush, &mut planes).unwrap_err();
        assert!(matches!(err, CsgError::MixedContents { brush: 7, .. }));
    }

    #[test]
    fn null_sides_do_not_dispute() {
        let mut planes = PlaneRegistry::new();
        let mut brush = cube_brush(DVec3::ZERO, 32.0, "sky");
        brush.sides[0].texture_name = "NULL".to_string();
        let prepared = prepare_brush(0, 0, &brush, &mut planes).unwrap();
        assert_eq!(prepared.contents, BrushContents::Sky);
    }

    #[test]
    fn hull_expansion_grows_bounds() {
        let mut planes = PlaneRegistry::new();
        let brush = cube_brush(DVec3::ZERO, 32.0, "stone");
        let prepared = prepare_brush(0, 0, &brush, &mut planes).unwrap();

        let expanded = expand_brush_for_hull(&prepared, 1, &mut planes).unwrap();
        assert_eq!(expanded.len(), 6);

        let mut bounds = BoundingBox::empty();
        for (_, w) in &expanded {
            for &p in &w.points {
                bounds.add_point(p);
            }
        }
        assert_eq!(bounds.mins, DVec3::new(-48.0, -48.0, -68.0));
        assert_eq!(bounds.maxs, DVec3::new(48.0, 48.0, 68.0));
    }
}
