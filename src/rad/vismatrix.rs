//! Patch-to-patch visibility.
//!
//! The matrix is triangular (visibility is mutual) and sparse: a row
//! holds (byte-offset, mask) runs like the leaf PVS does. Rows build
//! per patch by walking the leaf PVS first, then line-testing the
//! surviving candidates, optionally against the shadow meshes too.

use bsp::Bsp;

use crate::{
    threads::run_threads_on,
    vis::sparse::SparseRow,
};

use super::{meshtrace::ShadowMesh, patch::PatchArena, trace};

pub struct VisMatrix {
    rows: Vec<SparseRow>,
}

impl VisMatrix {
    /// Mutual visibility; callers may ask in either order.
    pub fn check(&self, a: usize, b: usize) -> bool {
        if a == b {
            return true;
        }
        let (x, y) = if a < b { (a, b) } else { (b, a) };
        self.rows[x].get(y)
    }

    pub fn memory_bytes(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.count_ones().div_ceil(8) * 5)
            .sum()
    }
}

/// Leaf-level PVS lookup for the patch prefilter.
fn leaf_sees(bsp: &Bsp, from_leaf: usize, to_leaf: usize) -> bool {
    if from_leaf == 0 || to_leaf == 0 {
        return false;
    }
    if from_leaf == to_leaf {
        return true;
    }
    if bsp.visibility.is_empty() {
        return true;
    }

    let vis_offset = bsp.leaves[from_leaf].vis_offset;
    if vis_offset < 0 {
        return true;
    }

    let leaf_count = bsp.models[0].vis_leaves_count as usize;
    let row = bsp::utils::decompress_vis(
        &bsp.visibility[vis_offset as usize..],
        leaf_count.div_ceil(8),
    );
    let bit = to_leaf - 1;
    row[bit >> 3] & (1 << (bit & 7)) != 0
}

/// Builds the upper-triangular visibility rows, in parallel over
/// source patches.
pub fn build(
    bsp: &Bsp,
    arena: &PatchArena,
    meshes: &[ShadowMesh],
    threads: usize,
    estimate: bool,
) -> VisMatrix {
    let patch_count = arena.patches.len();

    let rows: Vec<SparseRow> = run_threads_on(threads, patch_count, estimate, |i| {
        let patch = &arena.patches[i];
        let mut dense = vec![0u8; patch_count.div_ceil(8)];

        for (j, other) in arena.patches.iter().enumerate().skip(i + 1) {
            if patch.face == other.face {
                continue;
            }
            if !leaf_sees(bsp, patch.leaf, other.leaf) {
                continue;
            }

            // both patches must face each other
            let delta = other.origin - patch.origin;
            if delta.dot(patch.normal) <= 0.0 || -delta.dot(other.normal) <= 0.0 {
                continue;
            }

            if !trace::is_unobstructed(bsp, patch.origin, other.origin) {
                continue;
            }
            if meshes.iter().any(|m| m.blocks(patch.origin, other.origin)) {
                continue;
            }

            dense[j >> 3] |= 1 << (j & 7);
        }

        SparseRow::from_dense(&dense)
    });

    VisMatrix { rows }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bspbuild::{compile, BspOptions};
    use crate::csg::test_support::{hollow_box, point_entity, worldspawn_with};
    use crate::csg::{compile_map, CsgOptions};
    use crate::rad::patch::make_patches;
    use glam::DVec3;

    fn room() -> (Bsp, PatchArena) {
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

        let entities = bsp::entities::parse_entities(&bsp.entities).unwrap();
        let arena = make_patches(&bsp, &entities, 64.0, 32.0);
        (bsp, arena)
    }

    #[test]
    fn opposite_walls_see_each_other() {
        let (bsp, arena) = room();
        assert!(!arena.patches.is_empty());

        let matrix = build(&bsp, &arena, &[], 1, false);

        // find a floor patch and a ceiling patch near the middle
        let near_center = |p: &crate::rad::patch::Patch| p.origin.x.abs() < 48.0 && p.origin.y.abs() < 48.0;
        let floor = arena
            .patches
            .iter()
            .position(|p| p.normal.z > 0.9 && near_center(p))
            .unwrap();
        let ceiling = arena
            .patches
            .iter()
            .position(|p| p.normal.z < -0.9 && near_center(p))
            .unwrap();

        assert!(matrix.check(floor, ceiling));
        assert!(matrix.check(ceiling, floor));
    }

    #[test]
    fn same_face_patches_do_not_self_light() {
        let (bsp, arena) = room();
        let matrix = build(&bsp, &arena, &[], 1, false);

        let range = arena.face_patch_range(arena.patches[0].face);
        for a in range.clone() {
            for b in range.clone() {
                if a != b {
                    assert!(!matrix.check(a, b));
                }
            }
        }
    }

}
