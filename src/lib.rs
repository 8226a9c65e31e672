pub mod bspbuild;
pub mod cli;
pub mod csg;
pub mod logger;
pub mod math;
pub mod planes;
pub mod rad;
pub mod ripent;
pub mod settings;
pub mod texinfo;
pub mod threads;
pub mod vis;
pub mod winding;

#[cfg(test)]
mod pipeline_test {
    //! Cross-stage scenarios running the whole toolchain in memory.

    use glam::DVec3;

    use bsp::Contents;

    use crate::bspbuild::{self, BspOptions};
    use crate::csg::test_support::*;
    use crate::csg::{compile_map, CsgOptions};
    use crate::rad::{self, RadOptions};

    /// Full csg -> bsp pipeline over an in-memory map.
    fn build(map: &map::Map) -> (bsp::Bsp, bspbuild::BuildSummary) {
        let out = compile_map(map, &CsgOptions::default()).unwrap();
        let mut built = out.bsp;
        let summary =
            bspbuild::compile(&mut built, &out.hull_faces, &BspOptions::default(), None).unwrap();
        (built, summary)
    }

    #[test]
    fn cube_in_shell_with_light() {
        // a solid cube wrapped in a hollow shell, one light between
        let mut map = worldspawn_with(hollow_box(
            DVec3::splat(-512.0),
            DVec3::splat(512.0),
            32.0,
            "wall",
        ));
        map.entities[0]
            .brushes
            .as_mut()
            .unwrap()
            .push(cube_brush(DVec3::ZERO, 256.0, "crate"));
        map.entities.push(point_entity(
            "light",
            DVec3::new(0.0, 0.0, 400.0),
            &[("_light", "255 255 255 2000000")],
        ));
        map.entities.push(point_entity(
            "info_player_start",
            DVec3::new(0.0, 400.0, 0.0),
            &[],
        ));

        let (mut built, summary) = build(&map);
        assert!(!summary.leaked);
        assert_eq!(built.models.len(), 1);

        // coarse patches keep the transfer matrix small here
        let options = RadOptions {
            chop: 128.0,
            texchop: 128.0,
            bounces: 2,
            ..Default::default()
        };
        let rad_summary = rad::compile(&mut built, &options, None).unwrap();
        assert!(rad_summary.patches > 0);
        assert!(rad_summary.lightmap_samples > 0);

        // the cube's top face is lit from directly above
        let top_sample_max = built
            .lightmap
            .iter()
            .map(|rgb| rgb[0])
            .max()
            .unwrap();
        assert!(top_sample_max > 0);

        // round trip through the container stays identical
        let bytes = built.write_to_bytes();
        let reread = bsp::Bsp::from_bytes(&bytes).unwrap();
        assert_eq!(reread.write_to_bytes(), bytes);
    }

    #[test]
    fn sky_occluder_scenario() {
        // sealed room whose ceiling is sky; a sun shines straight down
        let mut map = worldspawn_with(hollow_box(
            DVec3::splat(-256.0),
            DVec3::splat(256.0),
            32.0,
            "wall",
        ));
        // retexture the ceiling slab as sky
        {
            let brushes = map.entities[0].brushes.as_mut().unwrap();
            for side in brushes[1].sides.iter_mut() {
                side.texture_name = "sky".to_string();
            }
        }
        map.entities.push(point_entity(
            "light_environment",
            DVec3::new(0.0, 0.0, 200.0),
            &[("_light", "255 255 200 2000"), ("pitch", "-90")],
        ));
        map.entities
            .push(point_entity("info_player_start", DVec3::ZERO, &[]));

        let (mut built, summary) = build(&map);

        // the void can flood in through the sky ceiling, but that is
        // not a leak, and the playable interior must not get filled
        assert!(!summary.leaked);
        let inside = built.leaf_at(glam::Vec3::ZERO);
        assert_ne!(inside, 0);
        assert_eq!(built.leaves[inside].contents, Contents::Empty);

        // a point just under the sky ceiling sees sky straight up
        assert!(rad::lightmap::sees_sky(
            &built,
            glam::DVec3::new(0.0, 0.0, 200.0),
            glam::DVec3::new(0.0, 0.0, -1.0),
        ));

        let options = RadOptions {
            chop: 128.0,
            texchop: 128.0,
            bounces: 1,
            ..Default::default()
        };
        rad::compile(&mut built, &options, None).unwrap();

        // the floor receives sun
        let lit = built
            .lightmap
            .iter()
            .any(|rgb| rgb[0] > 0 || rgb[1] > 0 || rgb[2] > 0);
        assert!(lit);
    }

    #[test]
    fn clip_brush_scenario() {
        let mut map = worldspawn_with(hollow_box(
            DVec3::splat(-256.0),
            DVec3::splat(256.0),
            32.0,
            "wall",
        ));
        map.entities
            .push(point_entity("info_player_start", DVec3::ZERO, &[]));

        let (bare, _) = build(&map);

        map.entities[0]
            .brushes
            .as_mut()
            .unwrap()
            .push(cube_brush(DVec3::new(0.0, 0.0, -100.0), 64.0, "CLIP"));
        let (clipped, _) = build(&map);

        // no visible faces added, but every expansion hull grew
        assert_eq!(bare.faces.len(), clipped.faces.len());
        assert!(clipped.clipnodes.len() > bare.clipnodes.len());

        // hull 0 tree has no trace of the clip brush: a point inside
        // it is still in an empty leaf
        let leaf = clipped.leaf_at(glam::Vec3::new(0.0, 0.0, -100.0));
        assert_eq!(clipped.leaves[leaf].contents, Contents::Empty);
    }

    #[test]
    fn tjunction_seam_scenario() {
        // two slabs sharing an edge, one subdivided by a third slab
        let mut map = worldspawn_with(hollow_box(
            DVec3::splat(-256.0),
            DVec3::splat(256.0),
            32.0,
            "wall",
        ));
        {
            let brushes = map.entities[0].brushes.as_mut().unwrap();
            // a step wedged against the floor creating a t-junction on
            // the floor surface
            brushes.push(cube_brush_minmax(
                DVec3::new(-64.0, -256.0, -256.0),
                DVec3::new(64.0, 0.0, -224.0),
                "step",
            ));
        }
        map.entities
            .push(point_entity("info_player_start", DVec3::new(0.0, 0.0, 0.0), &[]));

        let out = compile_map(&map, &CsgOptions::default()).unwrap();
        let mut with_fix = out.bsp;
        let summary = bspbuild::compile(
            &mut with_fix,
            &out.hull_faces,
            &BspOptions::default(),
            None,
        )
        .unwrap();

        let out = compile_map(&map, &CsgOptions::default()).unwrap();
        let mut without_fix = out.bsp;
        bspbuild::compile(
            &mut without_fix,
            &out.hull_faces,
            &BspOptions {
                no_tjunc: true,
                ..Default::default()
            },
            None,
        )
        .unwrap();

        // the fix inserted vertices somewhere
        assert!(summary.tjunctions_fixed > 0);
        let sum_edges = |b: &bsp::Bsp| b.surf_edges.len();
        assert!(sum_edges(&with_fix) > sum_edges(&without_fix));
    }

    #[test]
    fn brink_staircase_scenario() {
        let mut map = worldspawn_with(hollow_box(
            DVec3::splat(-256.0),
            DVec3::splat(256.0),
            32.0,
            "wall",
        ));
        {
            let brushes = map.entities[0].brushes.as_mut().unwrap();
            // a tread on the floor meeting the wall
            brushes.push(cube_brush_minmax(
                DVec3::new(128.0, -256.0, -256.0),
                DVec3::new(256.0, 256.0, -240.0),
                "step",
            ));
        }
        map.entities
            .push(point_entity("info_player_start", DVec3::ZERO, &[]));

        let out = compile_map(&map, &CsgOptions::default()).unwrap();
        let mut with_brinks = out.bsp;
        let with_summary = bspbuild::compile(
            &mut with_brinks,
            &out.hull_faces,
            &BspOptions::default(),
            None,
        )
        .unwrap();

        let out = compile_map(&map, &CsgOptions::default()).unwrap();
        let mut without_brinks = out.bsp;
        bspbuild::compile(
            &mut without_brinks,
            &out.hull_faces,
            &BspOptions {
                no_brink: true,
                ..Default::default()
            },
            None,
        )
        .unwrap();

        // repairs became real clipnodes, exactly as many as reported
        if with_summary.partitions_added > 0 {
            assert!(with_brinks.clipnodes.len() > without_brinks.clipnodes.len());
        }

        // recompiling is idempotent
        let out = compile_map(&map, &CsgOptions::default()).unwrap();
        let mut again = out.bsp;
        let again_summary =
            bspbuild::compile(&mut again, &out.hull_faces, &BspOptions::default(), None).unwrap();
        assert_eq!(with_summary.partitions_added, again_summary.partitions_added);
        assert_eq!(with_brinks.write_to_bytes(), again.write_to_bytes());
    }
}
