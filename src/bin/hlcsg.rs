use hltools::{
    cli::{self, parse_common, take_flag, take_map_path, take_value},
    csg::{self, CsgOptions},
    logger, settings, threads,
};

const USAGE: &str = "\
usage: hlcsg [options] <mapname>
  -threads N       worker thread count
  -low|-normal|-high  process priority
  -dev LEVEL       developer message level
  -verbose -nolog -chart -estimate
  -nonulltex       keep NULL faces visible
  -noclip          skip the clipping hulls
  -nohull2         skip the large-monster hull
  -wadinclude P    extra wad to resolve textures from";

fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    args = settings::apply_settings_file("hlcsg", args);

    let common = parse_common(&mut args);

    let mut options = CsgOptions {
        threads: common.threads,
        no_null_tex: take_flag(&mut args, "-nonulltex"),
        no_clip: take_flag(&mut args, "-noclip"),
        no_hull2: take_flag(&mut args, "-nohull2"),
        wad_paths: vec![],
    };
    while let Some(wad) = take_value(&mut args, "-wadinclude") {
        options.wad_paths.push(wad.into());
    }

    let map_path = take_map_path(&mut args, USAGE);

    logger::init("hlcsg", Some(&map_path), common.nolog, common.verbose, common.dev);
    threads::set_priority(common.priority);

    let result = csg::run(&map_path, &options).map(|_| ());
    cli::finish(result, common.chart, Some(&map_path.with_extension("bsp")));
}
