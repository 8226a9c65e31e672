use hltools::{
    bspbuild::{self, BspOptions, PickSplit},
    cli::{self, parse_common, take_flag, take_map_path, take_parsed, take_value},
    logger, settings, threads,
};

const USAGE: &str = "\
usage: hlbsp [options] <mapname>
  -threads N       worker thread count
  -low|-normal|-high  process priority
  -dev LEVEL       developer message level
  -verbose -nolog -chart -estimate
  -noopt           keep unreferenced planes and texinfo
  -notjunc         skip t-junction fixup
  -nobrink         skip clipnode brink repair
  -leakonly        stop after the leak check
  -subdivide N     face subdivision limit (64..512)
  -picksplit P     splitter tie-break: first | balanced";

fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    args = settings::apply_settings_file("hlbsp", args);

    let common = parse_common(&mut args);

    let pick_split = match take_value(&mut args, "-picksplit").as_deref() {
        None | Some("first") => PickSplit::First,
        Some("balanced") => PickSplit::Balanced,
        Some(other) => {
            eprintln!("Error: unknown -picksplit policy `{}`", other);
            std::process::exit(1);
        }
    };

    let options = BspOptions {
        threads: common.threads,
        no_opt: take_flag(&mut args, "-noopt"),
        no_tjunc: take_flag(&mut args, "-notjunc"),
        no_brink: take_flag(&mut args, "-nobrink"),
        leak_only: take_flag(&mut args, "-leakonly"),
        subdivide: take_parsed::<f64>(&mut args, "-subdivide")
            .unwrap_or(240.0)
            .clamp(64.0, 512.0),
        pick_split,
    };

    let map_path = take_map_path(&mut args, USAGE);

    logger::init("hlbsp", Some(&map_path), common.nolog, common.verbose, common.dev);
    threads::set_priority(common.priority);

    let result = bspbuild::run(&map_path, &options).map(|_| ());
    cli::finish(result, common.chart, Some(&map_path.with_extension("bsp")));
}
