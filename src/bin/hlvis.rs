use hltools::{
    cli::{self, parse_common, take_flag, take_map_path, take_parsed},
    logger, settings, threads,
    vis::{self, VisOptions},
};

const USAGE: &str = "\
usage: hlvis [options] <mapname>
  -threads N       worker thread count
  -low|-normal|-high  process priority
  -dev LEVEL       developer message level
  -verbose -nolog -chart -estimate
  -full            tightest PVS (extra separator pass)
  -fast            base visibility only
  -maxdistance N   cull visibility beyond N units
  -nofixprt        leave the portal file untouched";

fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    args = settings::apply_settings_file("hlvis", args);

    let common = parse_common(&mut args);

    let options = VisOptions {
        threads: common.threads,
        full: take_flag(&mut args, "-full"),
        fast: take_flag(&mut args, "-fast"),
        max_distance: take_parsed::<f64>(&mut args, "-maxdistance").unwrap_or(0.0),
        no_fixprt: take_flag(&mut args, "-nofixprt"),
        estimate: common.estimate,
    };

    if options.full && options.fast {
        eprintln!("Error: -full and -fast are mutually exclusive");
        std::process::exit(1);
    }

    let map_path = take_map_path(&mut args, USAGE);

    logger::init("hlvis", Some(&map_path), common.nolog, common.verbose, common.dev);
    threads::set_priority(common.priority);

    let result = vis::run(&map_path, &options);
    cli::finish(result, common.chart, Some(&map_path.with_extension("bsp")));
}
