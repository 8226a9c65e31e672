use glam::DVec3;

use hltools::{
    cli::{self, parse_common, take_flag, take_map_path, take_parsed, take_value},
    logger,
    rad::{
        self,
        compress::{FloatFormat, VectorFormat},
        RadOptions,
    },
    settings, threads,
};

const USAGE: &str = "\
usage: hlrad [options] <mapname>
  -threads N       worker thread count
  -low|-normal|-high  process priority
  -dev LEVEL       developer message level
  -verbose -nolog -chart -estimate
  -bounce N        bounce iterations (default 8)
  -chop F          patch grid size (default 64)
  -texchop F       texlight patch grid size (default 32)
  -smooth F        smoothing angle in degrees (default 50)
  -gamma F -scale F -fade F -blur F
  -ambient R G B   ambient floor color
  -minlight N      minimum output level
  -softsky         jittered sun sampling
  -extra           2x2 supersampling
  -rgbtransfers    colored light transport
  -transfercompress {32|16|8}
  -rgbtransfercompress {96|48|32|24}
  -customshadowwithbounce
  -incremental     cache transfers in <map>.inc";

fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    args = settings::apply_settings_file("hlrad", args);

    let common = parse_common(&mut args);
    let defaults = RadOptions::default();

    // -ambient takes three color values
    let ambient = match args.iter().position(|a| a.eq_ignore_ascii_case("-ambient")) {
        Some(at) => {
            if at + 3 >= args.len() {
                eprintln!("Error: -ambient needs three color values");
                std::process::exit(1);
            }
            let components: Vec<f64> = args[at + 1..at + 4]
                .iter()
                .map(|v| v.parse::<f64>())
                .collect::<Result<_, _>>()
                .unwrap_or_else(|_| {
                    eprintln!("Error: -ambient needs three color values");
                    std::process::exit(1);
                });
            args.drain(at..at + 4);
            DVec3::new(components[0], components[1], components[2])
        }
        None => DVec3::ZERO,
    };

    let transfer_compress = match take_value(&mut args, "-transfercompress") {
        None => defaults.transfer_compress,
        Some(v) => FloatFormat::parse(&v).unwrap_or_else(|| {
            eprintln!("Error: -transfercompress must be 32, 16 or 8");
            std::process::exit(1);
        }),
    };
    let rgb_transfer_compress = match take_value(&mut args, "-rgbtransfercompress") {
        None => defaults.rgb_transfer_compress,
        Some(v) => VectorFormat::parse(&v).unwrap_or_else(|| {
            eprintln!("Error: -rgbtransfercompress must be 96, 48, 32 or 24");
            std::process::exit(1);
        }),
    };

    let options = RadOptions {
        threads: common.threads,
        estimate: common.estimate,
        bounces: take_parsed::<usize>(&mut args, "-bounce").unwrap_or(defaults.bounces),
        chop: take_parsed::<f64>(&mut args, "-chop").unwrap_or(defaults.chop),
        texchop: take_parsed::<f64>(&mut args, "-texchop").unwrap_or(defaults.texchop),
        smooth: take_parsed::<f64>(&mut args, "-smooth").unwrap_or(defaults.smooth),
        gamma: take_parsed::<f64>(&mut args, "-gamma").unwrap_or(defaults.gamma),
        scale: take_parsed::<f64>(&mut args, "-scale").unwrap_or(defaults.scale),
        ambient,
        minlight: take_parsed::<u8>(&mut args, "-minlight").unwrap_or(defaults.minlight),
        soft_sky: take_flag(&mut args, "-softsky"),
        blur: take_parsed::<f64>(&mut args, "-blur").unwrap_or(defaults.blur),
        fade: take_parsed::<f64>(&mut args, "-fade").unwrap_or(defaults.fade),
        extra: take_flag(&mut args, "-extra"),
        rgb_transfers: take_flag(&mut args, "-rgbtransfers"),
        transfer_compress,
        rgb_transfer_compress,
        custom_shadow_with_bounce: take_flag(&mut args, "-customshadowwithbounce"),
        incremental: take_flag(&mut args, "-incremental"),
    };

    let map_path = take_map_path(&mut args, USAGE);

    logger::init("hlrad", Some(&map_path), common.nolog, common.verbose, common.dev);
    threads::set_priority(common.priority);

    let result = rad::run(&map_path, &options).map(|_| ());
    cli::finish(result, common.chart, Some(&map_path.with_extension("bsp")));
}
