use hltools::{
    cli::{parse_common, take_flag},
    logger, ripent, settings,
};

const USAGE: &str = "\
usage: ripent [options] <mapname.bsp>
  -export          entity lump -> <map>.ent
  -import          <map>.ent -> entity lump
  -textureexport   embedded textures -> <map>.wa_
  -textureimport   <map>.wa_ -> texture lump
  -parse           re-format entity text instead of copying bytes
  -verbose -nolog -dev LEVEL";

fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    args = settings::apply_settings_file("ripent", args);

    let common = parse_common(&mut args);

    let export = take_flag(&mut args, "-export");
    let import = take_flag(&mut args, "-import");
    let texture_export = take_flag(&mut args, "-textureexport");
    let texture_import = take_flag(&mut args, "-textureimport");
    let parse = take_flag(&mut args, "-parse");

    let positional: Vec<String> = args.drain(..).collect();
    let bsp_name = match positional.as_slice() {
        [name] if !name.starts_with('-') => name.clone(),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    };
    let mut bsp_path = std::path::PathBuf::from(bsp_name);
    bsp_path.set_extension("bsp");

    logger::init("ripent", Some(&bsp_path), common.nolog, common.verbose, common.dev);

    let result = if export {
        ripent::export_entities(&bsp_path, parse)
    } else if import {
        ripent::import_entities(&bsp_path, parse)
    } else if texture_export {
        ripent::export_textures(&bsp_path)
    } else if texture_import {
        ripent::import_textures(&bsp_path)
    } else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            log::error!("{:#}", error);
            std::process::exit(1);
        }
    }
}
