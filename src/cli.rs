//! Shared command-line handling for the stage executables.
//!
//! The historical interface is single-dash flags with optional values,
//! so parsing is a hand-rolled scan: each helper removes the flags it
//! recognizes from the argument list, and whatever remains must be the
//! map name.

use std::path::PathBuf;

use crate::{
    logger::DeveloperLevel,
    threads::{default_thread_count, ThreadPriority},
};

#[derive(Debug, Clone)]
pub struct CommonOptions {
    pub threads: usize,
    pub priority: ThreadPriority,
    pub verbose: bool,
    pub nolog: bool,
    pub chart: bool,
    pub estimate: bool,
    pub dev: DeveloperLevel,
}

/// Removes `-flag` from the list if present.
pub fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    match args.iter().position(|a| a.eq_ignore_ascii_case(flag)) {
        Some(at) => {
            args.remove(at);
            true
        }
        None => false,
    }
}

/// Removes `-flag value` and returns the value.
pub fn take_value(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let at = args.iter().position(|a| a.eq_ignore_ascii_case(flag))?;
    if at + 1 >= args.len() {
        eprintln!("Error: {} needs a value", flag);
        std::process::exit(1);
    }
    let value = args.remove(at + 1);
    args.remove(at);
    Some(value)
}

/// Removes `-flag N` parsed as the given type, exiting on garbage.
pub fn take_parsed<T: std::str::FromStr>(args: &mut Vec<String>, flag: &str) -> Option<T> {
    let value = take_value(args, flag)?;
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            eprintln!("Error: cannot parse {} value `{}`", flag, value);
            std::process::exit(1);
        }
    }
}

/// The flags every stage shares.
pub fn parse_common(args: &mut Vec<String>) -> CommonOptions {
    let threads = take_parsed::<usize>(args, "-threads").unwrap_or_else(default_thread_count);

    let priority = if take_flag(args, "-low") {
        ThreadPriority::Low
    } else if take_flag(args, "-high") {
        ThreadPriority::High
    } else {
        take_flag(args, "-normal");
        ThreadPriority::Normal
    };

    let dev = take_value(args, "-dev")
        .map(|v| {
            DeveloperLevel::parse(&v).unwrap_or_else(|| {
                eprintln!("Error: unknown developer level `{}`", v);
                std::process::exit(1);
            })
        })
        .unwrap_or_default();

    CommonOptions {
        threads,
        priority,
        verbose: take_flag(args, "-verbose"),
        nolog: take_flag(args, "-nolog"),
        chart: take_flag(args, "-chart"),
        estimate: take_flag(args, "-estimate"),
        dev,
    }
}

/// The remaining non-flag argument as the map path, extension
/// normalized away.
pub fn take_map_path(args: &mut Vec<String>, usage: &str) -> PathBuf {
    let positional: Vec<String> = args.drain(..).collect();

    let mut map: Option<String> = None;
    for arg in positional {
        if arg.starts_with('-') {
            eprintln!("Error: unknown option `{}`\n{}", arg, usage);
            std::process::exit(1);
        }
        if map.is_some() {
            eprintln!("Error: more than one map name\n{}", usage);
            std::process::exit(1);
        }
        map = Some(arg);
    }

    let Some(map) = map else {
        eprintln!("{}", usage);
        std::process::exit(1);
    };

    let mut path = PathBuf::from(map);
    if path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("map") || e.eq_ignore_ascii_case("bsp"))
    {
        path.set_extension("");
    }
    path.set_extension("map");
    path
}

/// Stage epilogue: chart, error reporting, exit code.
pub fn finish(result: eyre::Result<()>, chart: bool, bsp_path: Option<&std::path::Path>) -> ! {
    if chart {
        if let Some(path) = bsp_path {
            if let Ok(bsp) = bsp::Bsp::from_file(path) {
                crate::logger::log_chart(&bsp);
            }
        }
    }

    match result {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            log::error!("{:#}", error);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_are_removed_as_parsed() {
        let mut a = args(&["-threads", "4", "-verbose", "de_dust", "-chart"]);
        let common = parse_common(&mut a);

        assert_eq!(common.threads, 4);
        assert!(common.verbose);
        assert!(common.chart);
        assert!(!common.nolog);
        assert_eq!(a, args(&["de_dust"]));
    }

    #[test]
    fn dev_level_parses() {
        let mut a = args(&["-dev", "spam"]);
        let common = parse_common(&mut a);
        assert_eq!(common.dev, DeveloperLevel::Spam);
        assert!(a.is_empty());
    }

    #[test]
    fn map_path_normalizes_extension() {
        let mut a = args(&["de_dust.bsp"]);
        let path = take_map_path(&mut a, "usage");
        assert_eq!(path, PathBuf::from("de_dust.map"));

        let mut a = args(&["de_dust"]);
        let path = take_map_path(&mut a, "usage");
        assert_eq!(path, PathBuf::from("de_dust.map"));
    }
}
