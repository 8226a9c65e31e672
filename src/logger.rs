//! Compile logging.
//!
//! Everything a stage prints accumulates in `<map>.log`; errors are
//! additionally copied into `<map>.err`. Diagnostic chatter is gated by
//! the developer level so `-dev spam` can drown a map author in detail
//! without changing the code path.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::{Level, LevelFilter, Metadata, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DeveloperLevel {
    #[default]
    Disabled,
    Error,
    Warning,
    Message,
    Fluff,
    Spam,
    MegaSpam,
}

impl DeveloperLevel {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "disabled" | "0" => Self::Disabled,
            "error" | "1" => Self::Error,
            "warning" | "2" => Self::Warning,
            "message" | "3" => Self::Message,
            "fluff" | "4" => Self::Fluff,
            "spam" | "5" => Self::Spam,
            "megaspam" | "6" => Self::MegaSpam,
            _ => return None,
        })
    }
}

struct CompileLogger {
    verbose: bool,
    dev_level: DeveloperLevel,
    log_file: Option<Mutex<File>>,
    err_file: Mutex<Option<LazyErrFile>>,
}

struct LazyErrFile {
    path: PathBuf,
    file: Option<File>,
}

impl log::Log for CompileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match metadata.level() {
            Level::Error | Level::Warn | Level::Info => true,
            Level::Debug => self.verbose || self.dev_level >= DeveloperLevel::Message,
            Level::Trace => self.dev_level >= DeveloperLevel::Spam,
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = match record.level() {
            Level::Error => format!("Error: {}\n", record.args()),
            Level::Warn => format!("Warning: {}\n", record.args()),
            _ => format!("{}\n", record.args()),
        };

        eprint!("{}", line);

        if let Some(log_file) = &self.log_file {
            let mut file = log_file.lock().unwrap();
            let _ = file.write_all(line.as_bytes());
        }

        // the .err file only exists once something went wrong
        if record.level() == Level::Error {
            let mut err_file = self.err_file.lock().unwrap();
            if let Some(err) = err_file.as_mut() {
                if err.file.is_none() {
                    err.file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&err.path)
                        .ok();
                }
                if let Some(file) = err.file.as_mut() {
                    let _ = file.write_all(line.as_bytes());
                }
            }
        }
    }

    fn flush(&self) {
        if let Some(log_file) = &self.log_file {
            let _ = log_file.lock().unwrap().flush();
        }
    }
}

/// Installs the logger for one stage run. `map_path` is the map being
/// compiled; pass `None` (or set `nolog`) to skip the log files.
pub fn init(
    program: &'static str,
    map_path: Option<&Path>,
    nolog: bool,
    verbose: bool,
    dev_level: DeveloperLevel,
) {
    let log_file = match (map_path, nolog) {
        (Some(path), false) => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.with_extension("log"))
            .ok()
            .map(Mutex::new),
        _ => None,
    };

    let err_file = map_path.filter(|_| !nolog).map(|path| LazyErrFile {
        path: path.with_extension("err"),
        file: None,
    });

    let logger = CompileLogger {
        verbose,
        dev_level,
        log_file,
        err_file: Mutex::new(err_file),
    };

    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }

    log::info!(
        "---- {} ---- {}",
        program,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
}

/// The -chart table.
pub fn log_chart(bsp: &bsp::Bsp) {
    log::info!("object names  count/max      bytes   usage");
    for row in bsp.size_chart() {
        if row.max > 1 {
            let usage = row.percent_full();
            log::info!(
                "{:<13} {:>6}/{:<7} {:>9}  {:>5.1}%{}",
                row.name,
                row.count,
                row.max,
                row.bytes,
                usage,
                if usage > 100.0 { " (overflow!)" } else { "" }
            );
        } else {
            log::info!("{:<13} [variable]   {:>9}", row.name, row.bytes);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn developer_levels_parse_and_order() {
        assert_eq!(DeveloperLevel::parse("megaspam"), Some(DeveloperLevel::MegaSpam));
        assert_eq!(DeveloperLevel::parse("2"), Some(DeveloperLevel::Warning));
        assert_eq!(DeveloperLevel::parse("nope"), None);
        assert!(DeveloperLevel::Spam > DeveloperLevel::Message);
        assert!(DeveloperLevel::Disabled < DeveloperLevel::Error);
    }
}
