//! Leveled, module-tagged logging for the compiler and test harness.
//!
//! Records flow through a global [`Logger`] guarded by a mutex. A filter spec
//! of the form `modules=debug,types=info,*=warn` selects a minimum level per
//! module tag; the `*` entry is the default. Sinks: console (ANSI color when
//! stderr is a terminal), file (plain text or JSON lines), and null.
//!
//! `TML_LOG` configures the default filter at startup; a `--log=` flag from
//! the CLI overrides it.

use colour::{e_cyan_ln, e_green_ln, e_grey_ln, e_red_ln, e_red_ln_bold, e_yellow_ln};
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn parse(text: &str) -> Option<LogLevel> {
        match text.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "fatal" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        };
        write!(f, "{name}")
    }
}

/// Per-module minimum levels parsed from a spec like `modules=debug,*=warn`.
///
/// A bare level name (`debug`) is shorthand for `*=debug`.
#[derive(Debug, Clone)]
pub struct LevelFilter {
    default: LogLevel,
    per_module: Vec<(String, LogLevel)>,
}

impl LevelFilter {
    pub fn parse(spec: &str) -> LevelFilter {
        let mut default = LogLevel::Warn;
        let mut per_module = Vec::new();

        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some(("*", level)) => {
                    if let Some(level) = LogLevel::parse(level) {
                        default = level;
                    }
                }
                Some((module, level)) => {
                    if let Some(level) = LogLevel::parse(level) {
                        per_module.push((module.to_string(), level));
                    }
                }
                None => {
                    if let Some(level) = LogLevel::parse(part) {
                        default = level;
                    }
                }
            }
        }

        LevelFilter {
            default,
            per_module,
        }
    }

    pub fn enabled(&self, module: &str, level: LogLevel) -> bool {
        let min = self
            .per_module
            .iter()
            .find(|(name, _)| name == module)
            .map(|(_, level)| *level)
            .unwrap_or(self.default);
        level >= min
    }
}

impl Default for LevelFilter {
    fn default() -> Self {
        LevelFilter {
            default: LogLevel::Warn,
            per_module: Vec::new(),
        }
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    level: LogLevel,
    module: &'a str,
    message: &'a str,
    timestamp: String,
}

enum Sink {
    Console { color: bool },
    TextFile(File),
    JsonFile(File),
    Null,
}

impl Sink {
    fn write(&mut self, level: LogLevel, module: &str, message: &str) -> io::Result<()> {
        match self {
            Sink::Console { color } => {
                if *color {
                    match level {
                        LogLevel::Trace => e_grey_ln!("[{}] [{}] {}", level, module, message),
                        LogLevel::Debug => e_cyan_ln!("[{}] [{}] {}", level, module, message),
                        LogLevel::Info => e_green_ln!("[{}] [{}] {}", level, module, message),
                        LogLevel::Warn => e_yellow_ln!("[{}] [{}] {}", level, module, message),
                        LogLevel::Error => e_red_ln!("[{}] [{}] {}", level, module, message),
                        LogLevel::Fatal => e_red_ln_bold!("[{}] [{}] {}", level, module, message),
                    }
                    Ok(())
                } else {
                    writeln!(io::stderr().lock(), "[{level}] [{module}] {message}")
                }
            }
            Sink::TextFile(file) => {
                writeln!(
                    file,
                    "{} [{level}] [{module}] {message}",
                    chrono::Utc::now().to_rfc3339()
                )
            }
            Sink::JsonFile(file) => {
                let record = JsonRecord {
                    level,
                    module,
                    message,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                };
                // A record that fails to serialize is dropped rather than
                // poisoning the sink
                if let Ok(line) = serde_json::to_string(&record) {
                    writeln!(file, "{line}")
                } else {
                    Ok(())
                }
            }
            Sink::Null => Ok(()),
        }
    }

    fn flush(&mut self) {
        match self {
            Sink::Console { .. } => {
                let _ = io::stderr().flush();
            }
            Sink::TextFile(file) | Sink::JsonFile(file) => {
                let _ = file.flush();
            }
            Sink::Null => {}
        }
    }
}

pub struct Logger {
    filter: LevelFilter,
    sinks: Vec<Sink>,
}

impl Logger {
    fn from_env() -> Logger {
        let filter = std::env::var("TML_LOG")
            .map(|spec| LevelFilter::parse(&spec))
            .unwrap_or_default();

        Logger {
            filter,
            sinks: vec![Sink::Console {
                color: io::stderr().is_terminal(),
            }],
        }
    }

    pub fn log(&mut self, level: LogLevel, module: &str, message: &str) {
        if !self.filter.enabled(module, level) {
            return;
        }
        for sink in &mut self.sinks {
            // A broken sink must never take the compiler down
            let _ = sink.write(level, module, message);
        }
        if level == LogLevel::Fatal {
            for sink in &mut self.sinks {
                sink.flush();
            }
        }
    }
}

fn global() -> &'static Mutex<Logger> {
    static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();
    LOGGER.get_or_init(|| Mutex::new(Logger::from_env()))
}

/// Replace the filter, e.g. from a `--log=` CLI flag (CLI wins over env).
pub fn set_filter(spec: &str) {
    if let Ok(mut logger) = global().lock() {
        logger.filter = LevelFilter::parse(spec);
    }
}

/// Attach a file sink. `json` selects JSON-lines output over plain text.
pub fn add_file_sink(path: &Path, json: bool) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    if let Ok(mut logger) = global().lock() {
        logger.sinks.push(if json {
            Sink::JsonFile(file)
        } else {
            Sink::TextFile(file)
        });
    }
    Ok(())
}

/// Silence all output (used by `--quiet` test runs).
pub fn set_null_sink() {
    if let Ok(mut logger) = global().lock() {
        logger.sinks = vec![Sink::Null];
    }
}

pub fn log(level: LogLevel, module: &str, message: &str) {
    if let Ok(mut logger) = global().lock() {
        logger.log(level, module, message);
    }
}

#[macro_export]
macro_rules! log_trace {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Trace, $module, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Debug, $module, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Info, $module, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Warn, $module, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Error, $module, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_fatal {
    ($module:expr, $($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Fatal, $module, &format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_spec_selects_per_module_levels() {
        let filter = LevelFilter::parse("modules=debug,types=info,*=warn");
        assert!(filter.enabled("modules", LogLevel::Debug));
        assert!(!filter.enabled("modules", LogLevel::Trace));
        assert!(filter.enabled("types", LogLevel::Info));
        assert!(!filter.enabled("types", LogLevel::Debug));
        assert!(filter.enabled("codegen", LogLevel::Warn));
        assert!(!filter.enabled("codegen", LogLevel::Info));
    }

    #[test]
    fn bare_level_sets_the_default() {
        let filter = LevelFilter::parse("debug");
        assert!(filter.enabled("anything", LogLevel::Debug));
        assert!(!filter.enabled("anything", LogLevel::Trace));
    }

    #[test]
    fn garbage_spec_falls_back_to_warn() {
        let filter = LevelFilter::parse("nonsense=purple,,=");
        assert!(filter.enabled("x", LogLevel::Warn));
        assert!(!filter.enabled("x", LogLevel::Info));
    }

    #[test]
    fn level_ordering_matches_the_lattice() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Fatal);
    }
}
