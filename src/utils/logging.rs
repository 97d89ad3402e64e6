//! Logging infrastructure for com-census.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the log file inside the log directory.
pub const LOG_FILE_NAME: &str = "com-census.log";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level
    pub level: LevelFilter,
    /// Enable console output
    pub console: bool,
    /// Enable file output
    pub file: bool,
    /// Log file path
    pub file_path: Option<PathBuf>,
    /// Show timestamps
    pub timestamps: bool,
    /// Show module path
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            console: true,
            file: false,
            file_path: None,
            timestamps: true,
            module_path: false,
        }
    }
}

impl LogConfig {
    /// Create a log config from application config.
    pub fn from_config(config: &Config) -> Self {
        let level = parse_level(&config.logging.log_level);

        Self {
            level,
            console: true,
            file: config.logging.log_to_file,
            file_path: Some(config.logging.log_dir().join(LOG_FILE_NAME)),
            timestamps: true,
            module_path: level == LevelFilter::Debug || level == LevelFilter::Trace,
        }
    }

    /// Create a verbose log config for CLI.
    pub fn verbose() -> Self {
        Self {
            level: LevelFilter::Debug,
            module_path: true,
            ..Self::default()
        }
    }
}

/// Parse a level name, falling back to `Info`.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Render one log line (without the trailing newline).
fn format_line(
    config: &LogConfig,
    colored: bool,
    level: log::Level,
    module_path: Option<&str>,
    args: &std::fmt::Arguments<'_>,
) -> String {
    let mut output = String::new();

    if config.timestamps {
        output.push_str(&format!("{} ", Local::now().format("%Y-%m-%d %H:%M:%S")));
    }

    let level_str = match (level, colored) {
        (log::Level::Error, true) => "\x1b[31mERROR\x1b[0m",
        (log::Level::Warn, true) => "\x1b[33mWARN\x1b[0m ",
        (log::Level::Info, true) => "\x1b[32mINFO\x1b[0m ",
        (log::Level::Debug, true) => "\x1b[34mDEBUG\x1b[0m",
        (log::Level::Trace, true) => "\x1b[35mTRACE\x1b[0m",
        (log::Level::Error, false) => "ERROR",
        (log::Level::Warn, false) => "WARN ",
        (log::Level::Info, false) => "INFO ",
        (log::Level::Debug, false) => "DEBUG",
        (log::Level::Trace, false) => "TRACE",
    };
    output.push_str(&format!("[{}] ", level_str));

    if config.module_path {
        if let Some(path) = module_path {
            output.push_str(&format!("{}: ", path));
        }
    }

    output.push_str(&args.to_string());
    output
}

/// Copies log output to stderr and a log file.
struct TeeWriter {
    console: bool,
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.console {
            io::stderr().write_all(buf)?;
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Initialize the logging system.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let mut builder = Builder::new();

    builder.filter_level(config.level);

    let log_file = match (config.file, config.file_path.as_deref()) {
        (true, Some(path)) => Some(open_log_file(path)?),
        _ => None,
    };

    // Escape codes are kept out of the log file
    let colored = log_file.is_none();

    match log_file {
        Some(file) => {
            builder.target(Target::Pipe(Box::new(TeeWriter {
                console: config.console,
                file,
            })));
        }
        None if !config.console => {
            builder.target(Target::Pipe(Box::new(io::sink())));
        }
        None => {
            builder.target(Target::Stderr);
        }
    }

    let level = config.level;
    builder.format(move |buf, record| {
        let line = format_line(
            &config,
            colored,
            record.level(),
            record.module_path(),
            record.args(),
        );
        writeln!(buf, "{}", line)
    });

    builder
        .try_init()
        .map_err(|e| Error::Internal(format!("Logger already initialized: {}", e)))?;

    log::debug!("Logging initialized with level: {:?}", level);
    Ok(())
}

/// Open (appending) the log file, creating its directory.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::DirectoryAccess {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::file_write(path, e))
}

/// Clean up old log files.
pub fn cleanup_old_logs(log_dir: &Path, keep_days: u32) -> Result<u32> {
    use std::time::{Duration, SystemTime};

    // A retention beyond the representable time range keeps everything
    let Some(cutoff) =
        SystemTime::now().checked_sub(Duration::from_secs(u64::from(keep_days) * 24 * 60 * 60))
    else {
        return Ok(0);
    };
    let mut deleted = 0u32;

    if !log_dir.exists() {
        return Ok(0);
    }

    let entries = fs::read_dir(log_dir).map_err(|e| Error::DirectoryAccess {
        path: log_dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();

        if path.extension().is_some_and(|ext| ext == "log") {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                if modified < cutoff && fs::remove_file(&path).is_ok() {
                    log::debug!("Deleted old log file: {:?}", path);
                    deleted += 1;
                }
            }
        }
    }

    if deleted > 0 {
        log::info!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(deleted)
}
