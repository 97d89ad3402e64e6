//! Configuration management for com-census.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem (module) scan settings
    pub scan: ScanConfig,
    /// Registry enumeration and activation settings
    pub probe: ProbeConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigLoad(format!("Failed to read config file: {}", e))
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            Error::ConfigLoad(format!("Failed to parse config file: {}", e))
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigSave(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, contents).map_err(|e| {
            Error::ConfigSave(format!("Failed to write config file: {}", e))
        })
    }

    /// Load configuration from `path` (or the default location), creating a
    /// default file if none exists.
    ///
    /// Problems are returned as warnings alongside the defaults, since this
    /// runs before the logger is up.
    pub fn load_or_default(path: Option<&Path>) -> (Self, Vec<String>) {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);
        let mut warnings = Vec::new();

        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => return (config, warnings),
                Err(e) => {
                    // The unreadable file is not overwritten
                    warnings.push(format!("Failed to load config, using defaults: {}", e));
                    return (Self::default(), warnings);
                }
            }
        }

        let config = Self::default();

        if let Err(e) = config.save(&config_path) {
            warnings.push(format!("Failed to save default config: {}", e));
        }

        (config, warnings)
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        Self::data_dir().join("config.json")
    }

    /// Get the application data directory.
    pub fn data_dir() -> PathBuf {
        #[cfg(windows)]
        {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData"))
                .join("com-census")
        }

        #[cfg(not(windows))]
        {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("com-census")
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.scan.roots.is_empty() {
            return Err(Error::ConfigInvalid {
                field: "scan.roots".to_string(),
                message: "At least one root is required".to_string(),
            });
        }

        if self.scan.extensions.iter().any(|e| e.is_empty() || e.starts_with('.')) {
            return Err(Error::ConfigInvalid {
                field: "scan.extensions".to_string(),
                message: "Extensions are written without a leading dot".to_string(),
            });
        }

        if self.scan.scan_threads == 0 {
            return Err(Error::ConfigInvalid {
                field: "scan.scan_threads".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.scan.max_image_size_mb == 0 {
            return Err(Error::ConfigInvalid {
                field: "scan.max_image_size_mb".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.probe.contexts.is_empty() {
            return Err(Error::ConfigInvalid {
                field: "probe.contexts".to_string(),
                message: "At least one server context is required".to_string(),
            });
        }

        if self.logging.keep_logs_days == 0 {
            return Err(Error::ConfigInvalid {
                field: "logging.keep_logs_days".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Filesystem scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Directories to walk
    pub roots: Vec<PathBuf>,
    /// Candidate extensions, compared case-insensitively
    pub extensions: Vec<String>,
    /// Whether to follow symbolic links
    pub follow_symlinks: bool,
    /// Paths to exclude from scanning
    pub exclude_paths: Vec<String>,
    /// Skip images larger than this size (MB)
    pub max_image_size_mb: u64,
    /// Number of parallel inspection workers
    pub scan_threads: usize,
    /// Match listing written at the end of the scan
    pub output_file: PathBuf,
    /// Append each match to a journal as soon as it is found
    pub incremental_flush: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: vec![
                #[cfg(windows)]
                PathBuf::from("C:\\"),
                #[cfg(not(windows))]
                PathBuf::from("/"),
            ],
            extensions: vec!["dll".to_string()],
            follow_symlinks: false,
            exclude_paths: vec![
                #[cfg(windows)]
                "C:\\$Recycle.Bin".to_string(),
                #[cfg(not(windows))]
                "/proc".to_string(),
                #[cfg(not(windows))]
                "/sys".to_string(),
            ],
            max_image_size_mb: 512,
            scan_threads: num_cpus(),
            output_file: PathBuf::from("COM_DLLs.txt"),
            incremental_flush: true,
        }
    }
}

impl ScanConfig {
    /// Whether `ext` is one of the candidate extensions.
    pub fn is_candidate_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Registry hive holding the class-registration subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryHive {
    /// HKEY_CLASSES_ROOT (merged machine + user view)
    ClassesRoot,
    /// HKEY_LOCAL_MACHINE
    LocalMachine,
    /// HKEY_CURRENT_USER
    CurrentUser,
}

impl RegistryHive {
    /// Full hive name as shown by regedit.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryHive::ClassesRoot => "HKEY_CLASSES_ROOT",
            RegistryHive::LocalMachine => "HKEY_LOCAL_MACHINE",
            RegistryHive::CurrentUser => "HKEY_CURRENT_USER",
        }
    }

    /// Parse a hive from its full or abbreviated name.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "HKCR" | "HKEY_CLASSES_ROOT" => Ok(RegistryHive::ClassesRoot),
            "HKLM" | "HKEY_LOCAL_MACHINE" => Ok(RegistryHive::LocalMachine),
            "HKCU" | "HKEY_CURRENT_USER" => Ok(RegistryHive::CurrentUser),
            _ => Err(Error::UnknownHive(s.to_string())),
        }
    }
}

impl std::fmt::Display for RegistryHive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Server context a class may be activated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerContext {
    /// In-process DLL server
    InprocServer,
    /// Out-of-process EXE server on this machine
    LocalServer,
    /// Server on a remote machine (DCOM)
    RemoteServer,
}

/// Registry enumeration and activation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Hive holding the class registrations
    pub hive: RegistryHive,
    /// Subkey path under the hive
    pub class_key: String,
    /// Contexts passed to the activation call
    pub contexts: Vec<ServerContext>,
    /// Read friendly name and server paths for each CLSID
    pub describe: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            hive: RegistryHive::ClassesRoot,
            class_key: "CLSID".to_string(),
            contexts: vec![
                ServerContext::InprocServer,
                ServerContext::LocalServer,
                ServerContext::RemoteServer,
            ],
            describe: false,
        }
    }
}

impl ProbeConfig {
    /// Full path of the class-registration subtree.
    pub fn class_root_path(&self) -> String {
        format!("{}\\{}", self.hive, self.class_key)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Days to keep log files
    pub keep_logs_days: u32,
    /// Path for log files
    pub log_path: Option<PathBuf>,
    /// Also write log lines to a file in the log directory
    pub log_to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            keep_logs_days: 30,
            log_path: None,
            log_to_file: false,
        }
    }
}

impl LoggingConfig {
    /// Get the effective log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("logs"))
    }
}

/// Get the number of CPUs, with a reasonable default.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
