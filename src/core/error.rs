//! Error types and result handling for com-census.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for com-census operations.
///
/// Per-item failures (a file that is not an image, a CLSID that will not
/// activate) are not errors: they become verdicts. This type covers what
/// stops an operation or a whole pipeline.
#[derive(Error, Debug)]
pub enum Error {
    // ===== I/O Errors =====
    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to access directory: {path}")]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ===== Configuration Errors =====
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("Failed to save configuration: {0}")]
    ConfigSave(String),

    #[error("Invalid configuration value: {field} - {message}")]
    ConfigInvalid { field: String, message: String },

    // ===== Registry Errors =====
    #[error("Registry access error: {key}")]
    RegistryAccess {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown registry hive: {0}")]
    UnknownHive(String),

    // ===== COM Errors =====
    #[error("Failed to initialize COM runtime (HRESULT 0x{code:08X}): {message}")]
    ComInit { code: u32, message: String },

    #[error("Invalid CLSID: {0}")]
    InvalidClsid(String),

    // ===== Concurrency Errors =====
    #[error("Worker task failed: {0}")]
    Worker(String),

    // ===== Serialization Errors =====
    #[error("JSON serialization error")]
    JsonSerialize(#[from] serde_json::Error),

    // ===== Generic Errors =====
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a registry access error.
    pub fn registry_access(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::RegistryAccess {
            key: key.into(),
            source,
        }
    }

    /// Get a user-friendly suggestion for how to resolve this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::DirectoryAccess { .. } => {
                Some("Check that the directory exists and is writable")
            }
            Error::ConfigLoad(_) | Error::ConfigInvalid { .. } => {
                Some("Check your configuration file for syntax errors or missing fields")
            }
            Error::RegistryAccess { .. } => {
                Some("Try running from an elevated (administrator) prompt")
            }
            Error::UnknownHive(_) => Some("Use one of HKCR, HKLM or HKCU"),
            Error::ComInit { .. } => {
                Some("Another component may have initialized COM with a different threading model")
            }
            Error::InvalidClsid(_) => {
                Some("CLSIDs are written as {xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}")
            }
            Error::NotSupported(_) => Some("COM activation and registry access require Windows"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::file_write(
            "/test/out.jsonl",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.to_string(), "Failed to write file: /test/out.jsonl");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_com_init_display() {
        let err = Error::ComInit {
            code: 0x8001_0106,
            message: "Cannot change thread mode after it is set.".to_string(),
        };
        assert!(err.to_string().contains("0x80010106"));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_suggestions() {
        assert!(Error::UnknownHive("HKXX".into()).suggestion().is_some());
        assert!(Error::Internal("x".into()).suggestion().is_none());
    }
}
