//! Class-registration enumeration.
//!
//! The registry is reached through the [`RegistryKey`] trait so the
//! enumeration logic runs the same against the live Windows registry and
//! against an in-memory tree.

use crate::com::clsid::Clsid;
use crate::core::config::ProbeConfig;
use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io;

/// Longest registry key name, in characters.
pub const MAX_KEY_NAME_LEN: usize = 255;

const INPROC_SERVER_KEY: &str = "InprocServer32";
const LOCAL_SERVER_KEY: &str = "LocalServer32";

/// Read access to one registry key.
pub trait RegistryKey: Sized {
    /// Names of the immediate subkeys, in enumeration order.
    fn subkey_names(&self) -> Box<dyn Iterator<Item = io::Result<String>> + '_>;

    /// Open an immediate subkey for reading.
    fn open_subkey(&self, name: &str) -> io::Result<Self>;

    /// The key's unnamed (default) string value.
    fn default_value(&self) -> Option<String>;
}

#[cfg(target_os = "windows")]
impl RegistryKey for winreg::RegKey {
    fn subkey_names(&self) -> Box<dyn Iterator<Item = io::Result<String>> + '_> {
        Box::new(self.enum_keys())
    }

    fn open_subkey(&self, name: &str) -> io::Result<Self> {
        self.open_subkey_with_flags(name, winreg::enums::KEY_READ)
    }

    fn default_value(&self) -> Option<String> {
        self.get_value::<String, _>("").ok()
    }
}

/// Open the class-registration subtree named by the probe configuration.
#[cfg(target_os = "windows")]
pub fn open_class_root(config: &ProbeConfig) -> Result<winreg::RegKey> {
    use crate::core::config::RegistryHive;
    use winreg::enums::*;
    use winreg::RegKey;

    let hive = match config.hive {
        RegistryHive::ClassesRoot => HKEY_CLASSES_ROOT,
        RegistryHive::LocalMachine => HKEY_LOCAL_MACHINE,
        RegistryHive::CurrentUser => HKEY_CURRENT_USER,
    };

    RegKey::predef(hive)
        .open_subkey_with_flags(&config.class_key, KEY_READ)
        .map_err(|e| Error::registry_access(config.class_root_path(), e))
}

#[cfg(not(target_os = "windows"))]
pub fn open_class_root(config: &ProbeConfig) -> Result<MemoryKey> {
    Err(Error::NotSupported(format!(
        "registry access to {}",
        config.class_root_path()
    )))
}

/// Lazily enumerate the CLSIDs registered under `root`.
///
/// Subkeys whose names are not braced GUIDs are skipped. Enumeration ends
/// at the first error reported by the registry. Calling this again starts
/// a fresh pass from the first subkey.
pub fn enumerate_class_ids<K: RegistryKey>(root: &K) -> impl Iterator<Item = Clsid> + '_ {
    root.subkey_names()
        .map_while(|name| match name {
            Ok(name) => Some(name),
            Err(e) => {
                log::debug!("Subkey enumeration stopped: {}", e);
                None
            }
        })
        .filter_map(|name| {
            if name.chars().count() > MAX_KEY_NAME_LEN {
                log::trace!("Skipping overlong subkey name ({} chars)", name.len());
                return None;
            }
            match Clsid::parse_braced(&name) {
                Ok(clsid) => Some(clsid),
                Err(_) => {
                    log::trace!("Skipping non-CLSID subkey {}", name);
                    None
                }
            }
        })
}

/// Descriptive registry data for one class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRegistration {
    /// Friendly name (default value of the CLSID key)
    pub name: Option<String>,
    /// In-process server path
    pub inproc_server: Option<String>,
    /// Out-of-process server command line
    pub local_server: Option<String>,
}

impl ClassRegistration {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.inproc_server.is_none() && self.local_server.is_none()
    }
}

/// Read the friendly name and server paths registered for `clsid`.
pub fn describe_class<K: RegistryKey>(root: &K, clsid: &Clsid) -> Result<ClassRegistration> {
    let key = root
        .open_subkey(&clsid.to_string())
        .map_err(|e| Error::registry_access(clsid.to_string(), e))?;

    let server = |name: &str| key.open_subkey(name).ok().and_then(|k| k.default_value());

    Ok(ClassRegistration {
        name: key.default_value(),
        inproc_server: server(INPROC_SERVER_KEY),
        local_server: server(LOCAL_SERVER_KEY),
    })
}

/// In-memory registry key.
#[derive(Debug, Clone, Default)]
pub struct MemoryKey {
    children: Vec<(String, MemoryKey)>,
    default: Option<String>,
    fail_at: Option<usize>,
}

impl MemoryKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default value.
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Append a subkey.
    pub fn with_subkey(mut self, name: impl Into<String>, key: MemoryKey) -> Self {
        self.children.push((name.into(), key));
        self
    }

    /// Make subkey enumeration report an error at position `index`.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl RegistryKey for MemoryKey {
    fn subkey_names(&self) -> Box<dyn Iterator<Item = io::Result<String>> + '_> {
        Box::new(self.children.iter().enumerate().map(move |(i, (name, _))| {
            if Some(i) == self.fail_at {
                Err(io::Error::new(io::ErrorKind::Other, "enumeration failed"))
            } else {
                Ok(name.clone())
            }
        }))
    }

    fn open_subkey(&self, name: &str) -> io::Result<Self> {
        // Registry key names compare case-insensitively
        self.children
            .iter()
            .find(|(child, _)| child.eq_ignore_ascii_case(name))
            .map(|(_, key)| key.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn default_value(&self) -> Option<String> {
        self.default.clone()
    }
}
