//! Core type definitions used throughout com-census.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `REGDB_E_CLASSNOTREG`: class not registered for the requested server context.
pub const REGDB_E_CLASSNOTREG: i32 = 0x8004_0154_u32 as i32;

/// `E_NOINTERFACE`: the object does not support the requested interface.
pub const E_NOINTERFACE: i32 = 0x8000_4002_u32 as i32;

/// Verdict of a static export-table inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleVerdict {
    /// The image exports `DllGetClassObject`
    IsComServer,
    /// The image parsed cleanly but does not export `DllGetClassObject`
    NotComServer,
    /// The file could not be opened, mapped, or parsed as an image
    InvalidImage,
}

impl ModuleVerdict {
    /// Whether the module is a COM server.
    pub fn is_match(&self) -> bool {
        matches!(self, ModuleVerdict::IsComServer)
    }
}

impl std::fmt::Display for ModuleVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleVerdict::IsComServer => write!(f, "COM server"),
            ModuleVerdict::NotComServer => write!(f, "not a COM server"),
            ModuleVerdict::InvalidImage => write!(f, "invalid image"),
        }
    }
}

/// Outcome of one activation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ActivationStatus {
    /// An instance was created
    Activated,
    /// The class is not registered for the requested server context
    NotRegistered,
    /// The object does not expose the requested interface
    NoRequestedInterface,
    /// The runtime reported success but handed back no instance
    NullInstance,
    /// Any other failure; `code` is the raw HRESULT
    OtherActivationError { code: i32 },
}

impl ActivationStatus {
    /// Map an activation HRESULT to a status.
    ///
    /// `instance_present` is only consulted for success codes.
    pub fn classify(code: i32, instance_present: bool) -> Self {
        match code {
            c if c >= 0 && instance_present => ActivationStatus::Activated,
            c if c >= 0 => ActivationStatus::NullInstance,
            REGDB_E_CLASSNOTREG => ActivationStatus::NotRegistered,
            E_NOINTERFACE => ActivationStatus::NoRequestedInterface,
            other => ActivationStatus::OtherActivationError { code: other },
        }
    }

    /// Whether an instance was obtained.
    pub fn is_activated(&self) -> bool {
        matches!(self, ActivationStatus::Activated)
    }

    /// Short machine-friendly label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationStatus::Activated => "activated",
            ActivationStatus::NotRegistered => "not_registered",
            ActivationStatus::NoRequestedInterface => "no_requested_interface",
            ActivationStatus::NullInstance => "null_instance",
            ActivationStatus::OtherActivationError { .. } => "other_activation_error",
        }
    }
}

impl std::fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationStatus::Activated => write!(f, "activated"),
            ActivationStatus::NotRegistered => write!(f, "class not registered"),
            ActivationStatus::NoRequestedInterface => write!(f, "interface not supported"),
            ActivationStatus::NullInstance => write!(f, "success but null instance"),
            ActivationStatus::OtherActivationError { code } => {
                write!(f, "activation failed (HRESULT 0x{:08X})", *code as u32)
            }
        }
    }
}

/// Current status of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Scan is pending / not started
    Pending,
    /// Scan is currently running
    Running,
    /// Scan completed successfully
    Completed,
    /// Scan was cancelled by user
    Cancelled,
    /// Scan failed with error
    Failed,
}

/// Summary of a module (filesystem) scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleScanSummary {
    /// Unique scan identifier
    pub scan_id: String,
    /// When the scan started
    pub start_time: DateTime<Utc>,
    /// When the scan ended
    pub end_time: Option<DateTime<Utc>>,
    /// Final status
    pub status: ScanStatus,
    /// Candidate files discovered by the walk
    pub candidates: u64,
    /// Candidates inspected to completion
    pub inspected: u64,
    /// Modules exporting `DllGetClassObject`
    pub com_servers: u64,
    /// Valid images without the export
    pub not_com_servers: u64,
    /// Files that failed to map or parse
    pub invalid_images: u64,
    /// Walk errors (permission denied, transient I/O)
    pub walk_errors: u64,
    /// Where the match listing was written
    pub output_path: Option<PathBuf>,
    /// Matched module paths in discovery order
    pub matches: Vec<PathBuf>,
}

impl ModuleScanSummary {
    /// Create a new, pending summary.
    pub fn new() -> Self {
        Self {
            scan_id: uuid::Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: ScanStatus::Pending,
            candidates: 0,
            inspected: 0,
            com_servers: 0,
            not_com_servers: 0,
            invalid_images: 0,
            walk_errors: 0,
            output_path: None,
            matches: Vec::new(),
        }
    }

    /// Count one verdict.
    pub fn record(&mut self, verdict: ModuleVerdict) {
        self.inspected += 1;
        match verdict {
            ModuleVerdict::IsComServer => self.com_servers += 1,
            ModuleVerdict::NotComServer => self.not_com_servers += 1,
            ModuleVerdict::InvalidImage => self.invalid_images += 1,
        }
    }

    /// Mark the scan as finished with the given status.
    pub fn finish(&mut self, status: ScanStatus) {
        self.end_time = Some(Utc::now());
        self.status = status;
    }

    /// Calculate scan duration in seconds.
    pub fn duration_secs(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_seconds())
    }
}

impl Default for ModuleScanSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a class (registry + activation) scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassScanSummary {
    /// Unique scan identifier
    pub scan_id: String,
    /// When the scan started
    pub start_time: DateTime<Utc>,
    /// When the scan ended
    pub end_time: Option<DateTime<Utc>>,
    /// Final status
    pub status: ScanStatus,
    /// CLSIDs yielded by the enumerator
    pub enumerated: u64,
    /// Successful activations
    pub activated: u64,
    /// `REGDB_E_CLASSNOTREG` results
    pub not_registered: u64,
    /// `E_NOINTERFACE` results
    pub no_interface: u64,
    /// Success with a null instance
    pub null_instance: u64,
    /// Any other activation failure
    pub other_errors: u64,
    /// Probes aborted before activation (COM runtime initialization failed)
    pub probe_failures: u64,
}

impl ClassScanSummary {
    /// Create a new, pending summary.
    pub fn new() -> Self {
        Self {
            scan_id: uuid::Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: ScanStatus::Pending,
            enumerated: 0,
            activated: 0,
            not_registered: 0,
            no_interface: 0,
            null_instance: 0,
            other_errors: 0,
            probe_failures: 0,
        }
    }

    /// Count one activation outcome.
    pub fn record(&mut self, status: ActivationStatus) {
        match status {
            ActivationStatus::Activated => self.activated += 1,
            ActivationStatus::NotRegistered => self.not_registered += 1,
            ActivationStatus::NoRequestedInterface => self.no_interface += 1,
            ActivationStatus::NullInstance => self.null_instance += 1,
            ActivationStatus::OtherActivationError { .. } => self.other_errors += 1,
        }
    }

    /// Mark the scan as finished with the given status.
    pub fn finish(&mut self, status: ScanStatus) {
        self.end_time = Some(Utc::now());
        self.status = status;
    }

    /// Calculate scan duration in seconds.
    pub fn duration_secs(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_seconds())
    }
}

impl Default for ClassScanSummary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        assert_eq!(ActivationStatus::classify(0, true), ActivationStatus::Activated);
        // S_FALSE is still a success code
        assert_eq!(ActivationStatus::classify(1, true), ActivationStatus::Activated);
        assert_eq!(ActivationStatus::classify(0, false), ActivationStatus::NullInstance);
    }

    #[test]
    fn test_classify_known_failures() {
        assert_eq!(
            ActivationStatus::classify(REGDB_E_CLASSNOTREG, false),
            ActivationStatus::NotRegistered
        );
        assert_eq!(
            ActivationStatus::classify(E_NOINTERFACE, false),
            ActivationStatus::NoRequestedInterface
        );
        // A failure code wins even if something came back in the out-param
        assert_eq!(
            ActivationStatus::classify(REGDB_E_CLASSNOTREG, true),
            ActivationStatus::NotRegistered
        );
    }

    #[test]
    fn test_classify_other_keeps_code() {
        let access_denied = 0x8007_0005_u32 as i32;
        let status = ActivationStatus::classify(access_denied, false);
        assert_eq!(
            status,
            ActivationStatus::OtherActivationError { code: access_denied }
        );
        assert_eq!(status.to_string(), "activation failed (HRESULT 0x80070005)");
    }

    #[test]
    fn test_module_summary_counts() {
        let mut summary = ModuleScanSummary::new();
        summary.record(ModuleVerdict::IsComServer);
        summary.record(ModuleVerdict::NotComServer);
        summary.record(ModuleVerdict::InvalidImage);
        summary.record(ModuleVerdict::NotComServer);

        assert_eq!(summary.inspected, 4);
        assert_eq!(summary.com_servers, 1);
        assert_eq!(summary.not_com_servers, 2);
        assert_eq!(summary.invalid_images, 1);

        summary.finish(ScanStatus::Completed);
        assert!(summary.duration_secs().is_some());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ActivationStatus::OtherActivationError { code: -1 })
            .unwrap();
        assert!(json.contains("other_activation_error"));
        assert!(json.contains("-1"));
    }
}
