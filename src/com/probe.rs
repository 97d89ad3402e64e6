//! Class pipeline: enumerate registered CLSIDs and activate each in turn.

use crate::com::activation::Activator;
use crate::com::clsid::Clsid;
use crate::com::registry::{describe_class, enumerate_class_ids, ClassRegistration, RegistryKey};
use crate::core::types::{ActivationStatus, ClassScanSummary, ScanStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of probing one CLSID.
#[derive(Debug, Clone, Serialize)]
pub struct ClassProbeRecord {
    pub clsid: Clsid,
    /// Activation status; absent when the probe itself failed
    #[serde(flatten)]
    pub status: Option<ActivationStatus>,
    /// Why the probe could not run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<ClassRegistration>,
}

impl ClassProbeRecord {
    /// One-line, human-readable form.
    pub fn to_line(&self) -> String {
        let mut line = match (&self.status, &self.error) {
            (Some(ActivationStatus::Activated), _) => format!("[+] {} activated", self.clsid),
            (Some(status), _) => format!("[-] {} {}", self.clsid, status),
            (None, Some(error)) => format!("[!] {} probe failed: {}", self.clsid, error),
            (None, None) => format!("[?] {}", self.clsid),
        };

        if let Some(registration) = &self.registration {
            if let Some(name) = &registration.name {
                line.push_str(&format!(" \"{}\"", name));
            }
            if let Some(server) = registration
                .inproc_server
                .as_ref()
                .or(registration.local_server.as_ref())
            {
                line.push_str(&format!(" -> {}", server));
            }
        }
        line
    }
}

/// Runs the class pipeline serially.
pub struct ClassProber {
    cancelled: Arc<AtomicBool>,
    describe: bool,
}

impl ClassProber {
    pub fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            describe: false,
        }
    }

    /// Also read each class's friendly name and server path.
    pub fn with_describe(mut self, describe: bool) -> Self {
        self.describe = describe;
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Probe every CLSID under `root`, reporting each one to `on_record`
    /// before moving to the next.
    ///
    /// A probe that cannot run is counted and reported; the pipeline carries
    /// on with the next CLSID. The stop flag is checked between CLSIDs.
    pub fn run<K, A, F>(&self, root: &K, activator: &A, mut on_record: F) -> ClassScanSummary
    where
        K: RegistryKey,
        A: Activator,
        F: FnMut(&ClassProbeRecord),
    {
        let mut summary = ClassScanSummary::new();
        summary.status = ScanStatus::Running;
        log::info!("Starting class scan");

        for clsid in enumerate_class_ids(root) {
            if self.is_cancelled() {
                log::info!("Class scan cancelled after {} CLSID(s)", summary.enumerated);
                summary.finish(ScanStatus::Cancelled);
                return summary;
            }
            summary.enumerated += 1;

            let registration = if self.describe {
                describe_class(root, &clsid)
                    .map_err(|e| log::debug!("No registration data for {}: {}", clsid, e))
                    .ok()
            } else {
                None
            };

            let record = match activator.activate(&clsid) {
                Ok(activation) => {
                    summary.record(activation.status);
                    ClassProbeRecord {
                        clsid,
                        status: Some(activation.release()),
                        error: None,
                        registration,
                    }
                }
                Err(e) => {
                    log::warn!("Probe of {} failed: {}", clsid, e);
                    summary.probe_failures += 1;
                    ClassProbeRecord {
                        clsid,
                        status: None,
                        error: Some(e.to_string()),
                        registration,
                    }
                }
            };

            on_record(&record);
        }

        summary.finish(ScanStatus::Completed);
        log::info!(
            "Class scan complete: {} enumerated, {} activated",
            summary.enumerated,
            summary.activated
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::activation::Activation;
    use crate::com::registry::MemoryKey;
    use crate::core::error::{Error, Result};
    use crate::core::types::{E_NOINTERFACE, REGDB_E_CLASSNOTREG};
    use std::cell::RefCell;
    use std::collections::HashMap;

    const SHELL_LINK: &str = "{00021401-0000-0000-C000-000000000046}";
    const NIL: &str = "{00000000-0000-0000-0000-000000000000}";
    const BROKEN: &str = "{11111111-2222-3333-4444-555555555555}";
    const NO_IFACE: &str = "{AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE}";

    /// Scripted activator: HRESULT per CLSID, `None` for an init failure.
    struct ScriptedActivator {
        script: HashMap<Clsid, Option<i32>>,
        calls: RefCell<Vec<Clsid>>,
    }

    impl ScriptedActivator {
        fn new(entries: &[(&str, Option<i32>)]) -> Self {
            Self {
                script: entries
                    .iter()
                    .map(|(text, code)| (text.parse().unwrap(), *code))
                    .collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Activator for ScriptedActivator {
        type Instance = ();

        fn activate(&self, clsid: &Clsid) -> Result<Activation<()>> {
            self.calls.borrow_mut().push(*clsid);
            match self.script.get(clsid).copied().unwrap_or(Some(REGDB_E_CLASSNOTREG)) {
                Some(code) => {
                    let status = ActivationStatus::classify(code, code >= 0);
                    Ok(Activation {
                        clsid: *clsid,
                        status,
                        instance: status.is_activated().then_some(()),
                    })
                }
                None => Err(Error::ComInit {
                    code: 0x8001_0106,
                    message: "changed mode".to_string(),
                }),
            }
        }
    }

    fn registry(names: &[&str]) -> MemoryKey {
        names
            .iter()
            .fold(MemoryKey::new(), |root, name| root.with_subkey(*name, MemoryKey::new()))
    }

    #[test]
    fn test_one_record_per_clsid() {
        let root = registry(&[SHELL_LINK, "not-a-guid", NIL, NO_IFACE]);
        let activator = ScriptedActivator::new(&[(SHELL_LINK, Some(0)), (NO_IFACE, Some(E_NOINTERFACE))]);

        let mut records = Vec::new();
        let summary = ClassProber::new(Arc::new(AtomicBool::new(false))).run(
            &root,
            &activator,
            |record| records.push(record.clone()),
        );

        assert_eq!(summary.status, ScanStatus::Completed);
        assert_eq!(summary.enumerated, 3);
        assert_eq!(summary.activated, 1);
        assert_eq!(summary.not_registered, 1);
        assert_eq!(summary.no_interface, 1);

        let statuses: Vec<Option<ActivationStatus>> = records.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                Some(ActivationStatus::Activated),
                Some(ActivationStatus::NotRegistered),
                Some(ActivationStatus::NoRequestedInterface),
            ]
        );
    }

    #[test]
    fn test_probe_failure_does_not_stop_pipeline() {
        let root = registry(&[BROKEN, SHELL_LINK]);
        let activator = ScriptedActivator::new(&[(BROKEN, None), (SHELL_LINK, Some(0))]);

        let mut records = Vec::new();
        let summary = ClassProber::new(Arc::new(AtomicBool::new(false))).run(
            &root,
            &activator,
            |record| records.push(record.clone()),
        );

        assert_eq!(summary.probe_failures, 1);
        assert_eq!(summary.activated, 1);
        assert_eq!(records.len(), 2);
        assert!(records[0].status.is_none());
        assert!(records[0].error.is_some());
        assert!(records[0].to_line().starts_with("[!]"));
    }

    #[test]
    fn test_stop_flag_checked_between_clsids() {
        let root = registry(&[SHELL_LINK, NIL, NO_IFACE]);
        let activator = ScriptedActivator::new(&[]);
        let flag = Arc::new(AtomicBool::new(false));
        let prober = ClassProber::new(flag.clone());

        let mut seen = 0;
        let summary = prober.run(&root, &activator, |_| {
            seen += 1;
            flag.store(true, Ordering::SeqCst);
        });

        assert_eq!(seen, 1);
        assert_eq!(activator.calls.borrow().len(), 1);
        assert_eq!(summary.status, ScanStatus::Cancelled);
    }

    #[test]
    fn test_describe_attaches_registration() {
        let root = MemoryKey::new().with_subkey(
            SHELL_LINK,
            MemoryKey::new().with_default("Shortcut").with_subkey(
                "InprocServer32",
                MemoryKey::new().with_default("windows.storage.dll"),
            ),
        );
        let activator = ScriptedActivator::new(&[(SHELL_LINK, Some(0))]);

        let mut lines = Vec::new();
        ClassProber::new(Arc::new(AtomicBool::new(false)))
            .with_describe(true)
            .run(&root, &activator, |record| lines.push(record.to_line()));

        assert_eq!(
            lines,
            vec![format!("[+] {} activated \"Shortcut\" -> windows.storage.dll", SHELL_LINK)]
        );
    }

    #[test]
    fn test_record_json() {
        let record = ClassProbeRecord {
            clsid: Clsid::NIL,
            status: Some(ActivationStatus::OtherActivationError { code: -2147024891 }),
            error: None,
            registration: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["clsid"], NIL);
        assert_eq!(json["status"], "other_activation_error");
        assert_eq!(json["code"], -2147024891);
        assert!(json.get("error").is_none());
    }
}
