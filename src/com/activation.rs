//! Class activation probe.
//!
//! Each probe runs inside its own single-threaded apartment. The apartment
//! is entered before the activation call and left once the returned
//! instance (if any) has been released, so no COM state outlives a probe.

use crate::com::clsid::Clsid;
use crate::core::config::{ProbeConfig, ServerContext};
use crate::core::error::Result;
use crate::core::types::ActivationStatus;

/// Result of activating one class.
///
/// When the class activated, `instance` holds the created object. Dropping
/// the activation releases it.
#[derive(Debug)]
pub struct Activation<I> {
    pub clsid: Clsid,
    pub status: ActivationStatus,
    pub instance: Option<I>,
}

impl<I> Activation<I> {
    pub fn is_activated(&self) -> bool {
        self.status.is_activated()
    }

    /// Take ownership of the created instance.
    pub fn into_instance(self) -> Option<I> {
        self.instance
    }

    /// Release any instance and keep only the status.
    pub fn release(self) -> ActivationStatus {
        self.status
    }
}

/// Creates class instances.
pub trait Activator {
    type Instance;

    /// Try to create an instance of `clsid`, asking for its base interface.
    ///
    /// `Err` means the probe could not run at all (for example the COM
    /// runtime refused to initialize); activation failures are reported in
    /// [`Activation::status`].
    fn activate(&self, clsid: &Clsid) -> Result<Activation<Self::Instance>>;
}

/// Activator backed by the COM runtime.
#[derive(Debug, Clone)]
pub struct ComActivator {
    contexts: Vec<ServerContext>,
}

impl ComActivator {
    pub fn new(contexts: &[ServerContext]) -> Self {
        Self {
            contexts: contexts.to_vec(),
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(&config.contexts)
    }

    pub fn contexts(&self) -> &[ServerContext] {
        &self.contexts
    }
}

impl Default for ComActivator {
    fn default() -> Self {
        Self::from_config(&ProbeConfig::default())
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::core::error::Error;
    use std::marker::PhantomData;
    use std::mem::ManuallyDrop;
    use windows::core::{IUnknown, Interface, HRESULT};
    use windows::Win32::System::Com::{
        CoCreateInstanceEx, CoInitializeEx, CoUninitialize, CLSCTX, CLSCTX_INPROC_SERVER,
        CLSCTX_LOCAL_SERVER, CLSCTX_REMOTE_SERVER, COINIT_APARTMENTTHREADED, MULTI_QI,
    };

    /// A single-threaded apartment entered on the current thread.
    ///
    /// Leaves the apartment when dropped.
    pub struct ComApartment {
        // Apartments are per-thread
        _not_send: PhantomData<*const ()>,
    }

    impl ComApartment {
        pub fn enter() -> Result<Self> {
            let hr = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) };
            if hr.is_err() {
                return Err(Error::ComInit {
                    code: hr.0 as u32,
                    message: hr.message(),
                });
            }
            Ok(Self {
                _not_send: PhantomData,
            })
        }
    }

    impl Drop for ComApartment {
        fn drop(&mut self) {
            unsafe { CoUninitialize() };
        }
    }

    /// A created object together with the apartment it lives in.
    pub struct ComInstance {
        // Declared first: released before the apartment is left
        unknown: IUnknown,
        _apartment: ComApartment,
    }

    impl ComInstance {
        pub fn as_unknown(&self) -> &IUnknown {
            &self.unknown
        }
    }

    impl std::fmt::Debug for ComInstance {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ComInstance")
                .field("unknown", &self.unknown.as_raw())
                .finish()
        }
    }

    fn context_mask(contexts: &[ServerContext]) -> CLSCTX {
        contexts.iter().fold(CLSCTX(0), |mask, context| {
            mask | match context {
                ServerContext::InprocServer => CLSCTX_INPROC_SERVER,
                ServerContext::LocalServer => CLSCTX_LOCAL_SERVER,
                ServerContext::RemoteServer => CLSCTX_REMOTE_SERVER,
            }
        })
    }

    impl Activator for ComActivator {
        type Instance = ComInstance;

        fn activate(&self, clsid: &Clsid) -> Result<Activation<ComInstance>> {
            let apartment = ComApartment::enter()?;
            let guid = clsid.to_guid();

            // CoCreateInstanceEx reports the per-interface result separately,
            // which exposes a success code paired with a null pointer.
            let mut results = [MULTI_QI {
                pIID: &IUnknown::IID,
                pItf: ManuallyDrop::new(None),
                hr: HRESULT(0),
            }];
            let call = unsafe {
                CoCreateInstanceEx(&guid, None, context_mask(&self.contexts), None, &mut results)
            };
            let unknown = unsafe { ManuallyDrop::take(&mut results[0].pItf) };

            let code = match call {
                Ok(()) => results[0].hr.0,
                Err(e) => e.code().0,
            };
            let status = ActivationStatus::classify(code, unknown.is_some());
            log::trace!("{} -> {:#010X} ({})", clsid, code as u32, status);

            let instance = match (status, unknown) {
                (ActivationStatus::Activated, Some(unknown)) => Some(ComInstance {
                    unknown,
                    _apartment: apartment,
                }),
                _ => None,
            };

            Ok(Activation {
                clsid: *clsid,
                status,
                instance,
            })
        }
    }
}

#[cfg(not(target_os = "windows"))]
mod platform {
    use super::*;
    use crate::core::error::Error;

    /// Never constructed off Windows.
    #[derive(Debug)]
    pub enum ComInstance {}

    impl Activator for ComActivator {
        type Instance = ComInstance;

        fn activate(&self, clsid: &Clsid) -> Result<Activation<ComInstance>> {
            Err(Error::NotSupported(format!("activation of {}", clsid)))
        }
    }
}

#[cfg(target_os = "windows")]
pub use platform::ComApartment;
pub use platform::ComInstance;

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, PartialEq)]
    struct FakeInstance(u32);

    struct FakeActivator {
        registered: Vec<Clsid>,
        created: Cell<u32>,
    }

    impl Activator for FakeActivator {
        type Instance = FakeInstance;

        fn activate(&self, clsid: &Clsid) -> Result<Activation<FakeInstance>> {
            if !self.registered.contains(clsid) {
                return Ok(Activation {
                    clsid: *clsid,
                    status: ActivationStatus::NotRegistered,
                    instance: None,
                });
            }
            let id = self.created.get() + 1;
            self.created.set(id);
            Ok(Activation {
                clsid: *clsid,
                status: ActivationStatus::Activated,
                instance: Some(FakeInstance(id)),
            })
        }
    }

    #[test]
    fn test_sequential_activations_are_independent() {
        let clsid: Clsid = "{00021401-0000-0000-C000-000000000046}".parse().unwrap();
        let activator = FakeActivator {
            registered: vec![clsid],
            created: Cell::new(0),
        };

        let first = activator.activate(&clsid).unwrap();
        let second = activator.activate(&clsid).unwrap();
        assert!(first.is_activated() && second.is_activated());
        assert_ne!(first.into_instance(), second.into_instance());
    }

    #[test]
    fn test_unregistered_has_no_instance() {
        let activator = FakeActivator {
            registered: Vec::new(),
            created: Cell::new(0),
        };
        let activation = activator.activate(&Clsid::NIL).unwrap();
        assert_eq!(activation.status, ActivationStatus::NotRegistered);
        assert!(activation.instance.is_none());
    }

    #[test]
    fn test_default_contexts() {
        assert_eq!(ComActivator::default().contexts().len(), 3);
    }

    #[cfg(target_os = "windows")]
    #[test]
    fn test_random_clsid_is_not_registered() {
        let clsid = Clsid::from_uuid(uuid::Uuid::new_v4());
        let activation = ComActivator::default().activate(&clsid).unwrap();
        assert_eq!(activation.status, ActivationStatus::NotRegistered);
        assert!(activation.instance.is_none());
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_activation_unsupported_off_windows() {
        let err = ComActivator::default().activate(&Clsid::NIL).unwrap_err();
        assert!(matches!(err, crate::core::error::Error::NotSupported(_)));
    }
}
