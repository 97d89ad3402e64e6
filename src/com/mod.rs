//! COM class registration enumeration and activation probing.

pub mod activation;
pub mod clsid;
pub mod probe;
pub mod registry;

pub use activation::{Activation, Activator, ComActivator, ComInstance};
pub use clsid::Clsid;
pub use probe::{ClassProbeRecord, ClassProber};
pub use registry::{describe_class, enumerate_class_ids, open_class_root, ClassRegistration, RegistryKey};
