//! com-census: an inventory of COM servers on a Windows host.
//!
//! Two independent pipelines:
//! - the module pipeline walks the filesystem and statically inspects each
//!   DLL's export table for `DllGetClassObject`;
//! - the class pipeline enumerates the registered CLSIDs and tries to
//!   activate each through the COM runtime, classifying the outcome.

pub mod com;
pub mod core;
pub mod scanner;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use crate::core::config::Config;
pub use crate::core::error::{Error, Result};
pub use crate::core::types::*;
