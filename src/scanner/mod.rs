//! Filesystem scanning for in-process COM servers.
//!
//! This module provides:
//! - Bounds-checked export-table inspection of PE images
//! - Parallel filesystem traversal and inspection
//! - Ordered match collection and the match listing
//! - Progress tracking and reporting

pub mod file;
pub mod pe;
pub mod progress;
pub mod results;

pub use file::ModuleScanner;
pub use pe::{exported_names, inspect, inspect_bytes, ImageError, PeImage};
pub use progress::{ConsoleProgressReporter, ProgressTracker, ScanProgress};
pub use results::{Finding, FindingSet, MatchWriter};
