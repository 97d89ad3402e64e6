//! Module scan progress tracking and reporting.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Module scan progress information.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Number of modules inspected
    pub modules_inspected: u64,
    /// Number of COM servers found
    pub com_servers: u64,
    /// Number of files rejected as invalid images
    pub invalid_images: u64,
    /// Number of walk errors encountered
    pub errors: u64,
    /// Most recently inspected path
    pub current_path: Option<PathBuf>,
    /// Total candidates (known once the walk finishes)
    pub total_modules: Option<u64>,
    /// Scan start time
    pub start_time: Instant,
    /// Whether scan is complete
    pub is_complete: bool,
    /// Whether scan was cancelled
    pub is_cancelled: bool,
}

impl ScanProgress {
    /// Calculate elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Calculate scan rate (modules per second).
    pub fn modules_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.modules_inspected as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Calculate completion percentage.
    pub fn percentage(&self) -> Option<f64> {
        self.total_modules.map(|total| {
            if total > 0 {
                (self.modules_inspected as f64 / total as f64) * 100.0
            } else {
                100.0
            }
        })
    }
}

type ProgressCallback = Box<dyn Fn(ScanProgress) + Send + Sync>;

/// Progress tracker for real-time scan monitoring.
pub struct ProgressTracker {
    modules_inspected: AtomicU64,
    com_servers: AtomicU64,
    invalid_images: AtomicU64,
    errors: AtomicU64,
    current_path: RwLock<Option<PathBuf>>,
    total_modules: RwLock<Option<u64>>,
    start_time: Instant,
    is_complete: AtomicBool,
    is_cancelled: AtomicBool,
    callback: RwLock<Option<ProgressCallback>>,
    callback_interval: Duration,
    last_callback: RwLock<Instant>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            modules_inspected: AtomicU64::new(0),
            com_servers: AtomicU64::new(0),
            invalid_images: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            current_path: RwLock::new(None),
            total_modules: RwLock::new(None),
            start_time: now,
            is_complete: AtomicBool::new(false),
            is_cancelled: AtomicBool::new(false),
            callback: RwLock::new(None),
            callback_interval: Duration::from_millis(100),
            last_callback: RwLock::new(now),
        }
    }

    /// Set a progress callback function.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(ScanProgress) + Send + Sync + 'static,
    {
        let mut cb = self.callback.write().unwrap_or_else(PoisonError::into_inner);
        *cb = Some(Box::new(callback));
    }

    /// Set the callback interval.
    pub fn set_interval(&mut self, interval: Duration) {
        self.callback_interval = interval;
    }

    /// Set the number of candidates the walk produced.
    pub fn set_total_modules(&self, total: u64) {
        let mut t = self
            .total_modules
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *t = Some(total);
    }

    /// Record one inspected module.
    pub fn record_inspected(&self, path: &Path) {
        self.modules_inspected.fetch_add(1, Ordering::Relaxed);
        *self
            .current_path
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(path.to_path_buf());
        self.maybe_callback();
    }

    /// Increment COM servers found counter.
    pub fn increment_com_servers(&self) {
        self.com_servers.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment invalid image counter.
    pub fn increment_invalid(&self) {
        self.invalid_images.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment error counter.
    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark scan as complete.
    pub fn complete(&self) {
        self.is_complete.store(true, Ordering::SeqCst);
        self.force_callback();
    }

    /// Mark scan as cancelled.
    pub fn cancel(&self) {
        self.is_cancelled.store(true, Ordering::SeqCst);
        self.force_callback();
    }

    /// Get current progress snapshot.
    pub fn snapshot(&self) -> ScanProgress {
        ScanProgress {
            modules_inspected: self.modules_inspected.load(Ordering::Relaxed),
            com_servers: self.com_servers.load(Ordering::Relaxed),
            invalid_images: self.invalid_images.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            current_path: self
                .current_path
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            total_modules: *self
                .total_modules
                .read()
                .unwrap_or_else(PoisonError::into_inner),
            start_time: self.start_time,
            is_complete: self.is_complete.load(Ordering::SeqCst),
            is_cancelled: self.is_cancelled.load(Ordering::SeqCst),
        }
    }

    /// Trigger callback if interval has passed.
    fn maybe_callback(&self) {
        let should_call = {
            let last = self
                .last_callback
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            last.elapsed() >= self.callback_interval
        };

        if should_call {
            self.force_callback();
        }
    }

    /// Force a callback invocation.
    fn force_callback(&self) {
        {
            let mut last = self
                .last_callback
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *last = Instant::now();
        }

        let callback = self.callback.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref cb) = *callback {
            cb(self.snapshot());
        }
    }
}

/// Console progress reporter (single rewritten line on stderr).
pub struct ConsoleProgressReporter {
    last_line_length: AtomicUsize,
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleProgressReporter {
    /// Create a new console reporter.
    pub fn new() -> Self {
        Self {
            last_line_length: AtomicUsize::new(0),
        }
    }

    /// Format one progress line.
    pub fn format(progress: &ScanProgress) -> String {
        let status = if progress.is_cancelled {
            "Cancelled"
        } else if progress.is_complete {
            "Complete"
        } else {
            "Scanning"
        };

        let rate = progress.modules_per_second();
        let elapsed = progress.elapsed().as_secs();

        if let Some(pct) = progress.percentage() {
            format!(
                "[{}] {:.1}% | Modules: {} | COM servers: {} | Rate: {:.0}/s | Time: {}s",
                status, pct, progress.modules_inspected, progress.com_servers, rate, elapsed
            )
        } else {
            format!(
                "[{}] Modules: {} | COM servers: {} | Rate: {:.0}/s | Time: {}s",
                status, progress.modules_inspected, progress.com_servers, rate, elapsed
            )
        }
    }

    /// Report progress to console.
    pub fn report(&self, progress: &ScanProgress) {
        let message = format!("\r{}", Self::format(progress));

        let last_len = self.last_line_length.load(Ordering::Relaxed);
        let padding = if message.len() < last_len {
            " ".repeat(last_len - message.len())
        } else {
            String::new()
        };

        eprint!("{}{}", message, padding);
        self.last_line_length.store(message.len(), Ordering::Relaxed);

        if progress.is_complete || progress.is_cancelled {
            eprintln!();
        }
    }
}
