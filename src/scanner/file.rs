//! Module pipeline: walk the filesystem and inspect each candidate image.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{ModuleScanSummary, ModuleVerdict, ScanStatus};
use crate::scanner::pe;
use crate::scanner::progress::{ProgressTracker, ScanProgress};
use crate::scanner::results::{FindingSet, MatchWriter};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// Verdict from a worker, tagged with the path's discovery index.
#[derive(Debug)]
struct Inspection {
    index: u64,
    path: PathBuf,
    verdict: ModuleVerdict,
}

/// Filesystem scanner for in-process COM servers.
pub struct ModuleScanner {
    config: Arc<Config>,
    cancelled: Arc<AtomicBool>,
    progress: Arc<ProgressTracker>,
}

impl ModuleScanner {
    /// Create a new module scanner with the given configuration.
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_cancel_flag(config, Arc::new(AtomicBool::new(false)))
    }

    /// Create a scanner that stops when `cancelled` is set.
    pub fn with_cancel_flag(config: Arc<Config>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            config,
            cancelled,
            progress: Arc::new(ProgressTracker::new()),
        }
    }

    /// Get the progress tracker.
    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Set a progress callback.
    pub fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(ScanProgress) + Send + Sync + 'static,
    {
        self.progress.set_callback(callback);
    }

    /// Cancel the current scan.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if the scan has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check if a path should be excluded from scanning.
    pub fn should_exclude(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.config
            .scan
            .exclude_paths
            .iter()
            .any(|excluded| path_str.starts_with(excluded.as_str()))
    }

    /// Check if a path has one of the candidate extensions.
    pub fn is_candidate(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| self.config.scan.is_candidate_extension(&ext.to_string_lossy()))
            .unwrap_or(false)
    }

    /// Check if a file exceeds size limits.
    fn exceeds_size_limit(&self, size: u64) -> bool {
        size > self.config.scan.max_image_size_mb.saturating_mul(1024 * 1024)
    }

    /// Scan the configured roots.
    pub async fn scan(&self) -> Result<ModuleScanSummary> {
        let roots = self.config.scan.roots.clone();
        self.scan_roots(&roots).await
    }

    /// Walk `roots`, inspect every candidate and write the match listing.
    ///
    /// Matches are appended to the journal as they are found. The final
    /// listing is written even when the scan is cancelled, covering the
    /// modules inspected up to that point.
    pub async fn scan_roots(&self, roots: &[PathBuf]) -> Result<ModuleScanSummary> {
        let mut summary = ModuleScanSummary::new();
        summary.status = ScanStatus::Running;
        log::info!("Starting module scan of {} root(s)", roots.len());

        let mut writer =
            MatchWriter::create(&self.config.scan.output_file, self.config.scan.incremental_flush)?;

        let candidates = self.collect_candidates(roots, &mut summary);
        summary.candidates = candidates.len() as u64;
        self.progress.set_total_modules(summary.candidates);
        log::info!("Found {} candidate module(s)", summary.candidates);

        let queue: VecDeque<(u64, PathBuf)> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, path)| (i as u64, path))
            .collect();
        let queue = Arc::new(Mutex::new(queue));

        let (tx, mut rx) = mpsc::channel::<Inspection>(1000);

        let num_workers = self.config.scan.scan_threads.clamp(1, 16);
        let mut handles = Vec::with_capacity(num_workers);

        for _ in 0..num_workers {
            let queue = Arc::clone(&queue);
            let cancelled = Arc::clone(&self.cancelled);
            let tx = tx.clone();

            // Mapping and parsing block, so workers run on the blocking pool
            let handle = tokio::task::spawn_blocking(move || loop {
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }

                let item = match queue.lock() {
                    Ok(mut q) => q.pop_front(),
                    Err(_) => {
                        log::error!("Module queue lock poisoned in worker");
                        break;
                    }
                };

                let Some((index, path)) = item else {
                    break;
                };

                log::debug!("[{}] Checking if {} is a COM DLL", index + 1, path.display());
                let verdict = pe::inspect(&path);

                if tx.blocking_send(Inspection { index, path, verdict }).is_err() {
                    break;
                }
            });

            handles.push(handle);
        }

        // Drop the sender so the channel closes when workers finish
        drop(tx);

        let mut findings = FindingSet::new();
        while let Some(Inspection {
            index,
            path,
            verdict,
        }) = rx.recv().await
        {
            summary.record(verdict);
            self.progress.record_inspected(&path);

            match verdict {
                ModuleVerdict::IsComServer => {
                    log::info!("[!] COM DLL found: {}", path.display());
                    self.progress.increment_com_servers();
                    if let Err(e) = writer.append(&path) {
                        log::warn!("{}", e);
                    }
                    findings.record(index, path, verdict);
                }
                ModuleVerdict::InvalidImage => self.progress.increment_invalid(),
                ModuleVerdict::NotComServer => {}
            }
        }

        for handle in handles {
            handle
                .await
                .map_err(|e| Error::Worker(e.to_string()))?;
        }

        summary.matches = findings.paths().map(Path::to_path_buf).collect();
        summary.output_path = Some(writer.finish(&findings)?);

        if self.is_cancelled() {
            summary.finish(ScanStatus::Cancelled);
            self.progress.cancel();
        } else {
            summary.finish(ScanStatus::Completed);
            self.progress.complete();
        }

        log::info!(
            "Module scan {:?}: {} inspected, {} COM server(s), {} invalid, {} walk error(s)",
            summary.status,
            summary.inspected,
            summary.com_servers,
            summary.invalid_images,
            summary.walk_errors
        );

        Ok(summary)
    }

    /// Walk `roots` and return candidate paths in discovery order.
    ///
    /// Unreadable entries are counted in `summary.walk_errors` and skipped.
    fn collect_candidates(&self, roots: &[PathBuf], summary: &mut ModuleScanSummary) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        for root in roots {
            if self.is_cancelled() {
                break;
            }

            if root.is_file() {
                if self.is_candidate(root) {
                    candidates.push(root.clone());
                }
                continue;
            }

            if !root.is_dir() {
                log::warn!("Scan root {} is not a directory", root.display());
                summary.walk_errors += 1;
                continue;
            }

            let walker = WalkDir::new(root)
                .follow_links(self.config.scan.follow_symlinks)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !self.should_exclude(e.path()));

            for entry in walker {
                if self.is_cancelled() {
                    log::debug!("Walk interrupted");
                    break;
                }

                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        log::trace!("Skipping unreadable entry: {}", e);
                        summary.walk_errors += 1;
                        self.progress.increment_errors();
                        continue;
                    }
                };

                if !entry.file_type().is_file() || !self.is_candidate(entry.path()) {
                    continue;
                }

                match entry.metadata() {
                    Ok(m) if self.exceeds_size_limit(m.len()) => {
                        log::debug!("Skipping oversized {}", entry.path().display());
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::trace!("Skipping {}: {}", entry.path().display(), e);
                        summary.walk_errors += 1;
                        continue;
                    }
                }

                candidates.push(entry.into_path());
            }
        }

        candidates
    }
}
