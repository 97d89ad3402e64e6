//! Finding set and match listing output.

use crate::core::error::{Error, Result};
use crate::core::types::ModuleVerdict;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One matched module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Position of the path in walk (discovery) order
    pub index: u64,
    /// Module path
    pub path: PathBuf,
    /// Verdict that caused the path to be recorded
    pub verdict: ModuleVerdict,
}

/// Matched modules, kept in discovery order.
///
/// Workers finish out of order; entries are inserted by discovery index so
/// iteration always follows the walk.
#[derive(Debug, Default, Clone)]
pub struct FindingSet {
    findings: Vec<Finding>,
}

impl FindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a verdict. Only COM servers are kept; returns whether it was.
    pub fn record(&mut self, index: u64, path: PathBuf, verdict: ModuleVerdict) -> bool {
        if !verdict.is_match() {
            return false;
        }

        let at = self.findings.partition_point(|f| f.index < index);
        self.findings.insert(
            at,
            Finding {
                index,
                path,
                verdict,
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Finding> {
        self.findings.iter()
    }

    /// Matched paths in discovery order.
    pub fn paths(&self) -> impl DoubleEndedIterator<Item = &Path> {
        self.findings.iter().map(|f| f.path.as_path())
    }
}

/// Writes the flat match listing.
///
/// With a journal, every match is appended to `<output>.partial` and flushed
/// immediately; [`MatchWriter::finish`] writes the final listing (reverse
/// discovery order) and removes the journal.
pub struct MatchWriter {
    output: PathBuf,
    journal: Option<(PathBuf, BufWriter<File>)>,
}

impl MatchWriter {
    /// Create a writer for `output`, opening a fresh journal if `incremental`.
    pub fn create(output: &Path, incremental: bool) -> Result<Self> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::file_write(parent, e))?;
        }

        let journal = if incremental {
            let path = Self::journal_path(output);
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .map_err(|e| Error::file_write(&path, e))?;
            Some((path, BufWriter::new(file)))
        } else {
            None
        };

        Ok(Self {
            output: output.to_path_buf(),
            journal,
        })
    }

    /// Journal path for an output file.
    pub fn journal_path(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_owned();
        name.push(".partial");
        PathBuf::from(name)
    }

    /// Final output path.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Append one match to the journal, if enabled.
    pub fn append(&mut self, module: &Path) -> Result<()> {
        if let Some((path, writer)) = self.journal.as_mut() {
            writeln!(writer, "{}", module.display())
                .and_then(|_| writer.flush())
                .map_err(|e| Error::file_write(path.as_path(), e))?;
        }
        Ok(())
    }

    /// Write all findings, newest discovery first, and drop the journal.
    pub fn finish(self, findings: &FindingSet) -> Result<PathBuf> {
        let file = File::create(&self.output).map_err(|e| Error::file_write(&self.output, e))?;
        let mut writer = BufWriter::new(file);

        for path in findings.paths().rev() {
            writeln!(writer, "{}", path.display())
                .map_err(|e| Error::file_write(&self.output, e))?;
        }
        writer
            .flush()
            .map_err(|e| Error::file_write(&self.output, e))?;

        if let Some((journal, writer)) = self.journal {
            drop(writer);
            if let Err(e) = fs::remove_file(&journal) {
                log::warn!("Failed to remove journal {}: {}", journal.display(), e);
            }
        }

        log::info!(
            "Wrote {} COM server path(s) to {}",
            findings.len(),
            self.output.display()
        );
        Ok(self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_finding_set_keeps_only_matches() {
        let mut set = FindingSet::new();
        assert!(set.record(0, PathBuf::from("a.dll"), ModuleVerdict::IsComServer));
        assert!(!set.record(1, PathBuf::from("b.dll"), ModuleVerdict::NotComServer));
        assert!(!set.record(2, PathBuf::from("c.dll"), ModuleVerdict::InvalidImage));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_finding_set_discovery_order() {
        let mut set = FindingSet::new();
        set.record(5, PathBuf::from("five.dll"), ModuleVerdict::IsComServer);
        set.record(1, PathBuf::from("one.dll"), ModuleVerdict::IsComServer);
        set.record(3, PathBuf::from("three.dll"), ModuleVerdict::IsComServer);

        let paths: Vec<&Path> = set.paths().collect();
        assert_eq!(
            paths,
            vec![
                Path::new("one.dll"),
                Path::new("three.dll"),
                Path::new("five.dll")
            ]
        );
    }

    #[test]
    fn test_output_is_reverse_discovery_order() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("COM_DLLs.txt");

        let mut set = FindingSet::new();
        set.record(0, PathBuf::from("first.dll"), ModuleVerdict::IsComServer);
        set.record(1, PathBuf::from("second.dll"), ModuleVerdict::IsComServer);
        set.record(2, PathBuf::from("third.dll"), ModuleVerdict::IsComServer);

        let writer = MatchWriter::create(&output, false).unwrap();
        writer.finish(&set).unwrap();

        let contents = fs::read_to_string(&output).unwrap();
        assert_eq!(contents, "third.dll\nsecond.dll\nfirst.dll\n");
    }

    #[test]
    fn test_journal_is_flushed_then_removed() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out").join("COM_DLLs.txt");
        let journal = MatchWriter::journal_path(&output);

        let mut writer = MatchWriter::create(&output, true).unwrap();
        writer.append(Path::new("found.dll")).unwrap();

        // Visible on disk before the scan finishes
        assert_eq!(fs::read_to_string(&journal).unwrap(), "found.dll\n");

        let mut set = FindingSet::new();
        set.record(0, PathBuf::from("found.dll"), ModuleVerdict::IsComServer);
        let written = writer.finish(&set).unwrap();

        assert_eq!(written, output);
        assert!(!journal.exists());
        assert_eq!(fs::read_to_string(&output).unwrap(), "found.dll\n");
    }

    #[test]
    fn test_empty_listing() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("COM_DLLs.txt");
        MatchWriter::create(&output, false)
            .unwrap()
            .finish(&FindingSet::new())
            .unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "");
    }
}
