//! Corpus diff computed by the scanner and applied by the store

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::ScanError;
use crate::model::{DirListing, FileKey, FileStamp};

/// An archive as found on disk during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveScan {
    pub id: String,
    /// Directory relative to the corpus root.
    pub path: PathBuf,
    /// Fresh directory listings; replaces the archive's cached ones.
    pub dirs: BTreeMap<String, DirListing>,
}

/// Difference between the cached corpus and the filesystem.
#[derive(Debug, Clone, Default)]
pub struct CorpusDiff {
    /// Every archive currently on disk. Archives missing here are dropped.
    pub archives: BTreeMap<String, ArchiveScan>,
    /// New files with their current stamps.
    pub added: BTreeMap<FileKey, FileStamp>,
    /// Files whose stamp no longer matches the cached one.
    pub modified: BTreeMap<FileKey, FileStamp>,
    pub removed: BTreeSet<FileKey>,
    /// Number of files whose stamp matched.
    pub unchanged: usize,
    /// Paths that were skipped.
    pub issues: Vec<ScanError>,
}

impl CorpusDiff {
    /// True if applying this diff would not touch any file record.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Files that need (re-)extraction, in key order.
    pub fn to_extract(&self) -> impl Iterator<Item = (&FileKey, &FileStamp)> {
        let mut all: Vec<_> = self.added.iter().chain(self.modified.iter()).collect();
        all.sort_by(|a, b| a.0.cmp(b.0));
        all.into_iter()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}
