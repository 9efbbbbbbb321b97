//! Filesystem scan producing a [`CorpusDiff`]
//!
//! The scan never reads file content. Inside an archive every directory below `source/`
//! and `lib/` is stat'ed; when its mtime matches the cached [`DirListing`] the cached
//! entry names are reused instead of listing the directory again.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use stexdex_core::model::modified_nanos;
use stexdex_core::{Archive, ArchiveScan, Corpus, CorpusDiff, CorpusError, DirListing, FileKey, FileStamp, ScanError};

use crate::filter::PathFilter;
use crate::manifest::read_archive_id;

/// Top-level archive directories holding documents.
pub const CONTENT_DIRS: [&str; 2] = ["source", "lib"];

const DOCUMENT_EXTENSION: &str = "tex";

pub struct Scanner {
    root: PathBuf,
    filter: PathFilter,
}

/// Per-archive scan state.
struct ArchiveWalk<'a> {
    id: &'a str,
    dir: PathBuf,
    cached: Option<&'a Archive>,
    dirs: BTreeMap<String, DirListing>,
    seen: HashSet<String>,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Scanner {
            root: root.into(),
            filter: PathFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compare the filesystem with `cached`.
    pub fn scan(&self, cached: &Corpus) -> Result<CorpusDiff, CorpusError> {
        let meta = fs::metadata(&self.root).map_err(|source| CorpusError::RootInaccessible {
            path: self.root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(CorpusError::RootInaccessible {
                path: self.root.clone(),
                source: io::Error::other("not a directory"),
            });
        }

        let mut diff = CorpusDiff::default();
        let mut archive_dirs = Vec::new();
        self.discover(Path::new(""), &mut archive_dirs, &mut diff.issues);

        for rel in archive_dirs {
            let id = self.archive_id(&rel, &mut diff.issues);
            if let Some(existing) = diff.archives.get(&id) {
                diff.issues.push(ScanError::Manifest {
                    path: self.root.join(&rel),
                    message: format!("duplicate archive id {id} (already used by {})", existing.path.display()),
                });
                continue;
            }
            let scan = self.scan_archive(&id, &rel, cached.archive(&id), &mut diff);
            diff.archives.insert(id, scan);
        }

        for (id, archive) in &cached.archives {
            if !diff.archives.contains_key(id) {
                tracing::info!("Archive {} disappeared", id);
                diff.removed
                    .extend(archive.files.keys().map(|path| FileKey::new(id.clone(), path.clone())));
            }
        }

        tracing::info!(
            "Scanned {} archives: {} added, {} modified, {} removed, {} unchanged",
            diff.archives.len(),
            diff.added.len(),
            diff.modified.len(),
            diff.removed.len(),
            diff.unchanged
        );
        Ok(diff)
    }

    /// Collect archive directories (relative to the root) below `rel`.
    fn discover(&self, rel: &Path, found: &mut Vec<PathBuf>, issues: &mut Vec<ScanError>) {
        let dir = self.root.join(rel);
        if dir.join(".git").exists() {
            found.push(rel.to_path_buf());
            return;
        }
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("Skipping {}: {}", dir.display(), err);
                issues.push(ScanError::from_io(&dir, &err));
                return;
            }
        };
        let mut subdirs = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    issues.push(ScanError::from_io(&dir, &err));
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_hidden(&name) {
                continue;
            }
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => subdirs.push(name),
                Ok(_) => {}
                Err(err) => issues.push(ScanError::from_io(entry.path(), &err)),
            }
        }
        subdirs.sort();
        for name in subdirs {
            self.discover(&rel.join(name), found, issues);
        }
    }

    fn archive_id(&self, rel: &Path, issues: &mut Vec<ScanError>) -> String {
        let fallback = || {
            let id = rel.to_string_lossy().replace('\\', "/");
            if id.is_empty() {
                self.root
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| ".".to_string())
            } else {
                id
            }
        };
        match read_archive_id(&self.root.join(rel)) {
            Ok(Some(id)) => id,
            Ok(None) => fallback(),
            Err(issue) => {
                tracing::warn!("{}", issue);
                issues.push(issue);
                fallback()
            }
        }
    }

    fn scan_archive(&self, id: &str, rel: &Path, cached: Option<&Archive>, diff: &mut CorpusDiff) -> ArchiveScan {
        let mut walk = ArchiveWalk {
            id,
            dir: self.root.join(rel),
            cached,
            dirs: BTreeMap::new(),
            seen: HashSet::new(),
        };
        for top in CONTENT_DIRS {
            self.walk_dir(&mut walk, top, true, diff);
        }

        if let Some(archive) = cached {
            for path in archive.files.keys().filter(|path| !walk.seen.contains(*path)) {
                diff.removed.insert(FileKey::new(id, path.clone()));
            }
        }

        ArchiveScan {
            id: id.to_string(),
            path: rel.to_path_buf(),
            dirs: walk.dirs,
        }
    }

    fn walk_dir(&self, walk: &mut ArchiveWalk<'_>, rel_dir: &str, top_level: bool, diff: &mut CorpusDiff) {
        let abs = walk.dir.join(rel_dir);
        let meta = match fs::symlink_metadata(&abs) {
            Ok(meta) => meta,
            Err(err) if top_level && err.kind() == io::ErrorKind::NotFound => return,
            Err(err) => {
                diff.issues.push(ScanError::from_io(&abs, &err));
                return;
            }
        };
        if !meta.is_dir() {
            return;
        }

        let mtime = modified_nanos(&meta);
        let cached_listing = walk.cached.and_then(|archive| archive.dirs.get(rel_dir));
        let listing = match cached_listing {
            Some(listing) if mtime != 0 && listing.modified_nanos == mtime => listing.clone(),
            _ => match list_dir(&abs, mtime, &mut diff.issues) {
                Ok(listing) => listing,
                Err(err) => {
                    tracing::warn!("Cannot list {}: {}", abs.display(), err);
                    diff.issues.push(ScanError::from_io(&abs, &err));
                    match cached_listing {
                        Some(listing) => listing.clone(),
                        None => return,
                    }
                }
            },
        };

        for name in &listing.files {
            let path = format!("{rel_dir}/{name}");
            if !self.filter.accepts(walk.id, &path) {
                continue;
            }
            self.check_file(walk, path, diff);
        }
        for name in &listing.subdirs {
            self.walk_dir(walk, &format!("{rel_dir}/{name}"), false, diff);
        }
        walk.dirs.insert(rel_dir.to_string(), listing);
    }

    fn check_file(&self, walk: &mut ArchiveWalk<'_>, path: String, diff: &mut CorpusDiff) {
        let abs = walk.dir.join(&path);
        let record = walk.cached.and_then(|archive| archive.files.get(&path));
        let meta = match fs::symlink_metadata(&abs) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return,
            Err(err) => {
                let issue = ScanError::from_io(&abs, &err);
                // Keep what we know about files we merely cannot stat right now.
                if record.is_some() && !matches!(issue, ScanError::Vanished { .. }) {
                    walk.seen.insert(path);
                }
                tracing::warn!("Skipping {}", issue);
                diff.issues.push(issue);
                return;
            }
        };

        let stamp = FileStamp::from_metadata(&meta);
        let key = FileKey::new(walk.id, path.clone());
        match record {
            None => {
                tracing::debug!("New file {}", key);
                diff.added.insert(key, stamp);
            }
            Some(record) if record.stamp != stamp || record.stale => {
                tracing::debug!("Changed file {}", key);
                diff.modified.insert(key, stamp);
            }
            Some(_) => diff.unchanged += 1,
        }
        walk.seen.insert(path);
    }
}

/// Fresh listing of `dir`: visible subdirectories and `*.tex` files, sorted.
fn list_dir(dir: &Path, mtime: u64, issues: &mut Vec<ScanError>) -> io::Result<DirListing> {
    let mut subdirs = BTreeSet::new();
    let mut files = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                issues.push(ScanError::from_io(dir, &err));
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) {
            continue;
        }
        let kind = match entry.file_type() {
            Ok(kind) => kind,
            Err(err) => {
                issues.push(ScanError::from_io(entry.path(), &err));
                continue;
            }
        };
        if kind.is_symlink() {
            if fs::metadata(entry.path()).is_err() {
                tracing::warn!("Broken symlink {}", entry.path().display());
                issues.push(ScanError::BrokenSymlink { path: entry.path() });
            }
            continue;
        }
        if kind.is_dir() {
            subdirs.insert(name);
        } else if kind.is_file() && is_document(&name) {
            files.insert(name);
        }
    }
    Ok(DirListing {
        modified_nanos: mtime,
        subdirs: subdirs.into_iter().collect(),
        files: files.into_iter().collect(),
    })
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn is_document(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == DOCUMENT_EXTENSION)
}
