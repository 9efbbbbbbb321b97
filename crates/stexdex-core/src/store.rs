//! Persistent corpus store
//!
//! The corpus tree is written as a single file:
//!
//! ```text
//! MAGIC (8 bytes) | header length (u32 LE) | bincode(CacheHeader) | bincode(Corpus)
//! ```
//!
//! The header carries the schema version, the tool version that wrote the file, and the
//! length and blake3 hash of the payload. Anything that fails to validate is treated as
//! a missing cache; interrupted writes never replace a good file because saves go
//! through a temp file and a rename.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bincode::Options;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analyzer::{AnalysisInput, Analyzer};
use crate::diff::CorpusDiff;
use crate::error::{CacheError, ExtractionError, ScanError};
use crate::model::{Archive, ContentHash, Corpus, FileKey, FileRecord, FileStamp};

/// Cache file name inside the cache directory.
pub const CACHE_FILE: &str = "corpus.bin";

/// Bumped whenever the serialized layout of [`Corpus`] changes.
pub const CACHE_SCHEMA_VERSION: u32 = 2;

/// Upper bound for a cache payload we will try to decode.
pub const PAYLOAD_LIMIT_BYTES: u64 = 1 << 30;

/// Below this many files extraction stays on the calling thread.
pub const PARALLEL_THRESHOLD: usize = 50;

const MAGIC: &[u8; 8] = b"STEXDEX\0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheHeader {
    schema_version: u32,
    tool_version: String,
    saved_at: String,
    payload_len: u64,
    payload_hash: String,
}

/// How `load` arrived at its corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded,
    /// Written by another tool version, kept because of the keep-cache override.
    LoadedDespiteVersion { found: String },
    Missing,
    VersionMismatch { found: String },
    Corrupt { reason: String },
}

impl LoadStatus {
    /// The loaded corpus is exactly what is on disk under the current version.
    pub fn is_clean(&self) -> bool {
        matches!(self, LoadStatus::Loaded)
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub corpus: Corpus,
    pub status: LoadStatus,
}

/// Result of applying a diff.
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub extracted: usize,
    pub removed: usize,
    pub archives_added: usize,
    pub archives_removed: usize,
    /// Files that kept an older record because re-extraction failed.
    pub stale: Vec<FileKey>,
    /// Records of `stale` that were fresh before this update.
    pub newly_stale: usize,
    pub extraction_errors: Vec<ExtractionError>,
    pub issues: Vec<ScanError>,
}

impl UpdateReport {
    pub fn changed(&self) -> bool {
        self.extracted > 0
            || self.removed > 0
            || self.archives_added > 0
            || self.archives_removed > 0
            || self.newly_stale > 0
    }
}

enum Extracted {
    Record(FileRecord),
    Failed(ExtractionError),
    Unreadable(ScanError),
}

/// Loads, updates and saves the corpus tree at an explicit cache location.
#[derive(Debug, Clone)]
pub struct CorpusStore {
    cache_dir: PathBuf,
    version: String,
    keep_cache: bool,
}

impl CorpusStore {
    pub fn new(cache_dir: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        CorpusStore {
            cache_dir: cache_dir.into(),
            version: version.into(),
            keep_cache: false,
        }
    }

    /// Tolerate caches written by a different tool version.
    pub fn keep_cache(mut self, keep: bool) -> Self {
        self.keep_cache = keep;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Best available snapshot; never fails.
    pub fn load(&self) -> LoadOutcome {
        let path = self.cache_path();
        let status = match self.read() {
            Ok(Some((corpus, found))) => {
                let status = if found == self.version {
                    LoadStatus::Loaded
                } else {
                    tracing::info!("Keeping cache from version {} (keep-cache override)", found);
                    LoadStatus::LoadedDespiteVersion { found }
                };
                tracing::info!(
                    "Loaded corpus cache from {} ({} archives, {} files)",
                    path.display(),
                    corpus.archives.len(),
                    corpus.file_count()
                );
                return LoadOutcome { corpus, status };
            }
            Ok(None) => {
                tracing::info!("No corpus cache at {} - starting from scratch", path.display());
                LoadStatus::Missing
            }
            Err(CacheError::VersionMismatch { found, .. }) => {
                tracing::info!("Corpus cache comes from version {} - discarding it", found);
                LoadStatus::VersionMismatch { found }
            }
            Err(err) => {
                tracing::warn!("Corpus cache {} is unusable ({}) - rebuilding", path.display(), err);
                LoadStatus::Corrupt {
                    reason: err.to_string(),
                }
            }
        };
        LoadOutcome {
            corpus: Corpus::default(),
            status,
        }
    }

    /// Reads and validates the cache file; `Ok(None)` if there is none.
    fn read(&self) -> Result<Option<(Corpus, String)>, CacheError> {
        let path = self.cache_path();
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if !meta.is_file() {
            return Err(corrupt("cache path is not a regular file"));
        }
        if meta.len() > PAYLOAD_LIMIT_BYTES {
            return Err(corrupt("cache file exceeds the size limit"));
        }

        let bytes = fs::read(&path)?;
        let (header, payload) = split_header(&bytes)?;

        if header.schema_version != CACHE_SCHEMA_VERSION {
            return Err(CacheError::IncompatibleSchemaVersion {
                expected: CACHE_SCHEMA_VERSION,
                found: header.schema_version,
            });
        }
        if header.tool_version != self.version && !self.keep_cache {
            return Err(CacheError::VersionMismatch {
                expected: self.version.clone(),
                found: header.tool_version,
            });
        }
        if payload.len() as u64 != header.payload_len {
            return Err(corrupt("payload length mismatch (incomplete write?)"));
        }
        if blake3::hash(payload).to_hex().as_str() != header.payload_hash {
            return Err(corrupt("payload hash mismatch"));
        }

        let corpus: Corpus = bincode_options()
            .with_limit(PAYLOAD_LIMIT_BYTES)
            .deserialize(payload)?;
        tracing::debug!("Cache header: saved at {} by {}", header.saved_at, header.tool_version);
        Ok(Some((corpus, header.tool_version)))
    }

    /// Serialize the corpus, tagged with the running version.
    pub fn save(&self, corpus: &Corpus) -> Result<(), CacheError> {
        let payload = bincode_options().serialize(corpus)?;
        let header = CacheHeader {
            schema_version: CACHE_SCHEMA_VERSION,
            tool_version: self.version.clone(),
            saved_at: chrono::Utc::now().to_rfc3339(),
            payload_len: payload.len() as u64,
            payload_hash: blake3::hash(&payload).to_hex().to_string(),
        };
        let header_bytes = bincode_options().serialize(&header)?;

        let path = self.cache_path();
        atomic_write(&path, |file| {
            file.write_all(MAGIC)?;
            file.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
            file.write_all(&header_bytes)?;
            file.write_all(&payload)?;
            Ok(())
        })?;

        tracing::info!(
            "Saved corpus cache to {} ({} files, {} bytes)",
            path.display(),
            corpus.file_count(),
            payload.len()
        );
        Ok(())
    }

    /// Remove the cache file.
    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_file(self.cache_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Apply a scan diff: drop removed files, re-extract added and modified ones.
    pub fn update(&self, corpus: &mut Corpus, diff: &CorpusDiff, analyzer: &dyn Analyzer) -> UpdateReport {
        let mut report = UpdateReport {
            issues: diff.issues.clone(),
            ..UpdateReport::default()
        };

        let known: BTreeSet<String> = corpus.archives.keys().cloned().collect();
        corpus.archives.retain(|id, _| diff.archives.contains_key(id));

        for (id, scan) in &diff.archives {
            let archive = corpus
                .archives
                .entry(id.clone())
                .or_insert_with(|| Archive::new(id.clone(), scan.path.clone()));
            archive.path = scan.path.clone();
            archive.dirs = scan.dirs.clone();
        }

        for key in &diff.removed {
            if let Some(archive) = corpus.archives.get_mut(&key.archive) {
                if archive.files.remove(&key.path).is_some() {
                    report.removed += 1;
                }
            }
        }

        let jobs: Vec<(&FileKey, &FileStamp, PathBuf)> = diff
            .to_extract()
            .filter_map(|(key, stamp)| {
                let scan = diff.archives.get(&key.archive)?;
                Some((key, stamp, corpus.root.join(&scan.path).join(&key.path)))
            })
            .collect();

        if !jobs.is_empty() {
            tracing::info!("Updating the information for {} files", jobs.len());
        }

        let run = |(key, stamp, path): &(&FileKey, &FileStamp, PathBuf)| extract_file(analyzer, key, **stamp, path);
        let results: Vec<Extracted> = if jobs.len() < PARALLEL_THRESHOLD {
            jobs.iter().map(run).collect()
        } else {
            jobs.par_iter().map(run).collect()
        };

        for ((key, _, _), result) in jobs.iter().zip(results) {
            let Some(archive) = corpus.archives.get_mut(&key.archive) else {
                continue;
            };
            match result {
                Extracted::Record(record) => {
                    archive.files.insert(key.path.clone(), record);
                    report.extracted += 1;
                }
                Extracted::Failed(err) => {
                    match archive.files.get_mut(&key.path) {
                        Some(previous) if previous.stale => {
                            tracing::info!("{} still fails to extract: {}", key, err);
                            report.stale.push((*key).clone());
                        }
                        Some(previous) => {
                            tracing::warn!("Keeping the previous record of {}: {}", key, err);
                            previous.stale = true;
                            report.newly_stale += 1;
                            report.stale.push((*key).clone());
                        }
                        None => tracing::warn!("Skipping {}: {}", key, err),
                    }
                    report.extraction_errors.push(err);
                }
                Extracted::Unreadable(issue) => {
                    tracing::warn!("Skipping {}: {}", key, issue);
                    if matches!(issue, ScanError::Vanished { .. }) {
                        if archive.files.remove(&key.path).is_some() {
                            report.removed += 1;
                        }
                    } else if let Some(previous) = archive.files.get_mut(&key.path) {
                        if !previous.stale {
                            previous.stale = true;
                            report.newly_stale += 1;
                        }
                        report.stale.push((*key).clone());
                    }
                    report.issues.push(issue);
                }
            }
        }

        // Archives without content directories are not kept.
        corpus.archives.retain(|_, archive| !archive.files.is_empty() || !archive.dirs.is_empty());
        report.archives_added = corpus.archives.keys().filter(|id| !known.contains(*id)).count();
        report.archives_removed = known.iter().filter(|id| !corpus.archives.contains_key(*id)).count();
        report
    }
}

fn extract_file(analyzer: &dyn Analyzer, key: &FileKey, stamp: FileStamp, path: &Path) -> Extracted {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) => return Extracted::Unreadable(ScanError::from_io(path, &err)),
    };
    let input = AnalysisInput {
        archive: &key.archive,
        path: &key.path,
        content: &content,
    };
    match analyzer.analyze(&input) {
        Ok(extraction) => {
            tracing::debug!("Extracted {} ({} modules)", key, extraction.modules.len());
            Extracted::Record(FileRecord::new(key.path.clone(), stamp, ContentHash::of(&content), extraction))
        }
        Err(err) => Extracted::Failed(err),
    }
}

fn split_header(bytes: &[u8]) -> Result<(CacheHeader, &[u8]), CacheError> {
    let rest = bytes
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| corrupt("missing magic bytes"))?;
    if rest.len() < 4 {
        return Err(corrupt("truncated header"));
    }
    let (len_bytes, rest) = rest.split_at(4);
    let header_len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if rest.len() < header_len {
        return Err(corrupt("truncated header"));
    }
    let (header_bytes, payload) = rest.split_at(header_len);
    let header: CacheHeader = bincode_options().with_limit(64 * 1024).deserialize(header_bytes)?;
    Ok((header, payload))
}

fn corrupt(reason: &str) -> CacheError {
    CacheError::Corrupt {
        reason: reason.to_string(),
    }
}

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write through a uniquely named temp file in the same directory, then rename.
fn atomic_write(
    path: &Path,
    write: impl FnOnce(&mut fs::File) -> io::Result<()>,
) -> Result<(), CacheError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other("cache path has no file name"))?;
    let (tmp_path, mut file) = loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{}.{}", std::process::id(), counter));
        let tmp_path = parent.join(tmp_name);
        match fs::OpenOptions::new().write(true).create_new(true).open(&tmp_path) {
            Ok(file) => break (tmp_path, file),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    };

    let written = write(&mut file).and_then(|()| file.sync_all());
    drop(file);
    if let Err(err) = written.and_then(|()| fs::rename(&tmp_path, path)) {
        if let Err(remove_err) = fs::remove_file(&tmp_path) {
            if remove_err.kind() != io::ErrorKind::NotFound {
                tracing::debug!("Failed to remove temp file {}: {}", tmp_path.display(), remove_err);
            }
        }
        return Err(err.into());
    }

    #[cfg(unix)]
    if let Err(err) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
        tracing::debug!("Failed to sync {} (best effort): {}", parent.display(), err);
    }
    Ok(())
}

/// Cache directory for a corpus root below a cache base directory.
pub fn cache_dir_for_root(cache_base: &Path, root: &Path) -> PathBuf {
    let key = blake3::hash(root.to_string_lossy().as_bytes()).to_hex();
    cache_base.join(&key.as_str()[..16])
}
