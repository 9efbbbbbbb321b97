//! Core data structures for the corpus tree
//!
//! Everything in here is owned, acyclic data: a [`Corpus`] owns [`Archive`]s, an archive
//! owns [`FileRecord`]s, a file owns its [`Module`]s and so on. Relationships that cross
//! the ownership tree (module parents, imports, symbol references) are URI strings that
//! the linker resolves later.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// Identifies a file inside the corpus: archive id plus path relative to the archive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileKey {
    pub archive: String,
    pub path: String,
}

impl FileKey {
    pub fn new(archive: impl Into<String>, path: impl Into<String>) -> Self {
        FileKey {
            archive: archive.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.archive, self.path)
    }
}

/// Cheap change signal taken from file metadata (size + mtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct FileStamp {
    pub len: u64,
    pub modified_nanos: u64,
}

impl FileStamp {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        FileStamp {
            len: meta.len(),
            modified_nanos: modified_nanos(meta),
        }
    }
}

/// Modification time in nanoseconds since the epoch; 0 when the platform can't tell.
pub fn modified_nanos(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|dur| dur.as_nanos() as u64)
        .unwrap_or(0)
}

/// Hex-encoded blake3 hash of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        ContentHash(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Byte range inside a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span {
            start: start as u32,
            end: end as u32,
        }
    }

    pub fn contains(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// A natural-language phrase naming a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verbalization {
    /// The reference as written, e.g. `foo` or `set?member`.
    pub symbol_ref: String,
    /// Last `?`-segment of `symbol_ref`.
    pub symbol_name: String,
    /// Everything before the last `?`, if anything.
    pub path_hint: Option<String>,
    pub text: String,
    pub lang: String,
    pub span: Span,
    /// Verbalization introduces the symbol (definiendum) rather than referring to it.
    pub is_defining: bool,
}

/// A symbol declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub uri: String,
    /// URI of the declaring module.
    pub module: String,
    pub span: Span,
    /// Verbalizations attached to the declaration by the analyzer.
    pub verbalizations: Vec<Verbalization>,
}

/// A named, importable scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Name inside the file; nested modules are `parent/child`.
    pub name: String,
    /// `<archive>` or `<archive>/<dir>`.
    pub namespace: String,
    pub uri: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub symbols: Vec<Symbol>,
    /// URIs of modules imported (re-exported) by this module.
    pub imports: Vec<String>,
    pub span: Span,
    /// Generated for a `mathstructure` rather than written as an `smodule`.
    pub is_structure: bool,
}

/// How a dependency makes its target visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyKind {
    /// `\importmodule`: visible here and re-exported to importers.
    Import,
    /// `\usemodule` / `\requiremodule`: visible here only.
    Use,
}

/// A dependency directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Declaring module URI; `None` when declared outside any module.
    pub source: Option<String>,
    /// Target module URI, resolved against the archive root.
    pub target: String,
    /// Alternative target resolved relative to the declaring file's directory.
    pub fallback: Option<String>,
    pub kind: DependencyKind,
    pub span: Span,
}

/// Output of a single analyzer run over one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Extraction {
    pub lang: String,
    pub modules: Vec<Module>,
    pub dependencies: Vec<Dependency>,
    pub verbalizations: Vec<Verbalization>,
}

/// Everything known about one corpus file. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the archive directory.
    pub path: String,
    pub stamp: FileStamp,
    pub content_hash: ContentHash,
    pub lang: String,
    pub modules: Vec<Module>,
    pub dependencies: Vec<Dependency>,
    pub verbalizations: Vec<Verbalization>,
    /// The last re-extraction failed; this record reflects older content.
    pub stale: bool,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, stamp: FileStamp, content_hash: ContentHash, extraction: Extraction) -> Self {
        FileRecord {
            path: path.into(),
            stamp,
            content_hash,
            lang: extraction.lang,
            modules: extraction.modules,
            dependencies: extraction.dependencies,
            verbalizations: extraction.verbalizations,
            stale: false,
        }
    }

    /// Equal apart from the metadata stamp.
    pub fn same_content(&self, other: &FileRecord) -> bool {
        self.path == other.path
            && self.content_hash == other.content_hash
            && self.lang == other.lang
            && self.modules == other.modules
            && self.dependencies == other.dependencies
            && self.verbalizations == other.verbalizations
    }

    pub fn module(&self, uri: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.uri == uri)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.modules.iter().flat_map(|m| m.symbols.iter())
    }
}

/// Cached listing of one directory, valid while its mtime is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DirListing {
    pub modified_nanos: u64,
    /// Names of relevant subdirectories.
    pub subdirs: Vec<String>,
    /// Names of relevant files.
    pub files: Vec<String>,
}

/// A directory-scoped unit of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub id: String,
    /// Directory relative to the corpus root.
    pub path: PathBuf,
    /// Directory listings keyed by path relative to the archive directory.
    pub dirs: BTreeMap<String, DirListing>,
    pub files: BTreeMap<String, FileRecord>,
}

impl Archive {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Archive {
            id: id.into(),
            path: path.into(),
            dirs: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }
}

/// The root of the persisted tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Corpus {
    pub root: PathBuf,
    pub archives: BTreeMap<String, Archive>,
}

impl Corpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Corpus {
            root: root.into(),
            archives: BTreeMap::new(),
        }
    }

    pub fn archive(&self, id: &str) -> Option<&Archive> {
        self.archives.get(id)
    }

    pub fn file(&self, key: &FileKey) -> Option<&FileRecord> {
        self.archives.get(&key.archive)?.files.get(&key.path)
    }

    /// All files in archive/path order.
    pub fn files(&self) -> impl Iterator<Item = (&Archive, &FileRecord)> {
        self.archives
            .values()
            .flat_map(|archive| archive.files.values().map(move |file| (archive, file)))
    }

    pub fn file_count(&self) -> usize {
        self.archives.values().map(|a| a.files.len()).sum()
    }

    pub fn symbol_count(&self) -> usize {
        self.files().map(|(_, f)| f.symbols().count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }
}

/// Language tag from a file name: `name.<lang>.tex`, defaulting to `en`.
pub fn lang_from_file_name(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    let segments: Vec<&str> = name.split('.').collect();
    if segments.len() >= 3 {
        segments[segments.len() - 2].to_string()
    } else {
        "en".to_string()
    }
}
