//! Error types shared across the pipeline

use std::path::PathBuf;

/// Per-path filesystem problem. Recoverable: the path is skipped and reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("cannot access {path}: {message}")]
    Inaccessible { path: PathBuf, message: String },

    #[error("broken symlink {path}")]
    BrokenSymlink { path: PathBuf },

    #[error("{path} vanished while the corpus was being read")]
    Vanished { path: PathBuf },

    #[error("unreadable manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },
}

impl ScanError {
    pub fn from_io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            ScanError::Vanished { path }
        } else {
            ScanError::Inaccessible {
                path,
                message: err.to_string(),
            }
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            ScanError::Inaccessible { path, .. }
            | ScanError::BrokenSymlink { path }
            | ScanError::Vanished { path }
            | ScanError::Manifest { path, .. } => path,
        }
    }
}

/// Malformed document. Recoverable: the file is skipped for this run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("{path} is not valid UTF-8")]
    InvalidUtf8 { path: String },

    #[error("{path}:{offset}: {message}")]
    Malformed {
        path: String,
        offset: usize,
        message: String,
    },
}

/// Errors produced by cache persistence.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("corrupt cache file: {reason}")]
    Corrupt { reason: String },

    #[error("incompatible cache schema version: expected {expected}, found {found}")]
    IncompatibleSchemaVersion { expected: u32, found: u32 },

    #[error("cache written by version {found}, running {expected}")]
    VersionMismatch { expected: String, found: String },
}

/// Fatal pipeline errors. Everything else is reported and the run continues.
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("cannot access corpus root {path}: {source}")]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write corpus cache: {0}")]
    CacheWrite(#[source] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid path pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("no corpus root configured (set MATHHUB or corpus_root)")]
    MissingCorpusRoot,

    #[error("failed to determine home directory for the default cache path")]
    MissingHomeDir,
}
