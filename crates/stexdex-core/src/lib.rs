//! stexdex core: corpus data model, change diff, persistent store and configuration

pub mod analyzer;
pub mod config;
pub mod diff;
pub mod error;
pub mod model;
pub mod store;
pub mod uri;


#[cfg(test)]
pub mod test_utils;

pub use analyzer::{AnalysisInput, Analyzer};
pub use config::Config;
pub use diff::{ArchiveScan, CorpusDiff};
pub use error::{CacheError, ConfigError, CorpusError, ExtractionError, ScanError};
pub use model::{
    Archive, ContentHash, Corpus, Dependency, DependencyKind, DirListing, Extraction, FileKey, FileRecord,
    FileStamp, Module, Span, Symbol, Verbalization, lang_from_file_name,
};
pub use store::{CACHE_FILE, CorpusStore, LoadOutcome, LoadStatus, UpdateReport, cache_dir_for_root};
