//! Orchestrates one refresh: load the cache, scan, re-extract what changed, save, link

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use stexdex_core::{
    Analyzer, Config, ConfigError, Corpus, CorpusDiff, CorpusError, CorpusStore, LoadOutcome, LoadStatus,
    UpdateReport,
};
use stexdex_linker::Linker;
use stexdex_scanner::{FilterError, PathFilter, Scanner};

/// Version tag written into caches; caches from other versions are discarded.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Outcome of [`ensure_up_to_date`].
#[derive(Debug)]
pub struct Refresh {
    /// Linked view of the refreshed corpus; `linker.corpus()` is the snapshot.
    pub linker: Linker,
    pub load_status: LoadStatus,
    pub scan: CorpusDiff,
    pub update: UpdateReport,
    /// The cache file was rewritten.
    pub saved: bool,
}

/// Bring the persisted corpus of the configured root in line with the filesystem and
/// link it.
pub fn ensure_up_to_date(config: &Config, analyzer: &dyn Analyzer) -> Result<Refresh, CorpusError> {
    let root = config.corpus_root()?;
    let store = config.store(VERSION)?;
    let filter = PathFilter::new(config.include.as_slice(), config.ignore.as_slice()).map_err(|err| match err {
        FilterError::InvalidGlob { pattern, source } => ConfigError::InvalidPattern {
            pattern,
            message: source.to_string(),
        },
    })?;
    refresh(&store, root, filter, analyzer)
}

/// [`ensure_up_to_date`] with explicit parts.
pub fn refresh(
    store: &CorpusStore,
    root: &Path,
    filter: PathFilter,
    analyzer: &dyn Analyzer,
) -> Result<Refresh, CorpusError> {
    let started = Instant::now();
    let LoadOutcome { mut corpus, status } = store.load();

    let mut reset = false;
    if corpus.root != root {
        if !corpus.is_empty() {
            tracing::warn!(
                "Cache at {} belongs to {}, not {} - rebuilding",
                store.cache_path().display(),
                corpus.root.display(),
                root.display()
            );
        }
        corpus = Corpus::new(root);
        reset = true;
    }

    let scanner = Scanner::new(root).with_filter(filter);
    let diff = scanner.scan(&corpus)?;
    for issue in &diff.issues {
        tracing::warn!("Skipped: {}", issue);
    }

    let update = store.update(&mut corpus, &diff, analyzer);

    let saved = update.changed() || reset || !status.is_clean();
    if saved {
        store.save(&corpus).map_err(CorpusError::CacheWrite)?;
    }

    let linker = Linker::build(Arc::new(corpus));
    tracing::info!(
        "Corpus up to date in {:?}: {} extracted, {} removed, {} stale, {} diagnostics",
        started.elapsed(),
        update.extracted,
        update.removed,
        update.stale.len(),
        linker.diagnostics().len()
    );

    Ok(Refresh {
        linker,
        load_status: status,
        scan: diff,
        update,
        saved,
    })
}
