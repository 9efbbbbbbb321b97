//! CLI command implementations

use anyhow::{Context, bail};
use stexdex_core::Config;
use stexdex_indexer::{Refresh, StexAnalyzer, VERSION, ensure_up_to_date};
use stexdex_linker::{ImportStatus, MatchKind};

fn refreshed(config: &Config) -> anyhow::Result<Refresh> {
    ensure_up_to_date(config, &StexAnalyzer).context("failed to refresh the corpus index")
}

pub fn index(config: &Config) -> anyhow::Result<()> {
    let refresh = refreshed(config)?;
    let corpus = refresh.linker.corpus();
    println!(
        "{} archives, {} files, {} symbols",
        corpus.archives.len(),
        corpus.file_count(),
        corpus.symbol_count()
    );
    println!(
        "{} extracted, {} removed, {} stale, {} skipped, {} diagnostics",
        refresh.update.extracted,
        refresh.update.removed,
        refresh.update.stale.len(),
        refresh.scan.issues.len() + refresh.update.issues.len(),
        refresh.linker.diagnostics().len()
    );
    for err in &refresh.update.extraction_errors {
        println!("  error: {err}");
    }
    Ok(())
}

pub fn clear(config: &Config) -> anyhow::Result<()> {
    let store = config.store(VERSION)?;
    store.clear()?;
    tracing::info!("Cache cleared: {}", store.cache_path().display());
    Ok(())
}

pub fn symbol(config: &Config, uri: &str) -> anyhow::Result<()> {
    let refresh = refreshed(config)?;
    let declarations = refresh.linker.symbol_declarations_of(uri);
    if declarations.is_empty() {
        bail!("unknown symbol {uri}");
    }
    for symbol in declarations {
        let file = symbol.file();
        println!("{} ({}:{}@{})", symbol.uri(), file.archive(), file.path(), symbol.span().start);
        for verb in symbol.verbalizations(None) {
            let marker = if verb.is_defining() { "*" } else { " " };
            println!(
                "  {marker} [{}] {} ({}@{})",
                verb.lang(),
                verb.text(),
                verb.file().path(),
                verb.span().start
            );
        }
    }
    Ok(())
}

pub fn candidates(config: &Config, word: &str, file: &str, lang: &str) -> anyhow::Result<()> {
    let (archive, path) = file
        .split_once(':')
        .with_context(|| format!("expected <archive>:<path>, got {file}"))?;
    let refresh = refreshed(config)?;
    let linker = &refresh.linker;
    let scope = linker
        .file_scope(archive, path)
        .with_context(|| format!("{file} is not part of the corpus"))?;

    for candidate in linker.candidates_for_word(word, lang, &scope)? {
        let status = match candidate.import_status {
            ImportStatus::Direct => "direct",
            ImportStatus::Transitive => "transitive",
            ImportStatus::NotImported => "not imported",
        };
        let kind = match candidate.match_kind {
            MatchKind::Exact => "exact",
            MatchKind::Stemmed => "stemmed",
        };
        println!(
            "{}  \"{}\"  [{status}, {kind}]",
            candidate.symbol.uri(),
            candidate.verbalization.text()
        );
    }
    Ok(())
}

pub fn closure(config: &Config, uri: &str) -> anyhow::Result<()> {
    let refresh = refreshed(config)?;
    let closure = refresh
        .linker
        .import_closure(uri)
        .with_context(|| format!("unknown module {uri}"))?;
    for module in closure {
        println!("{module}");
    }
    Ok(())
}

pub fn diagnostics(config: &Config) -> anyhow::Result<()> {
    let refresh = refreshed(config)?;
    for diagnostic in refresh.linker.diagnostics() {
        println!("{:?}: {}", diagnostic.kind(), diagnostic);
    }
    Ok(())
}

pub fn search(config: &Config, query: &str, limit: usize) -> anyhow::Result<()> {
    let refresh = refreshed(config)?;
    for (symbol, score) in refresh.linker.fuzzy_symbols(query, limit) {
        println!("{score:>5}  {}", symbol.uri());
    }
    Ok(())
}
