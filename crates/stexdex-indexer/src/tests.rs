//! End-to-end refreshes over temporary corpora

use std::fs;
use std::path::Path;

use stexdex_core::{Config, ConfigError, CorpusError, CorpusStore, FileKey, LoadStatus};
use stexdex_linker::DiagnosticKind;
use stexdex_scanner::PathFilter;
use tempfile::TempDir;

use crate::{Refresh, StexAnalyzer, VERSION, ensure_up_to_date, refresh};

const MODULE_M: &str = r"
\begin{smodule}{m}
  \symdecl{foo}
  A \definiendum{foo}{Foo Thing} is something.
\end{smodule}
";

const MODULE_USE: &str = r"
\begin{smodule}{use}
  \importmodule{m}
  Every \sn{foo} counts.
\end{smodule}
";

struct Fixture {
    corpus: TempDir,
    cache: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Fixture {
            corpus: TempDir::new().unwrap(),
            cache: TempDir::new().unwrap(),
        };
        fs::create_dir_all(fixture.root().join("A/.git")).unwrap();
        fixture
    }

    fn root(&self) -> &Path {
        self.corpus.path()
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn store(&self) -> CorpusStore {
        CorpusStore::new(self.cache.path(), VERSION)
    }

    fn refresh(&self) -> Refresh {
        refresh(&self.store(), self.root(), PathFilter::default(), &StexAnalyzer).unwrap()
    }
}

#[test]
fn word_lookup_through_import() {
    let fixture = Fixture::new();
    fixture.write("A/source/m.en.tex", MODULE_M);
    fixture.write("A/source/use.en.tex", MODULE_USE);

    let refresh = fixture.refresh();
    assert_eq!(refresh.load_status, LoadStatus::Missing);
    assert_eq!(refresh.update.extracted, 2);
    assert!(refresh.saved);

    let linker = &refresh.linker;
    let scope = linker.file_scope("A", "source/use.en.tex").unwrap();
    let candidates = linker.candidates_for_word("foo", "en", &scope).unwrap();
    let uris: Vec<_> = candidates.iter().map(|c| c.symbol.uri()).collect();
    assert_eq!(uris, ["A?m?foo"]);
    assert!(linker.diagnostics().is_empty(), "{:?}", linker.diagnostics());

    // `\sn{foo}` in `use` resolves through the import.
    let file = linker.file("A", "source/use.en.tex").unwrap();
    let verbs: Vec<_> = file.verbalizations().map(|v| (v.text(), v.symbol().uri())).collect();
    assert_eq!(verbs, [("foo", "A?m?foo")]);
    assert_eq!(linker.import_closure("A?use").unwrap().into_iter().collect::<Vec<_>>(), ["A?m"]);
}

#[test]
fn references_resolve_in_their_own_module() {
    let fixture = Fixture::new();
    fixture.write("A/source/x.en.tex", "\\begin{smodule}{x}\\symdecl{foo}\\end{smodule}\n");
    let text = r"\begin{smodule}{a}
  \importmodule{x}
  A \sn{foo} here.
\end{smodule}
\begin{smodule}{b}
  No \sn{foo} there.
\end{smodule}
";
    fixture.write("A/source/two.en.tex", text);

    let refresh = fixture.refresh();
    let linker = &refresh.linker;
    let file = linker.file("A", "source/two.en.tex").unwrap();
    let verbs: Vec<_> = file.verbalizations().map(|v| v.symbol().uri()).collect();
    assert_eq!(verbs, ["A?x?foo"]);
    let kinds: Vec<_> = linker.diagnostics().iter().map(|d| d.kind()).collect();
    assert_eq!(kinds, [DiagnosticKind::DanglingReference]);

    let foo = linker.find_symbol("A?x?foo").unwrap();
    let inside_a = text.find("\\sn").unwrap() as u32;
    let inside_b = text.rfind("\\sn").unwrap() as u32;
    assert!(file.symbol_is_in_scope_at(foo, inside_a));
    assert!(!file.symbol_is_in_scope_at(foo, inside_b));
    assert!(!file.symbol_is_in_scope_at(foo, text.len() as u32));
}

#[test]
fn deleted_file_disappears_everywhere() {
    let fixture = Fixture::new();
    fixture.write("A/source/m.en.tex", MODULE_M);
    fixture.write("A/source/use.en.tex", MODULE_USE);
    fixture.refresh();

    fs::remove_file(fixture.root().join("A/source/m.en.tex")).unwrap();
    let refresh = fixture.refresh();
    assert_eq!(refresh.load_status, LoadStatus::Loaded);
    assert_eq!(refresh.update.removed, 1);

    let linker = &refresh.linker;
    assert!(linker.find_symbol("A?m?foo").is_none());
    assert!(linker.symbols_named("foo").is_empty());
    assert!(linker.file("A", "source/m.en.tex").is_none());
    let scope = linker.file_scope("A", "source/use.en.tex").unwrap();
    assert!(linker.candidates_for_word("foo", "en", &scope).unwrap().is_empty());
    assert!(
        linker
            .corpus()
            .file(&FileKey::new("A", "source/m.en.tex"))
            .is_none()
    );

    let reloaded = fixture.store().load();
    assert_eq!(&reloaded.corpus, linker.corpus().as_ref());
}

#[test]
fn missing_dependency_is_dangling() {
    let fixture = Fixture::new();
    fixture.write("A/source/use.en.tex", MODULE_USE);

    let refresh = fixture.refresh();
    let kinds: Vec<_> = refresh.linker.diagnostics().iter().map(|d| d.kind()).collect();
    assert_eq!(kinds, [DiagnosticKind::DanglingReference, DiagnosticKind::DanglingReference]);
    insta::assert_snapshot!(refresh.linker.diagnostics()[0].to_string(), @"A:source/use.en.tex@24: module A?m not found");
}

#[test]
fn duplicate_symbols_are_ambiguous_but_queryable() {
    let fixture = Fixture::new();
    fixture.write("A/source/m.en.tex", MODULE_M);
    fixture.write(
        "A/source/m.de.tex",
        "\\begin{smodule}{m}\\symdecl{foo}\\definiendum{foo}{Foo Ding}\\end{smodule}",
    );

    let refresh = fixture.refresh();
    let linker = &refresh.linker;
    let ambiguities: Vec<_> = linker.diagnostics_of(DiagnosticKind::LinkAmbiguity).collect();
    assert_eq!(ambiguities.len(), 1);

    for (path, lang, word) in [("source/m.en.tex", "en", "thing"), ("source/m.de.tex", "de", "ding")] {
        let scope = linker.file_scope("A", path).unwrap();
        let symbol = linker.find_symbol_in_scope("A?m?foo", &scope).unwrap().unwrap();
        assert_eq!(symbol.file().path(), path);
        let found = linker.candidates_for_word(word, lang, &scope).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, symbol);
    }
}

#[test]
fn refresh_is_idempotent() {
    let fixture = Fixture::new();
    fixture.write("A/source/m.en.tex", MODULE_M);
    fixture.write("A/source/use.en.tex", MODULE_USE);
    let first = fixture.refresh();
    let bytes = fs::read(fixture.store().cache_path()).unwrap();

    let second = fixture.refresh();
    assert!(second.scan.is_empty());
    assert!(!second.update.changed());
    assert!(!second.saved);
    assert_eq!(fs::read(fixture.store().cache_path()).unwrap(), bytes);
    assert_eq!(first.linker.corpus(), second.linker.corpus());
}

#[test]
fn archives_without_content_do_not_dirty_the_cache() {
    let fixture = Fixture::new();
    fixture.write("A/source/m.en.tex", MODULE_M);
    fs::create_dir_all(fixture.root().join("meta/.git")).unwrap();
    fixture.write("meta/README.md", "not an archive with sources");

    let first = fixture.refresh();
    assert_eq!(first.update.archives_added, 1);
    assert_eq!(first.linker.archives().count(), 1);

    for _ in 0..2 {
        let again = fixture.refresh();
        assert!(again.scan.is_empty());
        assert_eq!(again.update.archives_added, 0);
        assert!(!again.update.changed());
        assert!(!again.saved);
    }
}

#[test]
fn persistently_broken_file_is_saved_once() {
    let fixture = Fixture::new();
    fixture.write("A/source/m.en.tex", MODULE_M);
    fixture.refresh();

    fixture.write("A/source/m.en.tex", "\\begin{smodule}{m}\n");
    let broken = fixture.refresh();
    assert!(broken.saved);
    assert_eq!(broken.update.newly_stale, 1);

    let again = fixture.refresh();
    assert_eq!(again.update.stale, [FileKey::new("A", "source/m.en.tex")]);
    assert_eq!(again.update.extraction_errors.len(), 1);
    assert!(!again.saved);
    assert!(again.linker.find_symbol("A?m?foo").unwrap().file().is_stale());
}

#[test]
fn changed_file_is_reextracted() {
    let fixture = Fixture::new();
    fixture.write("A/source/m.en.tex", MODULE_M);
    fixture.write("A/source/use.en.tex", MODULE_USE);
    fixture.refresh();

    fixture.write(
        "A/source/m.en.tex",
        "\\begin{smodule}{m}\n\\symdecl{foo}\n\\symdecl{bar}\n\\end{smodule}\n",
    );
    let refresh = fixture.refresh();
    assert_eq!(refresh.update.extracted, 1);
    assert!(refresh.saved);
    assert!(refresh.linker.find_symbol("A?m?bar").is_some());
}

#[test]
fn broken_file_keeps_its_previous_record() {
    let fixture = Fixture::new();
    fixture.write("A/source/m.en.tex", MODULE_M);
    fixture.refresh();

    fixture.write("A/source/m.en.tex", "\\begin{smodule}{m}\n\\symdecl{foo}\n\\symdecl{bar}\n");
    let refresh = fixture.refresh();
    assert_eq!(refresh.update.stale, [FileKey::new("A", "source/m.en.tex")]);
    assert_eq!(refresh.update.extraction_errors.len(), 1);

    let linker = &refresh.linker;
    let foo = linker.find_symbol("A?m?foo").unwrap();
    assert!(foo.file().is_stale());
    assert!(linker.find_symbol("A?m?bar").is_none());

    fixture.write("A/source/m.en.tex", MODULE_M.replace("foo", "baz").as_str());
    let healed = fixture.refresh();
    assert!(healed.update.stale.is_empty());
    assert!(!healed.linker.find_symbol("A?m?baz").unwrap().file().is_stale());
}

#[test]
fn broken_new_file_stays_absent() {
    let fixture = Fixture::new();
    fixture.write("A/source/m.en.tex", "\\end{smodule}");

    let refresh = fixture.refresh();
    assert_eq!(refresh.update.extraction_errors.len(), 1);
    assert!(refresh.linker.file("A", "source/m.en.tex").is_none());
}

#[test]
fn configured_refresh() {
    let fixture = Fixture::new();
    fixture.write("A/source/m.en.tex", MODULE_M);
    fixture.write("A/source/drafts/old.en.tex", MODULE_USE);

    let config = Config {
        corpus_root: Some(fixture.root().to_path_buf()),
        cache_dir: Some(fixture.cache.path().to_path_buf()),
        ignore: vec!["*/source/drafts/**".to_string()],
        ..Config::default()
    };
    let refresh = ensure_up_to_date(&config, &StexAnalyzer).unwrap();
    assert_eq!(refresh.linker.files().count(), 1);
    assert!(config.cache_location().unwrap().join(stexdex_core::CACHE_FILE).is_file());

    let bad = Config {
        include: vec!["source/[".to_string()],
        ..config.clone()
    };
    let err = ensure_up_to_date(&bad, &StexAnalyzer).unwrap_err();
    assert!(matches!(err, CorpusError::Config(ConfigError::InvalidPattern { .. })), "{err}");

    let missing = Config {
        corpus_root: None,
        ..config
    };
    let err = ensure_up_to_date(&missing, &StexAnalyzer).unwrap_err();
    assert!(matches!(err, CorpusError::Config(ConfigError::MissingCorpusRoot)), "{err}");
}

#[test]
fn inaccessible_root_is_fatal() {
    let fixture = Fixture::new();
    let missing = fixture.root().join("nowhere");
    let err = refresh(&fixture.store(), &missing, PathFilter::default(), &StexAnalyzer).unwrap_err();
    assert!(matches!(err, CorpusError::RootInaccessible { .. }), "{err}");
}
