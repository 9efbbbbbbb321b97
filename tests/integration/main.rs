//! Integration tests for stexdex
//!
//! These tests run the whole pipeline over multi-archive corpora, through the library
//! and through the binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use stexdex_core::{Config, LoadStatus};
use stexdex_indexer::{StexAnalyzer, ensure_up_to_date};
use stexdex_linker::{ImportStatus, MatchKind};
use tempfile::TempDir;

struct Corpus {
    root: TempDir,
    cache: TempDir,
    home: TempDir,
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// `smglom/sets` declares `member`; `courses/ai` uses it across archives and directories.
fn corpus() -> Corpus {
    let corpus = Corpus {
        root: TempDir::new().unwrap(),
        cache: TempDir::new().unwrap(),
        home: TempDir::new().unwrap(),
    };
    let root = corpus.root.path();
    fs::create_dir_all(root.join("smglom/sets/.git")).unwrap();
    fs::create_dir_all(root.join("courses/ai/.git")).unwrap();

    write(
        root,
        "smglom/sets/source/set.en.tex",
        r"\begin{smodule}{set}
  \symdecl{member}
  An \definiendum{member}{element} of a set.
\end{smodule}
",
    );
    write(
        root,
        "courses/ai/source/intro/ch1.en.tex",
        r"\begin{smodule}{ch1}
  \importmodule[smglom/sets]{set}
  Each \sn{set?member} is one of the \sr{member}{elements}.
\end{smodule}
",
    );
    write(
        root,
        "courses/ai/source/intro/ch2.en.tex",
        r"\begin{smodule}{ch2}
  \importmodule{ch1}
\end{smodule}
",
    );
    write(
        root,
        "courses/ai/source/intro/ch3.en.tex",
        r"\begin{smodule}{ch3}
  \usemodule{defs?d}
\end{smodule}
",
    );
    write(
        root,
        "courses/ai/source/intro/defs/d.en.tex",
        r"\begin{smodule}{d}
\end{smodule}
",
    );
    corpus
}

impl Corpus {
    fn config(&self) -> Config {
        Config {
            corpus_root: Some(self.root.path().to_path_buf()),
            cache_dir: Some(self.cache.path().to_path_buf()),
            ..Config::default()
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_stexdex"))
            .arg("--root")
            .arg(self.root.path())
            .arg("--cache-dir")
            .arg(self.cache.path())
            .args(args)
            .env_remove("MATHHUB")
            .env_remove("STEXDEX_CACHE_DIR")
            .env_remove("STEXDEX_KEEP_CACHE")
            .env("XDG_CONFIG_HOME", self.home.path())
            .output()
            .expect("Failed to execute stexdex")
    }
}

#[test]
fn test_cross_archive_linking() {
    let corpus = corpus();
    let refresh = ensure_up_to_date(&corpus.config(), &StexAnalyzer).unwrap();
    let linker = &refresh.linker;
    assert!(linker.diagnostics().is_empty(), "{:?}", linker.diagnostics());
    assert_eq!(linker.archives().count(), 2);

    let ch2 = linker.file_scope("courses/ai", "source/intro/ch2.en.tex").unwrap();
    let found = linker.candidates_for_word("elements", "en", &ch2).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].symbol.uri(), "smglom/sets?set?member");
    assert_eq!(found[0].import_status, ImportStatus::Transitive);
    assert_eq!(found[0].match_kind, MatchKind::Exact);

    let path: Vec<_> = linker
        .import_path(&ch2, "smglom/sets?set")
        .unwrap()
        .unwrap()
        .iter()
        .map(|m| m.uri())
        .collect();
    assert_eq!(path, ["courses/ai/intro?ch1", "smglom/sets?set"]);

    let member = linker.find_symbol("smglom/sets?set?member").unwrap();
    let mut texts: Vec<_> = member.verbalizations(Some("en")).map(|v| v.text()).collect();
    texts.sort();
    assert_eq!(texts, ["element", "elements", "member"]);
}

#[test]
fn test_relative_fallback_resolution() {
    let corpus = corpus();
    let refresh = ensure_up_to_date(&corpus.config(), &StexAnalyzer).unwrap();
    let linker = &refresh.linker;

    let ch3 = linker.file_scope("courses/ai", "source/intro/ch3.en.tex").unwrap();
    assert!(linker.is_imported("courses/ai/intro/defs?d", &ch3).unwrap());
    assert_eq!(
        linker.import_closure("courses/ai/intro?ch3").unwrap().into_iter().collect::<Vec<_>>(),
        ["courses/ai/intro/defs?d"]
    );
}

#[test]
fn test_second_run_reuses_cache() {
    let corpus = corpus();
    let first = ensure_up_to_date(&corpus.config(), &StexAnalyzer).unwrap();
    assert_eq!(first.update.extracted, 5);

    let second = ensure_up_to_date(&corpus.config(), &StexAnalyzer).unwrap();
    assert_eq!(second.load_status, LoadStatus::Loaded);
    assert_eq!(second.update.extracted, 0);
    assert!(!second.saved);
    assert_eq!(first.linker.corpus(), second.linker.corpus());
}

#[test]
fn test_parallel_queries() {
    let corpus = corpus();
    let refresh = ensure_up_to_date(&corpus.config(), &StexAnalyzer).unwrap();
    let linker = &refresh.linker;

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let ch1 = linker.file_scope("courses/ai", "source/intro/ch1.en.tex").unwrap();
                let found = linker.candidates_for_word("element", "en", &ch1).unwrap();
                assert_eq!(found[0].symbol.uri(), "smglom/sets?set?member");
                assert_eq!(found[0].import_status, ImportStatus::Direct);
            });
        }
    });
}

#[test]
fn test_cli_index_and_queries() {
    let corpus = corpus();

    let output = corpus.run(&["index"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 archives, 5 files, 1 symbols"), "{stdout}");

    let output = corpus.run(&["candidates", "elements", "--file", "courses/ai:source/intro/ch2.en.tex"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("smglom/sets?set?member"), "{stdout}");
    assert!(stdout.contains("[transitive, exact]"), "{stdout}");

    let output = corpus.run(&["closure", "courses/ai/intro?ch2"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), ["courses/ai/intro?ch1", "smglom/sets?set"]);

    let output = corpus.run(&["symbol", "smglom/sets?set?nothing"]);
    assert!(!output.status.success());

    let output = corpus.run(&["clear"]);
    assert!(output.status.success());
}

#[test]
fn test_cli_version() {
    let corpus = corpus();
    let output = corpus.run(&["version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("stexdex v"));
}
