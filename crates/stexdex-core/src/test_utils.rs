//! Test fixtures for the core crate

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::analyzer::{AnalysisInput, Analyzer};
use crate::diff::{ArchiveScan, CorpusDiff};
use crate::error::ExtractionError;
use crate::model::*;
use crate::uri;

/// Line-oriented stand-in for the sTeX analyzer.
///
/// `module <name>`, `symbol <name>`, `import <uri>` and `fail` are understood; symbols
/// and imports attach to the last module.
#[derive(Default)]
pub struct LineAnalyzer {
    pub calls: AtomicUsize,
}

impl LineAnalyzer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Analyzer for LineAnalyzer {
    fn analyze(&self, input: &AnalysisInput<'_>) -> Result<Extraction, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = std::str::from_utf8(input.content).map_err(|_| ExtractionError::InvalidUtf8 {
            path: input.path.to_string(),
        })?;
        let ns = uri::namespace(input.archive, "");
        let mut extraction = Extraction {
            lang: lang_from_file_name(input.path),
            ..Extraction::default()
        };
        for line in text.lines() {
            let mut words = line.split_whitespace();
            match (words.next(), words.next()) {
                (Some("module"), Some(name)) => {
                    let module_uri = uri::module_uri(&ns, name);
                    extraction.modules.push(Module {
                        name: name.to_string(),
                        namespace: ns.clone(),
                        uri: module_uri,
                        parent: None,
                        children: Vec::new(),
                        symbols: Vec::new(),
                        imports: Vec::new(),
                        span: Span::default(),
                        is_structure: false,
                    });
                }
                (Some("symbol"), Some(name)) => {
                    if let Some(module) = extraction.modules.last_mut() {
                        module.symbols.push(Symbol {
                            name: name.to_string(),
                            uri: uri::symbol_uri(&module.uri, name),
                            module: module.uri.clone(),
                            span: Span::default(),
                            verbalizations: Vec::new(),
                        });
                    }
                }
                (Some("import"), Some(target)) => {
                    let source = extraction.modules.last().map(|m| m.uri.clone());
                    if let Some(module) = extraction.modules.last_mut() {
                        module.imports.push(target.to_string());
                    }
                    extraction.dependencies.push(Dependency {
                        source,
                        target: target.to_string(),
                        fallback: None,
                        kind: DependencyKind::Import,
                        span: Span::default(),
                    });
                }
                (Some("fail"), _) => {
                    return Err(ExtractionError::Malformed {
                        path: input.path.to_string(),
                        offset: 0,
                        message: "requested failure".to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(extraction)
    }
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Diff of `corpus` against the files currently in `<root>/<archive>/source`,
/// computed naively so store tests don't need the scanner.
pub fn naive_diff(root: &Path, archive: &str, corpus: &Corpus) -> CorpusDiff {
    let mut diff = CorpusDiff::default();
    let source = root.join(archive).join("source");
    let mut present = BTreeMap::new();
    if let Ok(entries) = fs::read_dir(&source) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata().unwrap();
            present.insert(format!("source/{name}"), FileStamp::from_metadata(&meta));
        }
    }
    let cached = corpus.archive(archive).map(|a| &a.files);
    for (path, stamp) in &present {
        let key = FileKey::new(archive, path.clone());
        match cached.and_then(|files| files.get(path)) {
            None => {
                diff.added.insert(key, *stamp);
            }
            Some(record) if record.stamp != *stamp || record.stale => {
                diff.modified.insert(key, *stamp);
            }
            Some(_) => diff.unchanged += 1,
        }
    }
    if let Some(files) = cached {
        for path in files.keys().filter(|p| !present.contains_key(*p)) {
            diff.removed.insert(FileKey::new(archive, path.clone()));
        }
    }
    diff.archives.insert(
        archive.to_string(),
        ArchiveScan {
            id: archive.to_string(),
            path: archive.into(),
            dirs: BTreeMap::new(),
        },
    );
    diff
}

/// Small in-memory corpus: archive `A` with a module `m` declaring `foo` and a file
/// importing it.
pub fn sample_corpus() -> Corpus {
    let analyzer = LineAnalyzer::default();
    let mut corpus = Corpus::new("/mathhub");
    let mut archive = Archive::new("A", "A");
    for (path, text) in [
        ("source/m.en.tex", "module m\nsymbol foo\n"),
        ("source/use.en.tex", "module use\nimport A?m\n"),
    ] {
        let input = AnalysisInput {
            archive: "A",
            path,
            content: text.as_bytes(),
        };
        let extraction = analyzer.analyze(&input).unwrap();
        archive.files.insert(
            path.to_string(),
            FileRecord::new(path, FileStamp::default(), ContentHash::of(text.as_bytes()), extraction),
        );
    }
    corpus.archives.insert("A".to_string(), archive);
    corpus
}
