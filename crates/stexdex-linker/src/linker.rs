//! Linker: derived indices over one corpus snapshot
//!
//! Construction runs a fixed sequence of passes over an `Arc<Corpus>`:
//!
//! 1. collect every module and symbol declaration, interning URIs
//! 2. resolve dependencies into the import graph and the reverse index
//! 3. compute import closures on strongly connected components
//! 4. derive per-file scopes and the ranges in which each visible module applies
//! 5. resolve file-level verbalizations at their position and build the stem index
//!
//! The result is immutable. There is no way to patch a linker; build a new one from
//! the next snapshot instead.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use stexdex_core::{Corpus, Dependency, DependencyKind, FileKey, Span, Verbalization};

use crate::diagnostics::{Diagnostic, Importer};
use crate::graph::ImportGraph;
use crate::ids::{FileId, Interner, ModuleId, SymbolId, UriId, VerbId};
use crate::stem::{Terms, WordStemmer};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Modules visible from somewhere: declared or depended on directly, and everything
/// reachable from those.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ScopeSets {
    pub direct: BTreeSet<ModuleId>,
    pub transitive: BTreeSet<ModuleId>,
}

impl ScopeSets {
    pub fn contains(&self, module: ModuleId) -> bool {
        self.direct.contains(&module) || self.transitive.contains(&module)
    }
}

/// A module visible inside `span` of a file: one of its own modules over the module's
/// extent, or a dependency target over the extent of the depending module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VisibleRange {
    pub module: ModuleId,
    pub span: Span,
    /// Declared in the file, so everything it sees is visible; otherwise only its exports.
    pub declared: bool,
}

impl VisibleRange {
    fn covers(&self, offset: u32) -> bool {
        self.span.start <= offset && offset < self.span.end
    }
}

/// Extent of dependencies declared outside of any module.
const WHOLE_FILE: Span = Span { start: 0, end: u32::MAX };

#[derive(Debug)]
pub(crate) struct FileEntry {
    pub key: FileKey,
    pub lang: String,
    pub stale: bool,
    pub modules: Vec<ModuleId>,
    /// Verbalizations written in this file that resolved to a symbol.
    pub verbs: Vec<VerbId>,
    /// Resolved targets of all dependencies in the file.
    pub dependencies: Vec<ModuleId>,
    pub ranges: Vec<VisibleRange>,
    /// Everything visible anywhere in the file.
    pub scope: ScopeSets,
}

#[derive(Debug)]
pub(crate) struct ModuleEntry {
    pub uri: UriId,
    pub name: String,
    pub namespace: String,
    pub parent: Option<String>,
    pub file: FileId,
    pub span: Span,
    pub is_structure: bool,
    pub symbols: Vec<SymbolId>,
}

#[derive(Debug)]
pub(crate) struct SymbolEntry {
    pub uri: UriId,
    pub name: String,
    pub module: ModuleId,
    pub file: FileId,
    pub span: Span,
    pub verbs: Vec<VerbId>,
}

#[derive(Debug)]
pub(crate) struct VerbEntry {
    pub symbol: SymbolId,
    pub file: FileId,
    pub text: String,
    pub lang: String,
    pub span: Span,
    pub is_defining: bool,
    pub terms: Terms,
}

enum Resolution {
    Unique(SymbolId),
    Ambiguous(Vec<String>),
    Missing,
}

pub struct Linker {
    pub(crate) instance: u64,
    corpus: Arc<Corpus>,
    pub(crate) files: Vec<FileEntry>,
    pub(crate) file_ids: HashMap<FileKey, FileId>,
    pub(crate) modules: Vec<ModuleEntry>,
    pub(crate) symbols: Vec<SymbolEntry>,
    pub(crate) verbs: Vec<VerbEntry>,
    pub(crate) module_uris: Interner,
    /// Declarations per module URI, indexed by `UriId`.
    pub(crate) modules_by_uri: Vec<Vec<ModuleId>>,
    pub(crate) symbol_uris: Interner,
    pub(crate) symbols_by_uri: Vec<Vec<SymbolId>>,
    pub(crate) symbols_by_name: HashMap<String, Vec<SymbolId>>,
    /// language -> stem -> verbalizations containing that stem
    pub(crate) verb_index: HashMap<String, HashMap<String, Vec<VerbId>>>,
    pub(crate) graph: ImportGraph,
    /// Per module: everything visible through imports and uses.
    pub(crate) closures: Vec<BTreeSet<ModuleId>>,
    /// Per module: what it re-exports to importers.
    pub(crate) exports: Vec<BTreeSet<ModuleId>>,
    /// Module URI -> importing files and modules.
    pub(crate) importers: HashMap<UriId, Vec<Importer>>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) stemmer: WordStemmer,
    pub(crate) query_terms: DashMap<(String, String), Arc<Terms>>,
}

impl fmt::Debug for Linker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Linker")
            .field("instance", &self.instance)
            .field("files", &self.files.len())
            .field("modules", &self.modules.len())
            .field("module_uris", &self.module_uris.len())
            .field("symbols", &self.symbols.len())
            .field("verbalizations", &self.verbs.len())
            .field("diagnostics", &self.diagnostics.len())
            .finish()
    }
}

impl Linker {
    /// Link one corpus snapshot.
    pub fn build(corpus: Arc<Corpus>) -> Linker {
        let started = Instant::now();
        let mut linker = Linker {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            corpus: Arc::clone(&corpus),
            files: Vec::new(),
            file_ids: HashMap::new(),
            modules: Vec::new(),
            symbols: Vec::new(),
            verbs: Vec::new(),
            module_uris: Interner::default(),
            modules_by_uri: Vec::new(),
            symbol_uris: Interner::default(),
            symbols_by_uri: Vec::new(),
            symbols_by_name: HashMap::new(),
            verb_index: HashMap::new(),
            graph: ImportGraph::with_modules(0),
            closures: Vec::new(),
            exports: Vec::new(),
            importers: HashMap::new(),
            diagnostics: Vec::new(),
            stemmer: WordStemmer::default(),
            query_terms: DashMap::new(),
        };

        let pending = linker.collect_declarations(&corpus);
        linker.report_duplicate_symbols();
        linker.resolve_dependencies(&corpus);
        linker.compute_closures();
        linker.compute_file_scopes();
        linker.link_verbalizations(&corpus, pending);

        tracing::info!(
            "Linked {} files: {} modules, {} symbols, {} verbalizations, {} diagnostics in {:?}",
            linker.files.len(),
            linker.modules.len(),
            linker.symbols.len(),
            linker.verbs.len(),
            linker.diagnostics.len(),
            started.elapsed()
        );
        linker
    }

    /// The snapshot this linker was built from.
    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    /// Process-unique id of this linker.
    pub fn instance_id(&self) -> u64 {
        self.instance
    }

    /// Pass 1: files, modules, symbols and declaration-attached verbalizations.
    /// Returns the file-level verbalizations still to be resolved.
    fn collect_declarations(&mut self, corpus: &Corpus) -> Vec<(FileId, usize)> {
        let mut pending = Vec::new();
        for (archive, record) in corpus.files() {
            let file = FileId::new(self.files.len());
            let key = FileKey::new(archive.id.clone(), record.path.clone());
            let mut modules = Vec::with_capacity(record.modules.len());
            let mut verbs = Vec::new();

            for module in &record.modules {
                let module_id = ModuleId::new(self.modules.len());
                let uri = self.module_uris.intern(&module.uri);
                push_at(&mut self.modules_by_uri, uri.index(), module_id);

                let mut symbols = Vec::with_capacity(module.symbols.len());
                for symbol in &module.symbols {
                    let symbol_id = SymbolId::new(self.symbols.len());
                    let symbol_uri = self.symbol_uris.intern(&symbol.uri);
                    push_at(&mut self.symbols_by_uri, symbol_uri.index(), symbol_id);
                    self.symbols_by_name
                        .entry(symbol.name.clone())
                        .or_default()
                        .push(symbol_id);
                    self.symbols.push(SymbolEntry {
                        uri: symbol_uri,
                        name: symbol.name.clone(),
                        module: module_id,
                        file,
                        span: symbol.span,
                        verbs: Vec::new(),
                    });
                    for verb in &symbol.verbalizations {
                        verbs.push(self.add_verbalization(symbol_id, file, verb));
                    }
                    symbols.push(symbol_id);
                }

                self.modules.push(ModuleEntry {
                    uri,
                    name: module.name.clone(),
                    namespace: module.namespace.clone(),
                    parent: module.parent.clone(),
                    file,
                    span: module.span,
                    is_structure: module.is_structure,
                    symbols,
                });
                modules.push(module_id);
            }

            pending.extend((0..record.verbalizations.len()).map(|index| (file, index)));
            self.file_ids.insert(key.clone(), file);
            self.files.push(FileEntry {
                key,
                lang: record.lang.clone(),
                stale: record.stale,
                modules,
                verbs,
                dependencies: Vec::new(),
                ranges: Vec::new(),
                scope: ScopeSets::default(),
            });
        }
        pending
    }

    fn report_duplicate_symbols(&mut self) {
        for (index, declarations) in self.symbols_by_uri.iter().enumerate() {
            if declarations.len() < 2 {
                continue;
            }
            let uri = self.symbol_uris.resolve(UriId::new(index)).to_string();
            let files = declarations
                .iter()
                .map(|id| self.files[self.symbols[id.index()].file.index()].key.clone())
                .collect();
            let diagnostic = Diagnostic::DuplicateSymbol { uri, files };
            tracing::warn!("{}", diagnostic);
            self.diagnostics.push(diagnostic);
        }
    }

    /// Pass 2: dependency edges and the reverse index.
    fn resolve_dependencies(&mut self, corpus: &Corpus) {
        let mut graph = ImportGraph::with_modules(self.modules.len());

        for index in 0..self.files.len() {
            let file = FileId::new(index);
            let Some(record) = corpus.file(&self.files[index].key) else {
                continue;
            };
            let mut targets_in_file = BTreeSet::new();
            let mut ranges: Vec<VisibleRange> = self.files[index]
                .modules
                .iter()
                .map(|module| VisibleRange {
                    module: *module,
                    span: self.modules[module.index()].span,
                    declared: true,
                })
                .collect();

            for dependency in &record.dependencies {
                let Some((uri, targets)) = self.resolve_target(dependency) else {
                    let diagnostic = Diagnostic::UnresolvedDependency {
                        file: self.files[index].key.clone(),
                        target: dependency.target.clone(),
                        span: dependency.span,
                    };
                    tracing::debug!("{}", diagnostic);
                    self.diagnostics.push(diagnostic);
                    continue;
                };

                let source = dependency
                    .source
                    .as_deref()
                    .and_then(|source| self.module_in_file(file, source));
                let importer = source.map_or(Importer::File(file), Importer::Module);
                let importers = self.importers.entry(uri).or_default();
                if !importers.contains(&importer) {
                    importers.push(importer);
                }

                let extent = source.map_or(WHOLE_FILE, |module| self.modules[module.index()].span);
                for target in targets {
                    targets_in_file.insert(target);
                    let range = VisibleRange {
                        module: target,
                        span: extent,
                        declared: false,
                    };
                    if !ranges.contains(&range) {
                        ranges.push(range);
                    }
                    match (source, dependency.kind) {
                        (Some(module), DependencyKind::Import) => graph.add_import(module, target),
                        (Some(module), DependencyKind::Use) => graph.add_use(module, target),
                        (None, _) => {}
                    }
                }
            }
            self.files[index].dependencies = targets_in_file.into_iter().collect();
            self.files[index].ranges = ranges;
        }

        tracing::debug!("Import graph: {:?}", graph);
        self.graph = graph;
    }

    /// Declarations of the dependency target, trying the relative fallback second.
    fn resolve_target(&self, dependency: &Dependency) -> Option<(UriId, Vec<ModuleId>)> {
        std::iter::once(dependency.target.as_str())
            .chain(dependency.fallback.as_deref())
            .find_map(|uri| {
                let id = self.module_uris.get(uri)?;
                let declarations = self.modules_by_uri.get(id.index())?;
                (!declarations.is_empty()).then(|| (id, declarations.clone()))
            })
    }

    fn module_in_file(&self, file: FileId, uri: &str) -> Option<ModuleId> {
        self.files[file.index()]
            .modules
            .iter()
            .copied()
            .find(|module| self.module_uris.resolve(self.modules[module.index()].uri) == uri)
    }

    /// Pass 3: closures and cycle diagnostics.
    fn compute_closures(&mut self) {
        let closures = self.graph.closures();
        for cycle in &closures.cycles {
            let mut modules: Vec<String> = cycle.iter().map(|id| self.module_uri(*id).to_string()).collect();
            modules.sort();
            modules.dedup();
            let diagnostic = Diagnostic::ImportCycle { modules };
            tracing::warn!("{}", diagnostic);
            self.diagnostics.push(diagnostic);
        }
        self.closures = closures.visible;
        self.exports = closures.exports;
    }

    /// Pass 4: what each file sees anywhere in it.
    fn compute_file_scopes(&mut self) {
        let scopes: Vec<ScopeSets> = (0..self.files.len())
            .map(|index| self.scope_sets(FileId::new(index), None))
            .collect();
        for (entry, scope) in self.files.iter_mut().zip(scopes) {
            entry.scope = scope;
        }
    }

    /// Modules visible in `file`, at `offset` or anywhere. Own modules contribute
    /// everything they see, dependency targets only what they re-export.
    pub(crate) fn scope_sets(&self, file: FileId, offset: Option<u32>) -> ScopeSets {
        let ranges: Vec<&VisibleRange> = self.files[file.index()]
            .ranges
            .iter()
            .filter(|range| offset.is_none_or(|offset| range.covers(offset)))
            .collect();
        let direct: BTreeSet<ModuleId> = ranges.iter().map(|range| range.module).collect();
        let transitive = ranges
            .iter()
            .flat_map(|range| {
                let reachable = if range.declared {
                    &self.closures[range.module.index()]
                } else {
                    &self.exports[range.module.index()]
                };
                reachable.iter().copied()
            })
            .filter(|module| !direct.contains(module))
            .collect();
        ScopeSets { direct, transitive }
    }

    /// Pass 5: resolve file-level verbalizations by symbol name within the scope at
    /// their position.
    fn link_verbalizations(&mut self, corpus: &Corpus, pending: Vec<(FileId, usize)>) {
        for (file, index) in pending {
            let Some(verb) = corpus
                .file(&self.files[file.index()].key)
                .and_then(|record| record.verbalizations.get(index))
            else {
                continue;
            };
            match self.resolve_reference(file, verb) {
                Resolution::Unique(symbol) => {
                    let id = self.add_verbalization(symbol, file, verb);
                    self.files[file.index()].verbs.push(id);
                }
                Resolution::Missing => {
                    let diagnostic = Diagnostic::UnresolvedReference {
                        file: self.files[file.index()].key.clone(),
                        reference: verb.symbol_ref.clone(),
                        span: verb.span,
                    };
                    tracing::debug!("{}", diagnostic);
                    self.diagnostics.push(diagnostic);
                }
                Resolution::Ambiguous(candidates) => {
                    let diagnostic = Diagnostic::AmbiguousReference {
                        file: self.files[file.index()].key.clone(),
                        reference: verb.symbol_ref.clone(),
                        span: verb.span,
                        candidates,
                    };
                    tracing::debug!("{}", diagnostic);
                    self.diagnostics.push(diagnostic);
                }
            }
        }
    }

    fn resolve_reference(&self, file: FileId, verb: &Verbalization) -> Resolution {
        let Some(named) = self.symbols_by_name.get(&verb.symbol_name) else {
            return Resolution::Missing;
        };
        let scope = self.scope_sets(file, Some(verb.span.start));

        let mut found: Vec<SymbolId> = named
            .iter()
            .copied()
            .filter(|id| {
                let module = self.symbols[id.index()].module;
                scope.contains(module)
                    && verb
                        .path_hint
                        .as_deref()
                        .is_none_or(|hint| hint_matches(self.module_uri(module), hint))
            })
            .collect();
        // Prefer declarations seen directly at this position.
        found.sort_by_key(|id| !scope.direct.contains(&self.symbols[id.index()].module));

        let mut uris: Vec<&str> = found.iter().map(|id| self.symbol_uri(*id)).collect();
        uris.sort_unstable();
        uris.dedup();
        match (found.first(), uris.len()) {
            (Some(first), 1) => Resolution::Unique(*first),
            (None, _) => Resolution::Missing,
            _ => Resolution::Ambiguous(uris.into_iter().map(str::to_string).collect()),
        }
    }

    fn add_verbalization(&mut self, symbol: SymbolId, file: FileId, verb: &Verbalization) -> VerbId {
        let id = VerbId::new(self.verbs.len());
        let terms = self.stemmer.terms(&verb.text, &verb.lang);

        let by_stem = self.verb_index.entry(verb.lang.clone()).or_default();
        let distinct: BTreeSet<&String> = terms.stems.iter().collect();
        for stem in distinct {
            by_stem.entry(stem.clone()).or_default().push(id);
        }

        self.symbols[symbol.index()].verbs.push(id);
        self.verbs.push(VerbEntry {
            symbol,
            file,
            text: verb.text.clone(),
            lang: verb.lang.clone(),
            span: verb.span,
            is_defining: verb.is_defining,
            terms,
        });
        id
    }

    pub(crate) fn module_uri(&self, module: ModuleId) -> &str {
        self.module_uris.resolve(self.modules[module.index()].uri)
    }

    pub(crate) fn symbol_uri(&self, symbol: SymbolId) -> &str {
        self.symbol_uris.resolve(self.symbols[symbol.index()].uri)
    }

    pub(crate) fn module_declarations(&self, uri: &str) -> &[ModuleId] {
        self.module_uris
            .get(uri)
            .and_then(|id| self.modules_by_uri.get(id.index()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn symbol_declarations(&self, uri: &str) -> &[SymbolId] {
        self.symbol_uris
            .get(uri)
            .and_then(|id| self.symbols_by_uri.get(id.index()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Stemmed query, memoized across calls.
    pub(crate) fn query_terms(&self, word: &str, lang: &str) -> Arc<Terms> {
        let key = (lang.to_string(), word.to_string());
        if let Some(terms) = self.query_terms.get(&key) {
            return Arc::clone(terms.value());
        }
        let terms = Arc::new(self.stemmer.terms(word, lang));
        self.query_terms.insert(key, Arc::clone(&terms));
        terms
    }
}

fn push_at<T>(lists: &mut Vec<Vec<T>>, index: usize, value: T) {
    if lists.len() <= index {
        lists.resize_with(index + 1, Vec::new);
    }
    lists[index].push(value);
}

/// `set`, `mod?set` and full URIs all select module `A/mod?set`.
fn hint_matches(module_uri: &str, hint: &str) -> bool {
    module_uri == hint
        || module_uri
            .strip_suffix(hint)
            .is_some_and(|prefix| prefix.ends_with('?') || prefix.ends_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_hints() {
        assert!(hint_matches("A/mod?set", "set"));
        assert!(hint_matches("A/mod?set", "mod?set"));
        assert!(hint_matches("A/mod?set", "A/mod?set"));
        assert!(!hint_matches("A/mod?subset", "set"));
        assert!(!hint_matches("A/mod?set", "other"));
    }
}
