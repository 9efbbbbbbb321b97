//! Read-only query facade over a [`Linker`]
//!
//! Views are small `Copy` handles borrowing the linker that produced them, so they
//! cannot outlive it. Scopes carry the linker's instance id and are rejected by any
//! other linker.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use stexdex_core::{Archive, FileKey, FileRecord, Span};

use crate::diagnostics::{Diagnostic, DiagnosticKind, Importer};
use crate::ids::{FileId, ModuleId, SymbolId, VerbId};
use crate::linker::{Linker, ScopeSets};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("import scope of linker #{found} used with linker #{expected}")]
    ForeignScope { expected: u64, found: u64 },
}

/// How a candidate symbol's module is visible in the query scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImportStatus {
    Direct,
    Transitive,
    NotImported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchKind {
    /// The verbalization is the query word for word (ignoring case).
    Exact,
    /// Every stem of the query occurs in the verbalization.
    Stemmed,
}

/// A symbol suggested for a word.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'l> {
    pub symbol: SymbolView<'l>,
    /// Best matching verbalization of the symbol.
    pub verbalization: VerbalizationView<'l>,
    pub import_status: ImportStatus,
    pub match_kind: MatchKind,
}

/// The set of modules visible at some place, e.g. in a file.
#[derive(Clone)]
pub struct ImportScope<'l> {
    linker: &'l Linker,
    instance: u64,
    sets: Cow<'l, ScopeSets>,
}

impl fmt::Debug for ImportScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportScope")
            .field("instance", &self.instance)
            .field("direct", &self.sets.direct.len())
            .field("transitive", &self.sets.transitive.len())
            .finish()
    }
}

impl<'l> ImportScope<'l> {
    pub fn direct(&self) -> impl Iterator<Item = ModuleView<'l>> + '_ {
        let linker = self.linker;
        self.sets.direct.iter().map(move |id| ModuleView { linker, id: *id })
    }

    pub fn transitive(&self) -> impl Iterator<Item = ModuleView<'l>> + '_ {
        let linker = self.linker;
        self.sets.transitive.iter().map(move |id| ModuleView { linker, id: *id })
    }

    fn status(&self, module: ModuleId) -> ImportStatus {
        if self.sets.direct.contains(&module) {
            ImportStatus::Direct
        } else if self.sets.transitive.contains(&module) {
            ImportStatus::Transitive
        } else {
            ImportStatus::NotImported
        }
    }
}

/// Where a module is depended on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImporterView<'l> {
    File(FileView<'l>),
    Module(ModuleView<'l>),
}

macro_rules! view_identity {
    ($view:ident) => {
        impl PartialEq for $view<'_> {
            fn eq(&self, other: &Self) -> bool {
                std::ptr::eq(self.linker, other.linker) && self.id == other.id
            }
        }

        impl Eq for $view<'_> {}
    };
}

#[derive(Clone, Copy)]
pub struct SymbolView<'l> {
    linker: &'l Linker,
    id: SymbolId,
}

#[derive(Clone, Copy)]
pub struct ModuleView<'l> {
    linker: &'l Linker,
    id: ModuleId,
}

#[derive(Clone, Copy)]
pub struct FileView<'l> {
    linker: &'l Linker,
    id: FileId,
}

#[derive(Clone, Copy)]
pub struct VerbalizationView<'l> {
    linker: &'l Linker,
    id: VerbId,
}

#[derive(Clone, Copy)]
pub struct ArchiveView<'l> {
    linker: &'l Linker,
    archive: &'l Archive,
}

view_identity!(SymbolView);
view_identity!(ModuleView);
view_identity!(FileView);
view_identity!(VerbalizationView);

impl PartialEq for ArchiveView<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.linker, other.linker) && self.archive.id == other.archive.id
    }
}

impl Eq for ArchiveView<'_> {}

impl fmt::Debug for SymbolView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolView({})", self.uri())
    }
}

impl fmt::Debug for ModuleView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleView({})", self.uri())
    }
}

impl fmt::Debug for FileView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileView({})", self.key())
    }
}

impl fmt::Debug for VerbalizationView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerbalizationView({:?} -> {})", self.text(), self.symbol().uri())
    }
}

impl fmt::Debug for ArchiveView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveView({})", self.id())
    }
}

impl<'l> SymbolView<'l> {
    pub fn uri(&self) -> &'l str {
        self.linker.symbol_uri(self.id)
    }

    pub fn name(&self) -> &'l str {
        &self.linker.symbols[self.id.index()].name
    }

    pub fn span(&self) -> Span {
        self.linker.symbols[self.id.index()].span
    }

    pub fn module(&self) -> ModuleView<'l> {
        ModuleView {
            linker: self.linker,
            id: self.linker.symbols[self.id.index()].module,
        }
    }

    pub fn file(&self) -> FileView<'l> {
        FileView {
            linker: self.linker,
            id: self.linker.symbols[self.id.index()].file,
        }
    }

    /// All verbalizations linked to this declaration, optionally of one language.
    pub fn verbalizations(self, lang: Option<&'l str>) -> impl Iterator<Item = VerbalizationView<'l>> {
        let linker = self.linker;
        linker.symbols[self.id.index()]
            .verbs
            .iter()
            .map(move |id| VerbalizationView { linker, id: *id })
            .filter(move |verb| lang.is_none_or(|lang| verb.lang() == lang))
    }
}

impl<'l> ModuleView<'l> {
    pub fn uri(&self) -> &'l str {
        self.linker.module_uri(self.id)
    }

    /// Name inside its file; nested modules read `parent/child`.
    pub fn name(&self) -> &'l str {
        &self.linker.modules[self.id.index()].name
    }

    pub fn namespace(&self) -> &'l str {
        &self.linker.modules[self.id.index()].namespace
    }

    pub fn parent_uri(&self) -> Option<&'l str> {
        self.linker.modules[self.id.index()].parent.as_deref()
    }

    pub fn span(&self) -> Span {
        self.linker.modules[self.id.index()].span
    }

    /// Module generated for a `mathstructure`.
    pub fn is_structure(&self) -> bool {
        self.linker.modules[self.id.index()].is_structure
    }

    pub fn file(&self) -> FileView<'l> {
        FileView {
            linker: self.linker,
            id: self.linker.modules[self.id.index()].file,
        }
    }

    pub fn symbols(self) -> impl Iterator<Item = SymbolView<'l>> {
        let linker = self.linker;
        linker.modules[self.id.index()]
            .symbols
            .iter()
            .map(move |id| SymbolView { linker, id: *id })
    }

    /// Modules this one imports (re-exported) directly.
    pub fn imports(self) -> impl Iterator<Item = ModuleView<'l>> {
        let linker = self.linker;
        linker.graph.imports(self.id).map(move |id| ModuleView { linker, id })
    }

    /// Modules this one uses without re-exporting.
    pub fn uses(self) -> impl Iterator<Item = ModuleView<'l>> {
        let linker = self.linker;
        linker.graph.uses(self.id).iter().map(move |id| ModuleView { linker, id: *id })
    }

    /// Everything visible from this module through imports and uses.
    pub fn closure(self) -> impl Iterator<Item = ModuleView<'l>> {
        let linker = self.linker;
        linker.closures[self.id.index()]
            .iter()
            .map(move |id| ModuleView { linker, id: *id })
    }

    pub fn imports_module(&self, other: ModuleView<'_>, reflexive: bool) -> bool {
        if !std::ptr::eq(self.linker, other.linker) {
            return false;
        }
        (reflexive && self.id == other.id) || self.linker.closures[self.id.index()].contains(&other.id)
    }

    pub fn scope(&self) -> ImportScope<'l> {
        self.linker.scope_of_modules(std::slice::from_ref(&self.id))
    }
}

impl<'l> FileView<'l> {
    pub fn key(&self) -> &'l FileKey {
        &self.linker.files[self.id.index()].key
    }

    pub fn archive(&self) -> &'l str {
        &self.key().archive
    }

    /// Path relative to the archive directory.
    pub fn path(&self) -> &'l str {
        &self.key().path
    }

    pub fn lang(&self) -> &'l str {
        &self.linker.files[self.id.index()].lang
    }

    /// The record reflects older content because re-extraction failed.
    pub fn is_stale(&self) -> bool {
        self.linker.files[self.id.index()].stale
    }

    /// The raw record in the linked snapshot.
    pub fn record(&self) -> Option<&'l FileRecord> {
        self.linker.corpus().file(self.key())
    }

    pub fn modules(self) -> impl Iterator<Item = ModuleView<'l>> {
        let linker = self.linker;
        linker.files[self.id.index()]
            .modules
            .iter()
            .map(move |id| ModuleView { linker, id: *id })
    }

    pub fn declared_symbols(self) -> impl Iterator<Item = SymbolView<'l>> {
        self.modules().flat_map(|module| module.symbols())
    }

    /// Resolved verbalizations written in this file.
    pub fn verbalizations(self) -> impl Iterator<Item = VerbalizationView<'l>> {
        let linker = self.linker;
        linker.files[self.id.index()]
            .verbs
            .iter()
            .map(move |id| VerbalizationView { linker, id: *id })
    }

    /// Files declaring the modules this file depends on.
    pub fn dependencies(&self) -> Vec<FileView<'l>> {
        let linker = self.linker;
        let files: BTreeSet<FileId> = linker.files[self.id.index()]
            .dependencies
            .iter()
            .map(|module| linker.modules[module.index()].file)
            .filter(|file| *file != self.id)
            .collect();
        files.into_iter().map(|id| FileView { linker, id }).collect()
    }

    /// Modules visible anywhere in the file.
    pub fn scope(&self) -> ImportScope<'l> {
        ImportScope {
            linker: self.linker,
            instance: self.linker.instance,
            sets: Cow::Borrowed(&self.linker.files[self.id.index()].scope),
        }
    }

    /// Modules visible at byte `offset`: the modules enclosing it and whatever the
    /// dependencies declared in those modules (or at top level) bring in.
    pub fn scope_at(&self, offset: u32) -> ImportScope<'l> {
        ImportScope {
            linker: self.linker,
            instance: self.linker.instance,
            sets: Cow::Owned(self.linker.scope_sets(self.id, Some(offset))),
        }
    }

    pub fn symbol_is_in_scope_at(&self, symbol: SymbolView<'_>, offset: u32) -> bool {
        std::ptr::eq(self.linker, symbol.linker)
            && self
                .linker
                .scope_sets(self.id, Some(offset))
                .contains(self.linker.symbols[symbol.id.index()].module)
    }

    /// Shortest chain of modules that makes `symbol` visible at `offset`, starting at a
    /// module visible there directly and ending at the declaring module.
    pub fn explain_symbol_in_scope_at(&self, symbol: SymbolView<'_>, offset: u32) -> Option<Vec<ModuleView<'l>>> {
        if !std::ptr::eq(self.linker, symbol.linker) {
            return None;
        }
        let linker = self.linker;
        let target = linker.symbols[symbol.id.index()].module;
        let sets = linker.scope_sets(self.id, Some(offset));
        if !sets.contains(target) {
            return None;
        }
        let starts: Vec<ModuleId> = sets.direct.into_iter().collect();
        linker
            .graph
            .shortest_path(&starts, |id| id == target)
            .map(|path| path.into_iter().map(|id| ModuleView { linker, id }).collect())
    }
}

impl<'l> VerbalizationView<'l> {
    pub fn text(&self) -> &'l str {
        &self.linker.verbs[self.id.index()].text
    }

    pub fn lang(&self) -> &'l str {
        &self.linker.verbs[self.id.index()].lang
    }

    pub fn span(&self) -> Span {
        self.linker.verbs[self.id.index()].span
    }

    pub fn is_defining(&self) -> bool {
        self.linker.verbs[self.id.index()].is_defining
    }

    pub fn symbol(&self) -> SymbolView<'l> {
        SymbolView {
            linker: self.linker,
            id: self.linker.verbs[self.id.index()].symbol,
        }
    }

    /// File the verbalization is written in.
    pub fn file(&self) -> FileView<'l> {
        FileView {
            linker: self.linker,
            id: self.linker.verbs[self.id.index()].file,
        }
    }
}

impl<'l> ArchiveView<'l> {
    pub fn id(&self) -> &'l str {
        &self.archive.id
    }

    /// Directory relative to the corpus root.
    pub fn path(&self) -> &'l Path {
        &self.archive.path
    }

    pub fn files(self) -> impl Iterator<Item = FileView<'l>> {
        let (linker, archive) = (self.linker, self.archive);
        archive.files.keys().filter_map(move |path| {
            let key = FileKey::new(archive.id.clone(), path.clone());
            linker.file_ids.get(&key).map(|id| FileView { linker, id: *id })
        })
    }
}

impl Linker {
    fn check_scope(&self, scope: &ImportScope<'_>) -> Result<(), ApiError> {
        if scope.instance == self.instance && std::ptr::eq(scope.linker, self) {
            Ok(())
        } else {
            Err(ApiError::ForeignScope {
                expected: self.instance,
                found: scope.instance,
            })
        }
    }

    fn scope_of_modules(&self, modules: &[ModuleId]) -> ImportScope<'_> {
        let mut direct: BTreeSet<ModuleId> = modules.iter().copied().collect();
        for module in modules {
            direct.extend(self.graph.imports(*module));
            direct.extend(self.graph.uses(*module).iter().copied());
        }
        let transitive = modules
            .iter()
            .flat_map(|module| self.closures[module.index()].iter().copied())
            .filter(|module| !direct.contains(module))
            .collect();
        ImportScope {
            linker: self,
            instance: self.instance,
            sets: Cow::Owned(ScopeSets { direct, transitive }),
        }
    }

    /// First declaration of a symbol URI in corpus order.
    pub fn find_symbol(&self, uri: &str) -> Option<SymbolView<'_>> {
        self.symbol_declarations(uri)
            .first()
            .map(|id| SymbolView { linker: self, id: *id })
    }

    /// The declaration of `uri` visible in `scope`, preferring direct imports.
    pub fn find_symbol_in_scope(&self, uri: &str, scope: &ImportScope<'_>) -> Result<Option<SymbolView<'_>>, ApiError> {
        self.check_scope(scope)?;
        Ok(self
            .symbol_declarations(uri)
            .iter()
            .map(|id| (scope.status(self.symbols[id.index()].module), *id))
            .filter(|(status, _)| *status != ImportStatus::NotImported)
            .min()
            .map(|(_, id)| SymbolView { linker: self, id }))
    }

    /// Every declaration of a symbol URI.
    pub fn symbol_declarations_of(&self, uri: &str) -> Vec<SymbolView<'_>> {
        self.symbol_declarations(uri)
            .iter()
            .map(|id| SymbolView { linker: self, id: *id })
            .collect()
    }

    pub fn symbols(&self) -> impl Iterator<Item = SymbolView<'_>> {
        (0..self.symbols.len()).map(|index| SymbolView {
            linker: self,
            id: SymbolId::new(index),
        })
    }

    pub fn symbols_named(&self, name: &str) -> Vec<SymbolView<'_>> {
        self.symbols_by_name
            .get(name)
            .map(|ids| ids.iter().map(|id| SymbolView { linker: self, id: *id }).collect())
            .unwrap_or_default()
    }

    /// Symbols whose names fuzzy-match `query`, best first.
    pub fn fuzzy_symbols(&self, query: &str, limit: usize) -> Vec<(SymbolView<'_>, i64)> {
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, &str, SymbolId)> = self
            .symbols
            .iter()
            .enumerate()
            .filter_map(|(index, symbol)| {
                let id = SymbolId::new(index);
                matcher
                    .fuzzy_match(&symbol.name, query)
                    .map(|score| (score, self.symbol_uri(id), id))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)).then_with(|| a.2.cmp(&b.2)));
        scored
            .into_iter()
            .take(limit)
            .map(|(score, _, id)| (SymbolView { linker: self, id }, score))
            .collect()
    }

    /// Symbols with a verbalization matching `word`, ranked by visibility in `scope`,
    /// then exact before stemmed match, then URI.
    pub fn candidates_for_word(
        &self,
        word: &str,
        lang: &str,
        scope: &ImportScope<'_>,
    ) -> Result<Vec<Candidate<'_>>, ApiError> {
        self.check_scope(scope)?;
        let query = self.query_terms(word, lang);
        let Some(postings) = query
            .stems
            .first()
            .and_then(|stem| self.verb_index.get(lang)?.get(stem))
        else {
            return Ok(Vec::new());
        };

        let mut best: HashMap<SymbolId, (MatchKind, VerbId)> = HashMap::new();
        for id in postings {
            let verb = &self.verbs[id.index()];
            if !verb.terms.contains_all(&query) {
                continue;
            }
            let kind = if verb.terms.normalized == query.normalized {
                MatchKind::Exact
            } else {
                MatchKind::Stemmed
            };
            best.entry(verb.symbol)
                .and_modify(|current| *current = (*current).min((kind, *id)))
                .or_insert((kind, *id));
        }

        let mut candidates: Vec<Candidate<'_>> = best
            .into_iter()
            .map(|(symbol, (match_kind, verb))| Candidate {
                symbol: SymbolView { linker: self, id: symbol },
                verbalization: VerbalizationView { linker: self, id: verb },
                import_status: scope.status(self.symbols[symbol.index()].module),
                match_kind,
            })
            .collect();
        candidates.sort_by(|a, b| {
            (a.import_status, a.match_kind, a.symbol.uri(), a.symbol.id).cmp(&(
                b.import_status,
                b.match_kind,
                b.symbol.uri(),
                b.symbol.id,
            ))
        });
        Ok(candidates)
    }

    /// Some declaration of `module_uri` is visible in `scope`.
    pub fn is_imported(&self, module_uri: &str, scope: &ImportScope<'_>) -> Result<bool, ApiError> {
        self.check_scope(scope)?;
        Ok(self
            .module_declarations(module_uri)
            .iter()
            .any(|id| scope.sets.contains(*id)))
    }

    /// URIs visible from `module_uri` through imports and uses; `None` for unknown
    /// modules.
    pub fn import_closure(&self, module_uri: &str) -> Option<BTreeSet<&str>> {
        let declarations = self.module_declarations(module_uri);
        if declarations.is_empty() {
            return None;
        }
        Some(
            declarations
                .iter()
                .flat_map(|id| self.closures[id.index()].iter())
                .map(|id| self.module_uri(*id))
                .collect(),
        )
    }

    /// Shortest chain of modules from `scope` to `module_uri`.
    pub fn import_path(&self, scope: &ImportScope<'_>, module_uri: &str) -> Result<Option<Vec<ModuleView<'_>>>, ApiError> {
        self.check_scope(scope)?;
        let targets = self.module_declarations(module_uri);
        let starts: Vec<ModuleId> = scope.sets.direct.iter().copied().collect();
        Ok(self
            .graph
            .shortest_path(&starts, |id| targets.contains(&id))
            .map(|path| path.into_iter().map(|id| ModuleView { linker: self, id }).collect()))
    }

    /// Files and modules depending on `module_uri`.
    pub fn imported_by(&self, module_uri: &str) -> Vec<ImporterView<'_>> {
        self.module_uris
            .get(module_uri)
            .and_then(|uri| self.importers.get(&uri))
            .map(|importers| {
                importers
                    .iter()
                    .map(|importer| match importer {
                        Importer::File(id) => ImporterView::File(FileView { linker: self, id: *id }),
                        Importer::Module(id) => ImporterView::Module(ModuleView { linker: self, id: *id }),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First declaration of a module URI in corpus order.
    pub fn module(&self, uri: &str) -> Option<ModuleView<'_>> {
        self.module_declarations(uri)
            .first()
            .map(|id| ModuleView { linker: self, id: *id })
    }

    pub fn file(&self, archive: &str, path: &str) -> Option<FileView<'_>> {
        self.file_ids
            .get(&FileKey::new(archive, path))
            .map(|id| FileView { linker: self, id: *id })
    }

    pub fn files(&self) -> impl Iterator<Item = FileView<'_>> {
        (0..self.files.len()).map(|index| FileView {
            linker: self,
            id: FileId::new(index),
        })
    }

    pub fn archives(&self) -> impl Iterator<Item = ArchiveView<'_>> {
        self.corpus()
            .archives
            .values()
            .map(|archive| ArchiveView { linker: self, archive })
    }

    pub fn file_scope(&self, archive: &str, path: &str) -> Option<ImportScope<'_>> {
        self.file(archive, path).map(|file| file.scope())
    }

    pub fn file_scope_at(&self, archive: &str, path: &str, offset: u32) -> Option<ImportScope<'_>> {
        self.file(archive, path).map(|file| file.scope_at(offset))
    }

    /// Scope inside a module: all its declarations, what they depend on, and beyond.
    pub fn module_scope(&self, uri: &str) -> Option<ImportScope<'_>> {
        let declarations = self.module_declarations(uri);
        (!declarations.is_empty()).then(|| self.scope_of_modules(declarations))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind() == kind)
    }
}
