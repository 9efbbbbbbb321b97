//! Non-fatal findings recorded while linking

use stexdex_core::{FileKey, Span};

use crate::ids::{FileId, ModuleId};

/// Coarse classification of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticKind {
    LinkAmbiguity,
    DanglingReference,
    ImportCycle,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Diagnostic {
    /// Several declarations share one symbol URI.
    #[error("symbol {uri} is declared {} times ({})", .files.len(), join(.files, ", "))]
    DuplicateSymbol { uri: String, files: Vec<FileKey> },
    /// A verbalization names several distinct symbols visible in its file.
    #[error("{file}@{}: '{reference}' is ambiguous: {}", .span.start, join(.candidates, ", "))]
    AmbiguousReference {
        file: FileKey,
        reference: String,
        span: Span,
        candidates: Vec<String>,
    },
    /// A dependency targets a module nobody declares.
    #[error("{file}@{}: module {target} not found", .span.start)]
    UnresolvedDependency { file: FileKey, target: String, span: Span },
    /// A verbalization names no symbol visible in its file.
    #[error("{file}@{}: symbol '{reference}' not found in scope", .span.start)]
    UnresolvedReference { file: FileKey, reference: String, span: Span },
    /// Modules that import each other, sorted by URI.
    #[error("import cycle: {}", join(.modules, " -> "))]
    ImportCycle { modules: Vec<String> },
}

impl Diagnostic {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Diagnostic::DuplicateSymbol { .. } | Diagnostic::AmbiguousReference { .. } => DiagnosticKind::LinkAmbiguity,
            Diagnostic::UnresolvedDependency { .. } | Diagnostic::UnresolvedReference { .. } => {
                DiagnosticKind::DanglingReference
            }
            Diagnostic::ImportCycle { .. } => DiagnosticKind::ImportCycle,
        }
    }

    /// File the finding is located in, if it has a single location.
    pub fn file(&self) -> Option<&FileKey> {
        match self {
            Diagnostic::AmbiguousReference { file, .. }
            | Diagnostic::UnresolvedDependency { file, .. }
            | Diagnostic::UnresolvedReference { file, .. } => Some(file),
            Diagnostic::DuplicateSymbol { .. } | Diagnostic::ImportCycle { .. } => None,
        }
    }
}

fn join<T: ToString>(items: &[T], separator: &str) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(separator)
}

/// Something that declares a dependency on a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Importer {
    /// Declared outside of any module.
    File(FileId),
    Module(ModuleId),
}
