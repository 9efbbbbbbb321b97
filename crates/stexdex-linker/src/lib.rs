//! Cross-reference linking over a corpus snapshot, and the read-only query facade

pub mod api;
pub mod diagnostics;
pub mod graph;
pub mod ids;
pub mod linker;
pub mod stem;


pub use api::{
    ApiError, ArchiveView, Candidate, FileView, ImportScope, ImportStatus, ImporterView, MatchKind, ModuleView,
    SymbolView, VerbalizationView,
};
pub use diagnostics::{Diagnostic, DiagnosticKind, Importer};
pub use linker::Linker;
