//! Document analyzer trait definition

use crate::error::ExtractionError;
use crate::model::Extraction;

/// One file handed to an analyzer.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    /// Archive id the file belongs to.
    pub archive: &'a str,
    /// Path relative to the archive directory (`source/...` or `lib/...`).
    pub path: &'a str,
    pub content: &'a [u8],
}

/// Turns one file's content into structured records.
///
/// Must be a pure function of its input: the store may run it on several threads and
/// relies on identical content producing identical records.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, input: &AnalysisInput<'_>) -> Result<Extraction, ExtractionError>;
}
