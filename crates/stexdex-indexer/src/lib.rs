//! sTeX analysis and the refresh pipeline tying scanner, store and linker together

pub mod analyzers;
pub mod coordinator;

#[cfg(test)]
pub mod tests;

pub use analyzers::StexAnalyzer;
pub use coordinator::{Refresh, VERSION, ensure_up_to_date, refresh};
