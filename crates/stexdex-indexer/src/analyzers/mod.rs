//! Document analyzers

pub mod latex;
pub mod stex;

pub use stex::StexAnalyzer;
