//! Corpus discovery and change detection

pub mod filter;
pub mod manifest;
pub mod scanner;


pub use filter::{FilterError, PathFilter};
pub use scanner::Scanner;
