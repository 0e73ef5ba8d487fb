//! CLI output formatting module
//!
//! Provides output formatters for terminal display.

pub mod table;

pub use table::TableFormatter;
