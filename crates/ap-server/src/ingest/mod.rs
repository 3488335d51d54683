//! Upload file parsing
//!
//! Turns the raw bytes of an uploaded batch file into event payloads. Bad
//! rows are skipped individually and reported back with their line numbers;
//! they never fail the whole file.

pub mod parser;

pub use parser::{parse_upload, parse_row, ParsedUpload, SkippedRow};
