//! f1db SQL dump ingestion
//!
//! Parses `INSERT` statements from the seed dump into typed records.

pub mod parser;
pub mod scalar;
mod patches;
mod scanner;

pub use parser::{DumpParser, ParsedDump};
pub use scalar::{infer_bare, infer_sql_token};
