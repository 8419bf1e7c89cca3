//! Error types shared by the F1 DWH crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, DwhError>;

/// Main error type for the common crate
#[derive(Error, Debug)]
pub enum DwhError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Column count mismatch: expected {expected}, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("Parse error: {0}")]
    Parse(String),
}
