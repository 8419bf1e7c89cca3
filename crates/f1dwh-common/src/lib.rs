//! F1 DWH Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the F1 data warehouse loaders.
//!
//! # Overview
//!
//! This crate provides common functionality used across all workspace members:
//!
//! - **Types**: Typed scalar values and tabular records
//! - **Fingerprints**: SHA-384 content hashes used for change detection
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Centralised `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use f1dwh_common::fingerprint::fingerprint;
//! use f1dwh_common::types::FieldValue;
//!
//! let values = vec![FieldValue::from("GBR"), FieldValue::from("United Kingdom")];
//! let hash = fingerprint(&values);
//! assert_eq!(hash.len(), 96);
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{DwhError, Result};
pub use types::{FieldValue, Record};
