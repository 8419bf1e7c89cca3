//! F1 DWH Ingest Library
//!
//! Loads the f1db seed dump and staged CSV files into change-tracked
//! warehouse tables.
//!
//! # Stages
//!
//! - **dump**: parse `INSERT` statements into typed records per table
//! - **csv_source**: stage tables as CSV and read them back
//! - **framework**: fingerprint records and upsert them concurrently, writing
//!   only rows whose content changed
//! - **pipeline**: run the stages for every registered table
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use f1dwh_ingest::config::{IngestConfig, TargetRegistry};
//! use f1dwh_ingest::framework::PgStore;
//! use f1dwh_ingest::pipeline::IngestionPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let store = Arc::new(PgStore::new(config.require_database_url()?));
//!     let registry = TargetRegistry::load("config/f1db-targets.json").await?;
//!
//!     let pipeline = IngestionPipeline::new(store, registry, config.ingestion)?;
//!     let report = pipeline.run_dump_file("./data/f1db-sql-mysql.sql").await?;
//!     println!("{} rows changed", report.total_modified());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod csv_source;
pub mod dump;
pub mod error;
pub mod framework;
pub mod pipeline;

pub use error::{IngestError, PipelineError};
